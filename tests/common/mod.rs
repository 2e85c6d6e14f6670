#![allow(dead_code)]

use boardfold::{
    Actor, AppEvent, AppEvent as E, Board, BoardId, EventBundle, HistoryEntry, Item, ItemId,
    MemoryStore, OutboundSyncQueue, SnapshotRecord, TransmissionError, Transport,
};

pub fn board_id() -> BoardId {
    BoardId::new("retro")
}

pub fn actor() -> Actor {
    Actor::anonymous("ada")
}

pub fn entry(serial: u64, event: AppEvent) -> HistoryEntry {
    HistoryEntry {
        serial,
        timestamp: 1000 + serial,
        actor: actor(),
        event,
    }
}

pub fn add_note(id: &str, x: f64, y: f64) -> AppEvent {
    E::AddItem {
        board_id: board_id(),
        item: Item::note(id, id, x, y),
    }
}

pub fn add_container(id: &str) -> AppEvent {
    E::AddItem {
        board_id: board_id(),
        item: Item::container(id, id, 0.0, 0.0, 100.0, 100.0),
    }
}

pub fn move_item(id: &str, x: f64, y: f64) -> AppEvent {
    E::MoveItem {
        board_id: board_id(),
        item_id: ItemId::new(id),
        x,
        y,
    }
}

pub fn lock_item(id: &str, locked: bool) -> AppEvent {
    E::SetLock {
        board_id: board_id(),
        item_id: ItemId::new(id),
        locked,
    }
}

pub fn delete_item(id: &str) -> AppEvent {
    E::DeleteItem {
        board_id: board_id(),
        item_id: ItemId::new(id),
    }
}

pub fn set_container(id: &str, container: Option<&str>) -> AppEvent {
    E::SetContainer {
        board_id: board_id(),
        item_id: ItemId::new(id),
        container_id: container.map(ItemId::new),
    }
}

/// Entry for serial `s` in a synthetic history: adds note `n{s}` at (s, s).
pub fn numbered(serial: u64) -> HistoryEntry {
    let f = serial as f64;
    entry(serial, add_note(&format!("n{serial}"), f, f))
}

pub fn bundle_of(serials: std::ops::RangeInclusive<u64>) -> EventBundle {
    EventBundle::new(board_id(), serials.map(numbered).collect()).unwrap()
}

pub fn empty_board() -> Board {
    Board::new(board_id(), "Retro")
}

pub fn empty_snapshot() -> SnapshotRecord {
    SnapshotRecord::of(&empty_board())
}

/// Memory store holding the given bundles over a serial-0 snapshot.
pub fn store_with(bundles: Vec<EventBundle>) -> MemoryStore {
    let store = MemoryStore::new();
    store.restore(empty_snapshot(), bundles).unwrap();
    store
}

/// Transport that records every batch, optionally failing each send.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    pub sent: Vec<Vec<AppEvent>>,
    pub fail: bool,
}

impl Transport for RecordingTransport {
    fn send(&mut self, batch: &[AppEvent]) -> Result<(), TransmissionError> {
        self.sent.push(batch.to_vec());
        if self.fail {
            return Err(TransmissionError("link down".to_string()));
        }
        Ok(())
    }
}

pub fn recording_queue() -> OutboundSyncQueue<RecordingTransport> {
    OutboundSyncQueue::new(RecordingTransport::default())
}
