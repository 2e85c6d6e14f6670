//! Two clients editing one board through a hub backed by a file store.
//!
//! Ada drags a note around while her previous batch is still unacknowledged;
//! the moves fold into one. Bob sees every accepted event. Finally the board
//! is reloaded from disk and compared with the live state.

use boardfold::{
    Actor, AppEvent, Board, BoardHub, BoardId, BoardLoader, ClientMessage, EventLogStore,
    FileStore, Item, ItemId, OutboundSyncQueue, ServerMessage, SessionId, TransmissionError,
    Transport,
};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

/// Transport that hands batches straight to an in-process hub.
struct HubLink<'a> {
    hub: &'a BoardHub<FileStore>,
    session: SessionId,
}

impl Transport for HubLink<'_> {
    fn send(&mut self, batch: &[AppEvent]) -> Result<(), TransmissionError> {
        self.hub
            .handle(
                self.session,
                ClientMessage::Batch {
                    events: batch.to_vec(),
                },
            )
            .map_err(|e| TransmissionError(e.to_string()))
    }
}

fn drain(name: &str, rx: &Receiver<ServerMessage>) -> Vec<ServerMessage> {
    let messages: Vec<ServerMessage> = rx.try_iter().collect();
    for message in &messages {
        match message {
            ServerMessage::BoardState { board } => {
                println!("{name}: board '{}' at serial {}", board.name, board.serial)
            }
            ServerMessage::Event { entry } => println!(
                "{name}: #{} {} by {}",
                entry.serial,
                entry.event.action(),
                entry.actor.nickname
            ),
            ServerMessage::Ack { .. } => println!("{name}: ack"),
        }
    }
    messages
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(FileStore::builder(dir.path()).archive_superseded(true).open()?);
    let hub = BoardHub::new(Arc::clone(&store));

    let id = BoardId::new("retro");
    hub.create_board(
        Board::new(id.clone(), "Sprint retro"),
        &Actor::anonymous("host"),
        vec![AppEvent::AddItem {
            board_id: id.clone(),
            item: Item::container("went-well", "Went well", 0.0, 0.0, 40.0, 40.0),
        }],
    )?;

    let (ada_tx, ada_rx) = mpsc::channel();
    let (bob_tx, bob_rx) = mpsc::channel();
    let ada = hub.connect(Actor::anonymous("ada").with_user_id("u-1"), ada_tx)?;
    let bob = hub.connect(Actor::anonymous("bob"), bob_tx)?;
    hub.handle(ada, ClientMessage::Join { board_id: id.clone() })?;
    hub.handle(bob, ClientMessage::Join { board_id: id.clone() })?;
    drain("ada", &ada_rx);
    drain("bob", &bob_rx);

    let mut outbound = OutboundSyncQueue::new(HubLink { hub: &hub, session: ada });
    outbound.enqueue(AppEvent::AddItem {
        board_id: id.clone(),
        item: Item::note("n1", "Pairing worked", 50.0, 5.0),
    });
    // no ack processed yet: these fold into one move
    for step in 1..=5 {
        outbound.enqueue(AppEvent::MoveItem {
            board_id: id.clone(),
            item_id: ItemId::new("n1"),
            x: 50.0 - 9.0 * step as f64,
            y: 5.0,
        });
    }
    println!("ada: {} event(s) queued behind the in-flight batch", outbound.queue().len());

    while !outbound.is_idle() {
        let messages = drain("ada", &ada_rx);
        if messages.is_empty() {
            break;
        }
        for message in &messages {
            outbound.on_message(message);
        }
    }
    outbound.enqueue(AppEvent::SetContainer {
        board_id: id.clone(),
        item_id: ItemId::new("n1"),
        container_id: Some(ItemId::new("went-well")),
    });
    for message in drain("ada", &ada_rx) {
        outbound.on_message(&message);
    }
    drain("bob", &bob_rx);

    let live = hub.board(&id)?;
    store.write_snapshot(&id, &live)?;
    let reloaded = BoardLoader::new(&*store).load(&id)?;
    println!(
        "live serial {}, reloaded serial {}, identical: {}",
        live.serial,
        reloaded.serial,
        live == reloaded
    );
    Ok(())
}
