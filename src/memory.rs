//! In-memory [`EventLogStore`], used by tests and single-process servers that
//! do not need durability.

use crate::board::{Board, BoardId};
use crate::error::{Error, Result};
use crate::event::{HistoryEntry, Serial};
use crate::store::{self, BundleStream, EventBundle, EventLogStore, SnapshotRecord};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct BoardLog {
    snapshot: Option<SnapshotRecord>,
    bundles: Vec<EventBundle>,
}

impl BoardLog {
    fn tail(&self) -> Serial {
        let snapshot = self.snapshot.as_ref().map_or(0, |s| s.serial);
        self.bundles
            .last()
            .map_or(snapshot, |b| b.last_serial.max(snapshot))
    }
}

/// Event log kept entirely in memory.
///
/// Each board has its own lock; the outer map lock is only held long enough
/// to find a board, so boards never contend with each other.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    boards: Arc<Mutex<HashMap<BoardId, Arc<Mutex<BoardLog>>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Load recorded history verbatim, replacing whatever the board held.
    ///
    /// Bundles are stored as given, sorted by `last_serial`, without the
    /// contiguity check `append_bundle` performs. Intended for importing
    /// history from another store and for reproducing damaged logs.
    pub fn restore(&self, snapshot: SnapshotRecord, mut bundles: Vec<EventBundle>) -> Result<()> {
        bundles.sort_by_key(|b| b.last_serial);
        let slot = self.slot(&snapshot.board_id, true)?;
        let mut log = lock(&slot, &snapshot.board_id)?;
        log.bundles = bundles;
        log.snapshot = Some(snapshot);
        Ok(())
    }

    /// Number of bundles stored for the board.
    pub fn bundle_count(&self, board_id: &BoardId) -> Result<usize> {
        let slot = self.slot(board_id, false)?;
        let log = lock(&slot, board_id)?;
        Ok(log.bundles.len())
    }

    fn slot(&self, board_id: &BoardId, create: bool) -> Result<Arc<Mutex<BoardLog>>> {
        let mut boards = self
            .boards
            .lock()
            .map_err(|_| Error::Poisoned(board_id.to_string()))?;
        match boards.get(board_id) {
            Some(slot) => Ok(Arc::clone(slot)),
            None if create => {
                let slot = Arc::new(Mutex::new(BoardLog::default()));
                boards.insert(board_id.clone(), Arc::clone(&slot));
                Ok(slot)
            }
            None => Err(Error::UnknownBoard(board_id.clone())),
        }
    }
}

fn lock<'a>(slot: &'a Mutex<BoardLog>, board_id: &BoardId) -> Result<MutexGuard<'a, BoardLog>> {
    slot.lock().map_err(|_| Error::Poisoned(board_id.to_string()))
}

/// Walks a board's bundles by index, cloning one per step under a short lock.
/// Stops at the bundles present when the stream was opened.
struct BundleCursor {
    board_id: BoardId,
    slot: Arc<Mutex<BoardLog>>,
    next: usize,
    end: usize,
}

impl Iterator for BundleCursor {
    type Item = Result<EventBundle>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let bundle = match lock(&self.slot, &self.board_id) {
            Ok(log) => log.bundles.get(self.next).cloned(),
            Err(e) => {
                self.next = self.end;
                return Some(Err(e));
            }
        };
        match bundle {
            Some(bundle) => {
                self.next += 1;
                Some(Ok(bundle))
            }
            // restored with fewer bundles since the stream opened
            None => {
                self.next = self.end;
                None
            }
        }
    }
}

impl EventLogStore for MemoryStore {
    fn create_board(&self, snapshot: &SnapshotRecord) -> Result<()> {
        let slot = self.slot(&snapshot.board_id, true)?;
        let mut log = lock(&slot, &snapshot.board_id)?;
        if log.snapshot.is_some() {
            return Err(Error::BoardExists(snapshot.board_id.clone()));
        }
        log.snapshot = Some(snapshot.clone());
        Ok(())
    }

    fn append_bundle(&self, board_id: &BoardId, entries: &[HistoryEntry]) -> Result<()> {
        let slot = self.slot(board_id, false)?;
        let mut log = lock(&slot, board_id)?;
        let bundle = store::next_bundle(board_id, log.tail(), entries)?;
        log.bundles.push(bundle);
        Ok(())
    }

    fn stream_bundles(
        &self,
        board_id: &BoardId,
        after_serial: Serial,
    ) -> Result<BundleStream<'_>> {
        let slot = self.slot(board_id, false)?;
        let (next, end) = {
            let log = lock(&slot, board_id)?;
            let next = log.bundles.partition_point(|b| b.last_serial < after_serial);
            (next, log.bundles.len())
        };
        Ok(Box::new(BundleCursor {
            board_id: board_id.clone(),
            slot,
            next,
            end,
        }))
    }

    fn read_snapshot(&self, board_id: &BoardId) -> Result<SnapshotRecord> {
        let slot = self.slot(board_id, false)?;
        let log = lock(&slot, board_id)?;
        log.snapshot
            .clone()
            .ok_or_else(|| Error::UnknownBoard(board_id.clone()))
    }

    fn write_snapshot(&self, board_id: &BoardId, board: &Board) -> Result<()> {
        let slot = self.slot(board_id, false)?;
        let mut log = lock(&slot, board_id)?;
        log.snapshot = Some(SnapshotRecord::of(board));
        Ok(())
    }

    fn tail_serial(&self, board_id: &BoardId) -> Result<Serial> {
        let slot = self.slot(board_id, false)?;
        let log = lock(&slot, board_id)?;
        Ok(log.tail())
    }
}
