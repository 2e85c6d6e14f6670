//! The persistence boundary: bundles of history plus one snapshot per board.

use crate::board::{Board, BoardId};
use crate::continuity::ContinuityVerifier;
use crate::error::{Error, Result};
use crate::event::{HistoryEntry, Serial, now_millis};
use serde::{Deserialize, Serialize};

/// A lazily evaluated stream of bundles, ordered by `last_serial`.
///
/// Finite and not restartable: call [`EventLogStore::stream_bundles`] again
/// to start over.
pub type BundleStream<'a> = Box<dyn Iterator<Item = Result<EventBundle>> + 'a>;

/// A contiguous, non-empty run of history entries for one board.
///
/// Bundles are the physical unit of the log. A board's history is the
/// concatenation of its bundles in `last_serial` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBundle {
    pub board_id: BoardId,
    pub first_serial: Serial,
    pub last_serial: Serial,
    pub entries: Vec<HistoryEntry>,
    /// Milliseconds since the Unix epoch when the bundle was stored.
    pub saved_at: u64,
}

impl EventBundle {
    /// Build a bundle from entries, stamping `saved_at` with the current time.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyBundle`] for no entries, [`Error::BoardMismatch`] if an
    /// entry belongs to another board, and [`Error::Discontinuity`] if the
    /// entries' serials are not consecutive.
    pub fn new(board_id: BoardId, entries: Vec<HistoryEntry>) -> Result<Self> {
        let (first, last) = match (entries.first(), entries.last()) {
            (Some(first), Some(last)) => (first.serial, last.serial),
            _ => return Err(Error::EmptyBundle),
        };
        if let Some(stray) = entries.iter().find(|e| e.board_id() != &board_id) {
            return Err(Error::BoardMismatch {
                expected: board_id,
                found: stray.board_id().clone(),
            });
        }
        let mut verifier = ContinuityVerifier::new(first.saturating_sub(1));
        for entry in &entries {
            verifier.accept(entry.serial)?;
        }
        Ok(EventBundle {
            board_id,
            first_serial: first,
            last_serial: last,
            entries,
            saved_at: now_millis(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the declared bounds match the entries carried.
    pub(crate) fn is_well_formed(&self) -> bool {
        self.entries.first().map(|e| e.serial) == Some(self.first_serial)
            && self.entries.last().map(|e| e.serial) == Some(self.last_serial)
    }
}

/// A board frozen at `serial`: the basis replay starts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub board_id: BoardId,
    pub name: String,
    pub serial: Serial,
    pub content: Board,
}

impl SnapshotRecord {
    pub fn of(board: &Board) -> Self {
        SnapshotRecord {
            board_id: board.id.clone(),
            name: board.name.clone(),
            serial: board.serial,
            content: board.clone(),
        }
    }
}

/// Durable, append-only storage of event bundles plus a single mutable
/// snapshot per board.
///
/// Implementations must make `append_bundle` reject bundles that do not
/// start right after the board's current tail, so two writers racing on the
/// same board can never both succeed with the same serial.
pub trait EventLogStore: Send + Sync {
    /// Register a new board with its initial snapshot.
    ///
    /// # Errors
    ///
    /// [`Error::BoardExists`] if the board already has a snapshot.
    fn create_board(&self, snapshot: &SnapshotRecord) -> Result<()>;

    /// Append `entries` as one bundle.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyBundle`], or [`Error::NonContiguousAppend`] when
    /// `entries[0].serial` is not the tail serial plus one.
    fn append_bundle(&self, board_id: &BoardId, entries: &[HistoryEntry]) -> Result<()>;

    /// Stream the bundles whose `last_serial >= after_serial`, in ascending
    /// `last_serial` order.
    fn stream_bundles(&self, board_id: &BoardId, after_serial: Serial)
    -> Result<BundleStream<'_>>;

    /// Read the board's current snapshot.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownBoard`] if the board has none.
    fn read_snapshot(&self, board_id: &BoardId) -> Result<SnapshotRecord>;

    /// Overwrite the board's snapshot with `board` at `board.serial`.
    fn write_snapshot(&self, board_id: &BoardId, board: &Board) -> Result<()>;

    /// Highest serial persisted for the board, in a bundle or the snapshot.
    fn tail_serial(&self, board_id: &BoardId) -> Result<Serial>;
}

/// Validate `entries` against `tail` and package them as a bundle.
pub(crate) fn next_bundle(
    board_id: &BoardId,
    tail: Serial,
    entries: &[HistoryEntry],
) -> Result<EventBundle> {
    let first = entries.first().ok_or(Error::EmptyBundle)?.serial;
    if first != tail + 1 {
        return Err(Error::NonContiguousAppend {
            board_id: board_id.clone(),
            tail,
            first,
        });
    }
    EventBundle::new(board_id.clone(), entries.to_vec())
}
