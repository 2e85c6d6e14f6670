//! Reconstruction of a board from its snapshot and bundle history.

use crate::board::{Board, BoardId};
use crate::continuity::ContinuityVerifier;
use crate::error::{Error, Result};
use crate::event::Serial;
use crate::reducer::{self, ApplyOptions};
use crate::store::EventLogStore;
use serde::{Deserialize, Serialize};

/// Replayed-event count above which a load writes a fresh snapshot.
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 1000;

/// Tunables for [`BoardLoader`].
///
/// Deserializes from a partial config, filling the rest with defaults:
///
/// ```
/// use boardfold::LoaderConfig;
///
/// let config: LoaderConfig = serde_json::from_str("{}").unwrap();
/// assert_eq!(config.compaction_threshold, 1000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Write a snapshot when more than this many events had to be replayed.
    pub compaction_threshold: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        }
    }
}

/// What a load did to produce its board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    /// Serial of the snapshot the load started from.
    pub snapshot_serial: Serial,
    /// Entries folded onto the starting board.
    pub replayed: usize,
    /// Snapshot replay hit a discontinuity and the board was rebuilt from
    /// the full history.
    pub rebuilt: bool,
    /// A fresh snapshot was written.
    pub compacted: bool,
}

/// Produces the authoritative current state of a board from a store.
///
/// Replay streams one bundle at a time, so memory use is bounded by the
/// largest bundle rather than the length of the history.
pub struct BoardLoader<'a, S: EventLogStore + ?Sized> {
    store: &'a S,
    config: LoaderConfig,
}

impl<'a, S: EventLogStore + ?Sized> BoardLoader<'a, S> {
    pub fn new(store: &'a S) -> Self {
        BoardLoader::with_config(store, LoaderConfig::default())
    }

    pub fn with_config(store: &'a S, config: LoaderConfig) -> Self {
        BoardLoader { store, config }
    }

    /// Load the current state of `board_id`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownBoard`] if the board has no snapshot.
    /// - [`Error::Unrecoverable`] if the full history is itself discontinuous.
    /// - Any store error.
    pub fn load(&self, board_id: &BoardId) -> Result<Board> {
        self.load_with_report(board_id).map(|(board, _)| board)
    }

    /// [`load`](Self::load), also reporting how the board was produced.
    pub fn load_with_report(&self, board_id: &BoardId) -> Result<(Board, LoadReport)> {
        let snapshot = self.store.read_snapshot(board_id)?;
        let snapshot_serial = snapshot.serial;
        let name = snapshot.name;
        let access_policy = snapshot.content.access_policy.clone();

        let mut board = snapshot.content;
        board.serial = snapshot_serial;

        let (board, replayed, rebuilt) = match self.replay(&mut board, snapshot_serial) {
            Ok(replayed) => (board, replayed, false),
            Err(Error::Discontinuity(gap)) => {
                log::warn!(
                    "boardfold: board '{board_id}': {gap} replaying from snapshot at {snapshot_serial}, rebuilding from full history"
                );
                // the stored policy is authoritative, not the logged events
                let mut fresh = Board::new(board_id.clone(), name);
                fresh.access_policy = access_policy;
                match self.replay(&mut fresh, 0) {
                    Ok(replayed) => (fresh, replayed, true),
                    Err(Error::Discontinuity(source)) => {
                        log::error!(
                            "boardfold: board '{board_id}' is unrecoverable: {source} in full history"
                        );
                        return Err(Error::Unrecoverable {
                            board_id: board_id.clone(),
                            source,
                        });
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };

        let compacted = rebuilt || replayed > self.config.compaction_threshold;
        if compacted {
            log::debug!(
                "boardfold: board '{board_id}': compacting at serial {} (replayed {replayed}, rebuilt {rebuilt})",
                board.serial
            );
            self.store.write_snapshot(board_id, &board)?;
        }

        let report = LoadReport {
            snapshot_serial,
            replayed,
            rebuilt,
            compacted,
        };
        Ok((board, report))
    }

    /// Fold every stored entry after `after` onto `board`, verifying
    /// continuity across bundle boundaries. Returns the number of entries
    /// applied.
    fn replay(&self, board: &mut Board, after: Serial) -> Result<usize> {
        let mut verifier = ContinuityVerifier::new(after);
        let mut replayed = 0;
        for bundle in self.store.stream_bundles(&board.id, after)? {
            let bundle = bundle?;
            for entry in bundle.entries.iter().filter(|e| e.serial > after) {
                verifier.accept(entry.serial)?;
                reducer::apply(board, entry, ApplyOptions::replay())?;
                replayed += 1;
            }
            log::debug!(
                "boardfold: board '{}': replayed bundle {}..={}",
                board.id,
                bundle.first_serial,
                bundle.last_serial
            );
        }
        Ok(replayed)
    }
}
