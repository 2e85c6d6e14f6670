use crate::board::BoardId;
use crate::continuity::Discontinuity;
use crate::event::Serial;
use std::io;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the board store.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A gap or overlap between the expected and the found serial.
    #[error(transparent)]
    Discontinuity(#[from] Discontinuity),

    /// No snapshot exists for the board.
    #[error("board '{0}' not found")]
    UnknownBoard(BoardId),

    /// Full-history replay hit a discontinuity after snapshot replay already
    /// failed. The board must not be opened.
    #[error("board '{board_id}' is unrecoverable: {source}")]
    Unrecoverable {
        board_id: BoardId,
        source: Discontinuity,
    },

    #[error("board '{0}' already exists")]
    BoardExists(BoardId),

    /// An event addressed to one board was applied or submitted to another.
    #[error("event for board '{found}' applied to board '{expected}'")]
    BoardMismatch { expected: BoardId, found: BoardId },

    #[error("a bundle must contain at least one entry")]
    EmptyBundle,

    /// The first serial of an appended bundle does not follow the store tail.
    #[error("append to board '{board_id}' is not contiguous: tail is {tail}, bundle starts at {first}")]
    NonContiguousAppend {
        board_id: BoardId,
        tail: Serial,
        first: Serial,
    },

    #[error("invalid board id '{0}'")]
    InvalidBoardId(String),

    /// A stored bundle line failed checksum verification.
    #[error("corrupt bundle record for board '{board_id}': {detail}")]
    Corrupt { board_id: BoardId, detail: String },

    #[error("unknown session {0}")]
    UnknownSession(u64),

    /// A batch arrived on a session that has not joined a board.
    #[error("session {0} has not joined a board")]
    NotJoined(u64),

    /// A lock was poisoned by a panicking holder.
    #[error("lock on '{0}' is poisoned")]
    Poisoned(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
