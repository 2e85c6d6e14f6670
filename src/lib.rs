mod archive;
mod board;
pub mod continuity;
mod error;
mod event;
mod file_store;
pub mod fold;
mod loader;
mod memory;
pub mod outbound;
pub mod reducer;
mod snapshot;
mod store;
pub mod sync;

pub use board::{
    AccessLevel, AccessListEntry, AccessPolicy, Board, BoardId, Connection, ConnectionId,
    Endpoint, Item, ItemId, ItemKind,
};
pub use continuity::{ContinuityVerifier, Discontinuity};
pub use error::{Error, Result};
pub use event::{Actor, AppEvent, Entity, FoldKey, HistoryEntry, Serial};
pub use file_store::{FileStore, FileStoreBuilder, LockMode, line_hash};
pub use loader::{BoardLoader, DEFAULT_COMPACTION_THRESHOLD, LoadReport, LoaderConfig};
pub use memory::MemoryStore;
pub use outbound::{OutboundSyncQueue, TransmissionError, Transport};
pub use reducer::ApplyOptions;
pub use store::{BundleStream, EventBundle, EventLogStore, SnapshotRecord};
pub use sync::{BoardHub, ClientMessage, ServerMessage, SessionId};
