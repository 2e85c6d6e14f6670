use crate::board::{AccessPolicy, BoardId, Connection, ConnectionId, Item, ItemId};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Per-board sequence number. Strictly increasing and gapless; 0 means
/// "nothing applied yet".
pub type Serial = u64;

/// A mutation intent sent by a client.
///
/// Events carry no serial. The server assigns one when the event is durably
/// appended (see [`HistoryEntry`]). Serialized with an `action` tag:
///
/// ```text
/// {"action":"item.move","board_id":"retro","item_id":"a","x":5.0,"y":5.0}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum AppEvent {
    #[serde(rename = "item.add")]
    AddItem { board_id: BoardId, item: Item },

    /// Replace an item's attributes. The item keeps its place in any
    /// container relation it already has unless `item.container_id` differs.
    #[serde(rename = "item.update")]
    UpdateItem { board_id: BoardId, item: Item },

    #[serde(rename = "item.move")]
    MoveItem {
        board_id: BoardId,
        item_id: ItemId,
        x: f64,
        y: f64,
    },

    #[serde(rename = "item.delete")]
    DeleteItem { board_id: BoardId, item_id: ItemId },

    #[serde(rename = "item.lock")]
    SetLock {
        board_id: BoardId,
        item_id: ItemId,
        locked: bool,
    },

    #[serde(rename = "item.setContainer")]
    SetContainer {
        board_id: BoardId,
        item_id: ItemId,
        container_id: Option<ItemId>,
    },

    #[serde(rename = "connection.add")]
    AddConnection {
        board_id: BoardId,
        connection: Connection,
    },

    #[serde(rename = "connection.delete")]
    DeleteConnection {
        board_id: BoardId,
        connection_id: ConnectionId,
    },

    #[serde(rename = "board.rename")]
    RenameBoard { board_id: BoardId, name: String },

    #[serde(rename = "board.setAccessPolicy")]
    SetAccessPolicy {
        board_id: BoardId,
        policy: Option<AccessPolicy>,
    },
}

/// The action class of a foldable event, together with the entity it targets.
///
/// Two queued events with equal keys (on the same board) are redundant: only
/// the newer one needs to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FoldKey<'a> {
    Move(&'a ItemId),
    Update(&'a ItemId),
    Lock(&'a ItemId),
    Container(&'a ItemId),
    Rename,
    AccessPolicy,
}

/// An entity an event reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity<'a> {
    Board,
    Item(&'a ItemId),
    Connection(&'a ConnectionId),
}

impl AppEvent {
    pub fn board_id(&self) -> &BoardId {
        match self {
            AppEvent::AddItem { board_id, .. }
            | AppEvent::UpdateItem { board_id, .. }
            | AppEvent::MoveItem { board_id, .. }
            | AppEvent::DeleteItem { board_id, .. }
            | AppEvent::SetLock { board_id, .. }
            | AppEvent::SetContainer { board_id, .. }
            | AppEvent::AddConnection { board_id, .. }
            | AppEvent::DeleteConnection { board_id, .. }
            | AppEvent::RenameBoard { board_id, .. }
            | AppEvent::SetAccessPolicy { board_id, .. } => board_id,
        }
    }

    /// The wire name of the action, e.g. `"item.move"`.
    pub fn action(&self) -> &'static str {
        match self {
            AppEvent::AddItem { .. } => "item.add",
            AppEvent::UpdateItem { .. } => "item.update",
            AppEvent::MoveItem { .. } => "item.move",
            AppEvent::DeleteItem { .. } => "item.delete",
            AppEvent::SetLock { .. } => "item.lock",
            AppEvent::SetContainer { .. } => "item.setContainer",
            AppEvent::AddConnection { .. } => "connection.add",
            AppEvent::DeleteConnection { .. } => "connection.delete",
            AppEvent::RenameBoard { .. } => "board.rename",
            AppEvent::SetAccessPolicy { .. } => "board.setAccessPolicy",
        }
    }

    /// Fold key for events a newer event of the same key supersedes.
    /// `None` for events that must always be transmitted.
    pub fn fold_key(&self) -> Option<FoldKey<'_>> {
        match self {
            AppEvent::MoveItem { item_id, .. } => Some(FoldKey::Move(item_id)),
            AppEvent::UpdateItem { item, .. } => Some(FoldKey::Update(&item.id)),
            AppEvent::SetLock { item_id, .. } => Some(FoldKey::Lock(item_id)),
            AppEvent::SetContainer { item_id, .. } => Some(FoldKey::Container(item_id)),
            AppEvent::RenameBoard { .. } => Some(FoldKey::Rename),
            AppEvent::SetAccessPolicy { .. } => Some(FoldKey::AccessPolicy),
            AppEvent::AddItem { .. }
            | AppEvent::DeleteItem { .. }
            | AppEvent::AddConnection { .. }
            | AppEvent::DeleteConnection { .. } => None,
        }
    }

    /// Every entity the event depends on or changes.
    pub fn entities(&self) -> Vec<Entity<'_>> {
        match self {
            AppEvent::AddItem { item, .. } | AppEvent::UpdateItem { item, .. } => {
                let mut out = vec![Entity::Item(&item.id)];
                out.extend(item.container_id.as_ref().map(Entity::Item));
                out
            }
            AppEvent::MoveItem { item_id, .. }
            | AppEvent::DeleteItem { item_id, .. }
            | AppEvent::SetLock { item_id, .. } => vec![Entity::Item(item_id)],
            AppEvent::SetContainer {
                item_id,
                container_id,
                ..
            } => {
                let mut out = vec![Entity::Item(item_id)];
                out.extend(container_id.as_ref().map(Entity::Item));
                out
            }
            AppEvent::AddConnection { connection, .. } => {
                let mut out = vec![Entity::Connection(&connection.id)];
                out.extend(connection.from.item().map(Entity::Item));
                out.extend(connection.to.item().map(Entity::Item));
                out
            }
            AppEvent::DeleteConnection { connection_id, .. } => {
                vec![Entity::Connection(connection_id)]
            }
            AppEvent::RenameBoard { .. } | AppEvent::SetAccessPolicy { .. } => {
                vec![Entity::Board]
            }
        }
    }

    /// Whether `self` and `other` address the same board and share an entity.
    pub fn overlaps(&self, other: &AppEvent) -> bool {
        if self.board_id() != other.board_id() {
            return false;
        }
        let theirs = other.entities();
        self.entities().iter().any(|e| theirs.contains(e))
    }
}

/// The user on whose behalf an event was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Actor {
    /// An unauthenticated participant known only by nickname.
    pub fn anonymous(nickname: impl Into<String>) -> Self {
        Actor {
            nickname: nickname.into(),
            user_id: None,
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// An [`AppEvent`] enriched at append time: the unit of a board's history.
///
/// # Examples
///
/// ```
/// use boardfold::{Actor, AppEvent, BoardId, HistoryEntry, Item};
///
/// let event = AppEvent::AddItem {
///     board_id: BoardId::new("retro"),
///     item: Item::note("a", "hello", 0.0, 0.0),
/// };
/// let entry = HistoryEntry::new(1, Actor::anonymous("ada"), event);
/// assert_eq!(entry.serial, 1);
/// assert!(entry.timestamp > 0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub serial: Serial,
    /// Milliseconds since the Unix epoch at append time.
    pub timestamp: u64,
    pub actor: Actor,
    pub event: AppEvent,
}

impl HistoryEntry {
    /// Enrich `event` with a serial, the acting user and the current time.
    pub fn new(serial: Serial, actor: Actor, event: AppEvent) -> Self {
        HistoryEntry {
            serial,
            timestamp: now_millis(),
            actor,
            event,
        }
    }

    /// Replace the timestamp. Used when importing recorded history.
    pub fn at(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn board_id(&self) -> &BoardId {
        self.event.board_id()
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
