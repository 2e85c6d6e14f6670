//! Board state: the value every event is folded into.

use crate::event::Serial;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identifier of a board.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoardId(pub String);

impl BoardId {
    pub fn new(id: impl Into<String>) -> Self {
        BoardId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of an item on a board.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        ItemId(id.into())
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        ConnectionId(id.into())
    }
}

/// Full state of one board.
///
/// `serial` is the serial of the last history entry folded into the board,
/// or 0 for a board nothing has been applied to. Items and connections are
/// keyed maps so two boards with the same content compare equal and
/// serialize identically regardless of insertion order.
///
/// # Examples
///
/// ```
/// use boardfold::{Board, BoardId};
///
/// let board = Board::new(BoardId::new("retro"), "Sprint retro");
/// assert_eq!(board.serial, 0);
/// assert!(board.items.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub id: BoardId,
    pub name: String,
    pub serial: Serial,
    #[serde(default)]
    pub items: BTreeMap<ItemId, Item>,
    #[serde(default)]
    pub connections: BTreeMap<ConnectionId, Connection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_policy: Option<AccessPolicy>,
}

impl Board {
    /// Create an empty board at serial 0.
    pub fn new(id: BoardId, name: impl Into<String>) -> Self {
        Board {
            id,
            name: name.into(),
            serial: 0,
            items: BTreeMap::new(),
            connections: BTreeMap::new(),
            access_policy: None,
        }
    }

    pub fn item(&self, id: &ItemId) -> Option<&Item> {
        self.items.get(id)
    }

    /// Items that currently reference `container` as their container.
    pub fn children_of<'a>(&'a self, container: &'a ItemId) -> impl Iterator<Item = &'a Item> {
        self.items
            .values()
            .filter(move |item| item.container_id.as_ref() == Some(container))
    }
}

/// An item placed on a board.
///
/// `container_id` is a weak back-reference: containment is a relation kept in
/// step with the container's `contains` set by the reducer, never ownership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<ItemId>,
    pub kind: ItemKind,
}

impl Item {
    /// A note with default size at the given position.
    pub fn note(id: impl Into<String>, text: impl Into<String>, x: f64, y: f64) -> Self {
        Item {
            id: ItemId::new(id),
            x,
            y,
            width: 5.0,
            height: 5.0,
            locked: false,
            container_id: None,
            kind: ItemKind::Note {
                text: text.into(),
                color: "#FDDF90".to_string(),
            },
        }
    }

    /// An empty container with the given bounds.
    pub fn container(
        id: impl Into<String>,
        text: impl Into<String>,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    ) -> Self {
        Item {
            id: ItemId::new(id),
            x,
            y,
            width,
            height,
            locked: false,
            container_id: None,
            kind: ItemKind::Container {
                text: text.into(),
                contains: BTreeSet::new(),
            },
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self.kind, ItemKind::Container { .. })
    }
}

/// Item variants. Each variant's fields are fixed; code matching on kinds is
/// exhaustive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ItemKind {
    Note {
        text: String,
        color: String,
    },
    Text {
        text: String,
        font_size: f64,
    },
    Container {
        text: String,
        #[serde(default)]
        contains: BTreeSet<ItemId>,
    },
    Image {
        asset_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        src: Option<String>,
    },
}

impl ItemKind {
    /// Stacking layer of the kind. Containers are drawn below everything else.
    pub fn z_layer(&self) -> u8 {
        match self {
            ItemKind::Container { .. } => 0,
            ItemKind::Image { .. } => 1,
            ItemKind::Note { .. } | ItemKind::Text { .. } => 2,
        }
    }
}

/// A line drawn between two endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub from: Endpoint,
    pub to: Endpoint,
}

impl Connection {
    pub fn between(id: impl Into<String>, from: ItemId, to: ItemId) -> Self {
        Connection {
            id: ConnectionId::new(id),
            from: Endpoint::Item(from),
            to: Endpoint::Item(to),
        }
    }

    /// Whether either end is attached to `item`.
    pub fn touches(&self, item: &ItemId) -> bool {
        self.from.item() == Some(item) || self.to.item() == Some(item)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Endpoint {
    Item(ItemId),
    Point { x: f64, y: f64 },
}

impl Endpoint {
    pub fn item(&self) -> Option<&ItemId> {
        match self {
            Endpoint::Item(id) => Some(id),
            Endpoint::Point { .. } => None,
        }
    }
}

/// Who may read and write a board.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessPolicy {
    #[serde(default)]
    pub allow_public_read: bool,
    #[serde(default)]
    pub allow_public_write: bool,
    #[serde(default)]
    pub allow_list: Vec<AccessListEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessListEntry {
    /// Exact address, or `*@domain` to match a whole domain.
    pub email_pattern: String,
    pub access: AccessLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessLevel {
    ReadOnly,
    ReadWrite,
    Admin,
}
