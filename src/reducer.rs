//! The board state transition: one history entry folded into one board.

use crate::board::{Board, Item, ItemId, ItemKind};
use crate::continuity::Discontinuity;
use crate::error::{Error, Result};
use crate::event::{AppEvent, HistoryEntry, Serial};

/// How [`apply`] treats serials, the board value and access-policy events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Reject an entry whose serial is not exactly `board.serial + 1`.
    pub strict_on_serials: bool,
    /// Mutate the board directly instead of working on a copy and swapping it
    /// in. The result is the same either way.
    pub inplace: bool,
    /// Leave `access_policy` untouched on `board.setAccessPolicy`, only
    /// advancing the serial. Used while reconstructing from the log, where the
    /// persisted policy is the source of truth.
    pub preserve_access_policy: bool,
}

impl ApplyOptions {
    /// Options for confirmed live events.
    pub fn strict() -> Self {
        ApplyOptions {
            strict_on_serials: true,
            inplace: true,
            preserve_access_policy: false,
        }
    }

    /// Options for replaying stored history whose continuity the caller
    /// verifies itself.
    pub fn replay() -> Self {
        ApplyOptions {
            strict_on_serials: false,
            inplace: true,
            preserve_access_policy: true,
        }
    }

    pub fn with_inplace(mut self, inplace: bool) -> Self {
        self.inplace = inplace;
        self
    }
}

impl Default for ApplyOptions {
    fn default() -> Self {
        ApplyOptions::strict()
    }
}

/// Fold `entry` into `board` and return the board's new serial.
///
/// Reads nothing but its arguments. References to items or connections that
/// no longer exist are ignored, since concurrent deletes are normal. On error
/// the board is left as it was.
///
/// # Errors
///
/// - [`Error::Discontinuity`] when `strict_on_serials` is set and the entry
///   does not directly follow `board.serial`.
/// - [`Error::BoardMismatch`] when the event addresses another board.
///
/// # Examples
///
/// ```
/// use boardfold::reducer::{apply, ApplyOptions};
/// use boardfold::{Actor, AppEvent, Board, BoardId, HistoryEntry, Item, ItemId};
///
/// let id = BoardId::new("retro");
/// let mut board = Board::new(id.clone(), "Retro");
/// let add = HistoryEntry::new(1, Actor::anonymous("ada"), AppEvent::AddItem {
///     board_id: id.clone(),
///     item: Item::note("a", "hi", 0.0, 0.0),
/// });
/// assert_eq!(apply(&mut board, &add, ApplyOptions::strict()).unwrap(), 1);
/// assert!(board.item(&ItemId::new("a")).is_some());
///
/// // the same serial again is rejected
/// assert!(apply(&mut board, &add, ApplyOptions::strict()).is_err());
/// ```
pub fn apply(board: &mut Board, entry: &HistoryEntry, options: ApplyOptions) -> Result<Serial> {
    if entry.board_id() != &board.id {
        return Err(Error::BoardMismatch {
            expected: board.id.clone(),
            found: entry.board_id().clone(),
        });
    }
    if options.strict_on_serials && entry.serial != board.serial + 1 {
        return Err(Discontinuity {
            expected: board.serial + 1,
            found: entry.serial,
        }
        .into());
    }

    if options.inplace {
        mutate(board, entry, options);
    } else {
        let mut next = board.clone();
        mutate(&mut next, entry, options);
        *board = next;
    }
    Ok(board.serial)
}

fn mutate(board: &mut Board, entry: &HistoryEntry, options: ApplyOptions) {
    match &entry.event {
        AppEvent::AddItem { item, .. } => {
            if board.items.contains_key(&item.id) {
                remove_item(board, &item.id);
            }
            insert_item(board, item.clone());
        }
        AppEvent::UpdateItem { item, .. } => {
            if let Some(existing) = board.items.get(&item.id) {
                let was_container = existing.is_container();
                let mut updated = item.clone();
                let wanted = std::mem::replace(
                    &mut updated.container_id,
                    existing.container_id.clone(),
                );
                if let (
                    ItemKind::Container { contains: kept, .. },
                    ItemKind::Container { contains, .. },
                ) = (&existing.kind, &mut updated.kind)
                {
                    *contains = kept.clone();
                }
                if was_container && !updated.is_container() {
                    release_children(board, &item.id);
                }
                board.items.insert(updated.id.clone(), updated);
                set_container(board, &item.id, wanted);
            }
        }
        AppEvent::MoveItem { item_id, x, y, .. } => {
            if let Some(item) = board.items.get_mut(item_id) {
                item.x = *x;
                item.y = *y;
            }
        }
        AppEvent::DeleteItem { item_id, .. } => {
            remove_item(board, item_id);
        }
        AppEvent::SetLock {
            item_id, locked, ..
        } => {
            if let Some(item) = board.items.get_mut(item_id) {
                item.locked = *locked;
            }
        }
        AppEvent::SetContainer {
            item_id,
            container_id,
            ..
        } => {
            if board.items.contains_key(item_id) {
                set_container(board, item_id, container_id.clone());
            }
        }
        AppEvent::AddConnection { connection, .. } => {
            let attached = [&connection.from, &connection.to]
                .into_iter()
                .filter_map(|end| end.item())
                .all(|id| board.items.contains_key(id));
            if attached {
                board
                    .connections
                    .insert(connection.id.clone(), connection.clone());
            }
        }
        AppEvent::DeleteConnection { connection_id, .. } => {
            board.connections.remove(connection_id);
        }
        AppEvent::RenameBoard { name, .. } => {
            board.name = name.clone();
        }
        AppEvent::SetAccessPolicy { policy, .. } => {
            if !options.preserve_access_policy {
                board.access_policy = policy.clone();
            }
        }
    }
    board.serial = entry.serial;
}

fn insert_item(board: &mut Board, mut item: Item) {
    let id = item.id.clone();
    let container = item.container_id.take();
    if let ItemKind::Container { contains, .. } = &mut item.kind {
        contains.retain(|child| board.items.contains_key(child));
    }
    let children: Vec<ItemId> = match &item.kind {
        ItemKind::Container { contains, .. } => contains.iter().cloned().collect(),
        _ => Vec::new(),
    };
    board.items.insert(id.clone(), item);
    for child in children {
        set_container(board, &child, Some(id.clone()));
    }
    set_container(board, &id, container);
}

fn remove_item(board: &mut Board, id: &ItemId) {
    let Some(item) = board.items.remove(id) else {
        return;
    };
    if let Some(parent) = &item.container_id {
        unlink_child(board, parent, id);
    }
    if item.is_container() {
        release_children(board, id);
    }
    board.connections.retain(|_, c| !c.touches(id));
}

/// Point `child` at `container`, keeping both sides of the relation in step.
/// A missing or non-container target, or the child itself, clears the link.
fn set_container(board: &mut Board, child: &ItemId, container: Option<ItemId>) {
    let container = container.filter(|c| {
        c != child && board.items.get(c).is_some_and(Item::is_container)
    });
    let previous = match board.items.get_mut(child) {
        Some(item) => std::mem::replace(&mut item.container_id, container.clone()),
        None => return,
    };
    if let Some(previous) = previous {
        unlink_child(board, &previous, child);
    }
    if let Some(container) = container
        && let Some(ItemKind::Container { contains, .. }) =
            board.items.get_mut(&container).map(|c| &mut c.kind)
    {
        contains.insert(child.clone());
    }
}

/// Clear the back-reference of every item pointing at `container`.
fn release_children(board: &mut Board, container: &ItemId) {
    for item in board.items.values_mut() {
        if item.container_id.as_ref() == Some(container) {
            item.container_id = None;
        }
    }
}

fn unlink_child(board: &mut Board, container: &ItemId, child: &ItemId) {
    if let Some(ItemKind::Container { contains, .. }) =
        board.items.get_mut(container).map(|c| &mut c.kind)
    {
        contains.remove(child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::BoardId;
    use crate::event::Actor;

    fn entry(serial: Serial, event: AppEvent) -> HistoryEntry {
        HistoryEntry::new(serial, Actor::anonymous("t"), event).at(0)
    }

    #[test]
    fn rejected_entry_leaves_board_untouched() {
        let id = BoardId::new("b");
        let mut board = Board::new(id.clone(), "b");
        let add = entry(
            3,
            AppEvent::AddItem {
                board_id: id,
                item: Item::note("a", "", 0.0, 0.0),
            },
        );
        let before = board.clone();
        assert!(apply(&mut board, &add, ApplyOptions::strict()).is_err());
        assert_eq!(board, before);
    }

    #[test]
    fn container_cannot_contain_itself() {
        let id = BoardId::new("b");
        let mut board = Board::new(id.clone(), "b");
        let mut c = Item::container("c", "", 0.0, 0.0, 10.0, 10.0);
        c.container_id = Some(ItemId::new("c"));
        apply(
            &mut board,
            &entry(1, AppEvent::AddItem { board_id: id, item: c }),
            ApplyOptions::strict(),
        )
        .unwrap();
        let c = board.item(&ItemId::new("c")).unwrap();
        assert_eq!(c.container_id, None);
        assert!(matches!(&c.kind, ItemKind::Container { contains, .. } if contains.is_empty()));
    }
}
