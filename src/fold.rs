//! Folding of queued, not yet transmitted events.

use crate::event::AppEvent;

/// Fold `event` into `queue`, returning the new queue.
///
/// If a queued event has the same board and fold key as `event` (two moves
/// of one item, two lock requests on one item, two renames of the board),
/// it is replaced in place by `event`. Otherwise `event` is appended.
///
/// The search runs from the newest queued event backwards and stops at the
/// first event that touches one of the same entities with a different
/// action, so a replacement never moves an event across one it depends on.
///
/// # Examples
///
/// ```
/// use boardfold::fold::fold;
/// use boardfold::{AppEvent, BoardId, ItemId};
///
/// let mv = |x: f64| AppEvent::MoveItem {
///     board_id: BoardId::new("b"),
///     item_id: ItemId::new("a"),
///     x,
///     y: x,
/// };
/// let queue = fold(&[mv(1.0)], mv(2.0));
/// assert_eq!(queue, vec![mv(2.0)]);
/// ```
pub fn fold(queue: &[AppEvent], event: AppEvent) -> Vec<AppEvent> {
    let mut out = queue.to_vec();
    fold_into(&mut out, event);
    out
}

/// In-place form of [`fold`].
pub fn fold_into(queue: &mut Vec<AppEvent>, event: AppEvent) {
    match foldable_position(queue, &event) {
        Some(pos) => queue[pos] = event,
        None => queue.push(event),
    }
}

fn foldable_position(queue: &[AppEvent], event: &AppEvent) -> Option<usize> {
    let key = event.fold_key()?;
    for (pos, queued) in queue.iter().enumerate().rev() {
        if queued.board_id() == event.board_id() && queued.fold_key().as_ref() == Some(&key) {
            return Some(pos);
        }
        if queued.overlaps(event) {
            return None;
        }
    }
    None
}
