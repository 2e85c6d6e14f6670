mod common;

use boardfold::fold::{fold, fold_into};
use boardfold::{AccessPolicy, AppEvent};
use common::{add_note, board_id, lock_item, move_item};

#[test]
fn test_same_item_moves_collapse() {
    let queue = fold(&[move_item("a", 1.0, 1.0)], move_item("a", 2.0, 2.0));
    assert_eq!(queue, vec![move_item("a", 2.0, 2.0)]);
}

#[test]
fn test_replacement_keeps_position() {
    let queue = vec![
        move_item("a", 1.0, 1.0),
        move_item("b", 1.0, 1.0),
        move_item("c", 1.0, 1.0),
    ];
    let queue = fold(&queue, move_item("a", 9.0, 9.0));
    assert_eq!(
        queue,
        vec![
            move_item("a", 9.0, 9.0),
            move_item("b", 1.0, 1.0),
            move_item("c", 1.0, 1.0),
        ]
    );
}

#[test]
fn test_different_actions_on_same_item_do_not_fold() {
    let queue = fold(&[move_item("a", 1.0, 1.0)], lock_item("a", true));
    assert_eq!(queue, vec![move_item("a", 1.0, 1.0), lock_item("a", true)]);
}

#[test]
fn test_lock_requests_collapse() {
    let mut queue = Vec::new();
    fold_into(&mut queue, lock_item("a", true));
    fold_into(&mut queue, lock_item("a", false));
    assert_eq!(queue, vec![lock_item("a", false)]);
}

#[test]
fn test_adds_are_never_folded() {
    let mut queue = Vec::new();
    fold_into(&mut queue, add_note("a", 0.0, 0.0));
    fold_into(&mut queue, add_note("a", 0.0, 0.0));
    assert_eq!(queue.len(), 2);
}

#[test]
fn test_move_does_not_jump_ahead_of_lock() {
    // move a, lock a, move a: the second move must stay after the lock
    let mut queue = Vec::new();
    fold_into(&mut queue, move_item("a", 1.0, 1.0));
    fold_into(&mut queue, lock_item("a", true));
    fold_into(&mut queue, move_item("a", 2.0, 2.0));
    assert_eq!(
        queue,
        vec![
            move_item("a", 1.0, 1.0),
            lock_item("a", true),
            move_item("a", 2.0, 2.0),
        ]
    );
}

#[test]
fn test_access_policy_changes_collapse() {
    let set = |read: bool| AppEvent::SetAccessPolicy {
        board_id: board_id(),
        policy: Some(AccessPolicy {
            allow_public_read: read,
            ..AccessPolicy::default()
        }),
    };
    let queue = fold(&[set(true), move_item("a", 0.0, 0.0)], set(false));
    assert_eq!(queue, vec![set(false), move_item("a", 0.0, 0.0)]);
}

#[test]
fn test_fold_is_pure() {
    let queue = vec![move_item("a", 1.0, 1.0), move_item("b", 1.0, 1.0)];
    let first = fold(&queue, move_item("b", 3.0, 3.0));
    let second = fold(&queue, move_item("b", 3.0, 3.0));
    assert_eq!(first, second);
    assert_eq!(queue.len(), 2);
}
