mod common;

use boardfold::{
    BoardId, BoardLoader, Error, EventLogStore, FileStore, LoaderConfig, LockMode, line_hash,
};
use common::{board_id, empty_snapshot, numbered};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

fn bundles_path(dir: &std::path::Path) -> std::path::PathBuf {
    dir.join("boards").join("retro").join("bundles.jsonl")
}

#[test]
fn test_create_append_reopen() {
    let dir = tempdir().unwrap();
    {
        let store = FileStore::open(dir.path()).unwrap();
        store.create_board(&empty_snapshot()).unwrap();
        store.append_bundle(&board_id(), &[numbered(1), numbered(2)]).unwrap();
        store.append_bundle(&board_id(), &[numbered(3)]).unwrap();
    }

    let store = FileStore::open(dir.path()).unwrap();
    assert_eq!(store.tail_serial(&board_id()).unwrap(), 3);
    let bundles: Vec<_> = store
        .stream_bundles(&board_id(), 0)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(bundles.len(), 2);
    assert_eq!(bundles[0].entries, vec![numbered(1), numbered(2)]);
    assert_eq!(bundles[1].first_serial, 3);

    let board = BoardLoader::new(&store).load(&board_id()).unwrap();
    assert_eq!(board.serial, 3);
    assert_eq!(board.items.len(), 3);
}

#[test]
fn test_lines_carry_checksum() {
    let dir = tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    store.create_board(&empty_snapshot()).unwrap();
    store.append_bundle(&board_id(), &[numbered(1)]).unwrap();

    let contents = fs::read_to_string(bundles_path(dir.path())).unwrap();
    let line = contents.lines().next().unwrap();
    let (hash, json) = line.split_once(' ').unwrap();
    assert_eq!(hash, line_hash(json.as_bytes()));
}

#[test]
fn test_create_twice_and_unknown_board() {
    let dir = tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    store.create_board(&empty_snapshot()).unwrap();
    assert!(matches!(
        store.create_board(&empty_snapshot()),
        Err(Error::BoardExists(_))
    ));
    assert!(matches!(
        store.read_snapshot(&BoardId::new("nope")),
        Err(Error::UnknownBoard(_))
    ));
    assert!(matches!(
        store.append_bundle(&BoardId::new("nope"), &[numbered(1)]),
        Err(Error::UnknownBoard(_))
    ));
}

#[test]
fn test_invalid_board_ids() {
    let dir = tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    for bad in ["", ".", "..", "a/b", "a\\b"] {
        assert!(
            matches!(
                store.board_dir(&BoardId::new(bad)),
                Err(Error::InvalidBoardId(_))
            ),
            "{bad:?} accepted"
        );
    }
}

#[test]
fn test_non_contiguous_append_rejected() {
    let dir = tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    store.create_board(&empty_snapshot()).unwrap();
    store.append_bundle(&board_id(), &[numbered(1)]).unwrap();

    let err = store.append_bundle(&board_id(), &[numbered(3)]).unwrap_err();
    assert!(matches!(err, Error::NonContiguousAppend { tail: 1, first: 3, .. }));
    assert_eq!(store.tail_serial(&board_id()).unwrap(), 1);
}

#[test]
fn test_partial_trailing_line_is_ignored_then_repaired() {
    let dir = tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    store.create_board(&empty_snapshot()).unwrap();
    store.append_bundle(&board_id(), &[numbered(1)]).unwrap();

    // interrupted write
    let mut file = OpenOptions::new()
        .append(true)
        .open(bundles_path(dir.path()))
        .unwrap();
    file.write_all(b"0123456789abcdef {\"board_id\":\"ret").unwrap();
    drop(file);

    assert_eq!(store.tail_serial(&board_id()).unwrap(), 1);
    assert_eq!(store.stream_bundles(&board_id(), 0).unwrap().count(), 1);

    store.append_bundle(&board_id(), &[numbered(2)]).unwrap();
    let contents = fs::read_to_string(bundles_path(dir.path())).unwrap();
    assert_eq!(contents.lines().count(), 2);
    assert!(contents.ends_with('\n'));

    let board = BoardLoader::new(&store).load(&board_id()).unwrap();
    assert_eq!(board.serial, 2);
}

#[test]
fn test_checksum_mismatch_is_corruption() {
    let dir = tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    store.create_board(&empty_snapshot()).unwrap();
    store.append_bundle(&board_id(), &[numbered(1)]).unwrap();

    let path = bundles_path(dir.path());
    let contents = fs::read_to_string(&path).unwrap();
    let tampered = contents.replacen("\"n1\"", "\"n9\"", 1);
    assert_ne!(contents, tampered);
    fs::write(&path, tampered).unwrap();

    let err = BoardLoader::new(&store).load(&board_id()).unwrap_err();
    assert!(matches!(err, Error::Corrupt { .. }));
}

#[test]
fn test_snapshot_survives_reopen() {
    let dir = tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    store.create_board(&empty_snapshot()).unwrap();
    for s in 1..=4 {
        store.append_bundle(&board_id(), &[numbered(s)]).unwrap();
    }
    let loader = BoardLoader::with_config(
        &store,
        LoaderConfig {
            compaction_threshold: 2,
        },
    );
    let board = loader.load(&board_id()).unwrap();
    drop(store);

    let store = FileStore::open(dir.path()).unwrap();
    let snapshot = store.read_snapshot(&board_id()).unwrap();
    assert_eq!(snapshot.serial, 4);
    assert_eq!(snapshot.name, "Retro");
    assert_eq!(snapshot.content, board);
}

#[test]
fn test_archived_history_still_replays() {
    let dir = tempdir().unwrap();
    let store = FileStore::builder(dir.path())
        .archive_superseded(true)
        .open()
        .unwrap();
    store.create_board(&empty_snapshot()).unwrap();
    for s in 1..=5 {
        store.append_bundle(&board_id(), &[numbered(s)]).unwrap();
    }

    let full = BoardLoader::new(&store).load(&board_id()).unwrap();
    store.write_snapshot(&board_id(), &full).unwrap();

    let board_dir = dir.path().join("boards").join("retro");
    assert!(board_dir.join("archive.jsonl.zst").exists());
    let active = fs::read_to_string(board_dir.join("bundles.jsonl")).unwrap();
    assert_eq!(active.lines().count(), 1);

    // full history is still available for a rebuild
    let all: Vec<u64> = store
        .stream_bundles(&board_id(), 0)
        .unwrap()
        .map(|b| b.unwrap().last_serial)
        .collect();
    assert_eq!(all, vec![1, 2, 3, 4, 5]);

    store.append_bundle(&board_id(), &[numbered(6)]).unwrap();
    let recent: Vec<u64> = store
        .stream_bundles(&board_id(), 5)
        .unwrap()
        .map(|b| b.unwrap().last_serial)
        .collect();
    assert_eq!(recent, vec![5, 6]);

    let board = BoardLoader::new(&store).load(&board_id()).unwrap();
    assert_eq!(board.serial, 6);
    assert_eq!(board.items.len(), 6);
}

#[test]
fn test_concurrent_appends_never_interleave() {
    let dir = tempdir().unwrap();
    let store = Arc::new(
        FileStore::builder(dir.path())
            .lock_mode(LockMode::None)
            .open()
            .unwrap(),
    );
    store.create_board(&empty_snapshot()).unwrap();

    // every writer retries from the tail it reads until its append lands
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..5 {
                    loop {
                        let tail = store.tail_serial(&board_id()).unwrap();
                        match store.append_bundle(&board_id(), &[numbered(tail + 1)]) {
                            Ok(()) => break,
                            Err(Error::NonContiguousAppend { .. }) => continue,
                            Err(e) => panic!("append failed: {e}"),
                        }
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.tail_serial(&board_id()).unwrap(), 20);
    let board = BoardLoader::new(&*store).load(&board_id()).unwrap();
    assert_eq!(board.serial, 20);
}
