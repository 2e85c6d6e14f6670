//! Directory-backed [`EventLogStore`].
//!
//! Layout, one directory per board:
//!
//! ```text
//! <root>/boards/<board_id>/
//!     snapshot.json       latest snapshot, replaced atomically
//!     bundles.jsonl       active bundles, one "<xxh64> <json>" line each
//!     archive.jsonl.zst   superseded bundles, one zstd frame per compaction
//!     board.lock          advisory lock serializing appends
//! ```

use crate::archive;
use crate::board::{Board, BoardId};
use crate::error::{Error, Result};
use crate::event::{HistoryEntry, Serial};
use crate::snapshot;
use crate::store::{self, BundleStream, EventBundle, EventLogStore, SnapshotRecord};
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const SNAPSHOT_FILE: &str = "snapshot.json";
const BUNDLES_FILE: &str = "bundles.jsonl";
const ARCHIVE_FILE: &str = "archive.jsonl.zst";
const LOCK_FILE: &str = "board.lock";

/// Checksum written in front of every bundle line: the xxh64 of its JSON
/// payload as 16 hex digits.
pub fn line_hash(payload: &[u8]) -> String {
    format!("{:016x}", xxhash_rust::xxh64::xxh64(payload, 0))
}

/// How appends to one board are serialized across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// Hold an exclusive `flock` on `board.lock` for each append and
    /// compaction. Blocks until other writers release it.
    #[default]
    Flock,
    /// In-process locking only. For stores owned by exactly one process.
    None,
}

/// Builder for [`FileStore`].
///
/// # Examples
///
/// ```no_run
/// use boardfold::{FileStore, LockMode};
///
/// let store = FileStore::builder("./data")
///     .lock_mode(LockMode::Flock)
///     .archive_superseded(true)
///     .open()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct FileStoreBuilder {
    root: PathBuf,
    lock_mode: LockMode,
    archive_superseded: bool,
}

impl FileStoreBuilder {
    pub fn lock_mode(mut self, mode: LockMode) -> Self {
        self.lock_mode = mode;
        self
    }

    /// Move bundles older than a freshly written snapshot into the
    /// compressed archive. The newest bundle always stays active.
    pub fn archive_superseded(mut self, enabled: bool) -> Self {
        self.archive_superseded = enabled;
        self
    }

    /// Create the root and `boards/` directories if needed and open the store.
    pub fn open(self) -> Result<FileStore> {
        let boards_dir = self.root.join("boards");
        fs::create_dir_all(&boards_dir)?;
        Ok(FileStore {
            boards_dir,
            lock_mode: self.lock_mode,
            archive_superseded: self.archive_superseded,
            gates: Mutex::new(HashMap::new()),
        })
    }
}

/// Event log persisted as plain files.
#[derive(Debug)]
pub struct FileStore {
    boards_dir: PathBuf,
    lock_mode: LockMode,
    archive_superseded: bool,
    gates: Mutex<HashMap<BoardId, Arc<Mutex<()>>>>,
}

impl FileStore {
    /// Open with defaults: `flock` locking, no archiving.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        FileStore::builder(root).open()
    }

    pub fn builder(root: impl AsRef<Path>) -> FileStoreBuilder {
        FileStoreBuilder {
            root: root.as_ref().to_path_buf(),
            lock_mode: LockMode::default(),
            archive_superseded: false,
        }
    }

    /// Directory holding the files of one board.
    pub fn board_dir(&self, board_id: &BoardId) -> Result<PathBuf> {
        let id = board_id.as_str();
        let valid = !id.is_empty()
            && id != "."
            && id != ".."
            && !id.contains(['/', '\\', '\0']);
        if !valid {
            return Err(Error::InvalidBoardId(id.to_string()));
        }
        Ok(self.boards_dir.join(id))
    }

    /// Run `f` holding the board's in-process gate and, per [`LockMode`],
    /// its file lock. Both are released on every exit path.
    fn exclusive<T>(
        &self,
        board_id: &BoardId,
        dir: &Path,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let gate = {
            let mut gates = self
                .gates
                .lock()
                .map_err(|_| Error::Poisoned(board_id.to_string()))?;
            Arc::clone(gates.entry(board_id.clone()).or_default())
        };
        let _gate = gate.lock().map_err(|_| Error::Poisoned(board_id.to_string()))?;
        let _flock = BoardLock::acquire(dir, self.lock_mode)?;
        f()
    }

    fn require_board(&self, board_id: &BoardId) -> Result<PathBuf> {
        let dir = self.board_dir(board_id)?;
        if !dir.join(SNAPSHOT_FILE).exists() {
            return Err(Error::UnknownBoard(board_id.clone()));
        }
        Ok(dir)
    }

    /// Move active bundles wholly below `serial` into the archive.
    fn archive_below(&self, board_id: &BoardId, dir: &Path, serial: Serial) -> Result<()> {
        let active_path = dir.join(BUNDLES_FILE);
        let mut lines = Vec::new();
        for line in ActiveLines::open(&active_path)?.into_iter().flatten() {
            let line = line?;
            let bundle = decode_line(board_id, &line)?;
            lines.push((bundle.last_serial, line));
        }

        // the newest bundle stays active so the tail is always readable
        let keep_from = lines
            .iter()
            .position(|(last, _)| *last >= serial)
            .unwrap_or(lines.len())
            .min(lines.len().saturating_sub(1));
        if keep_from == 0 {
            return Ok(());
        }

        let (archived, kept) = lines.split_at(keep_from);
        let archived: Vec<String> = archived.iter().map(|(_, l)| l.clone()).collect();
        archive::append_frame(&dir.join(ARCHIVE_FILE), &archived)?;

        let tmp_path = active_path.with_extension("jsonl.tmp");
        let mut file = File::create(&tmp_path)?;
        for (_, line) in kept {
            writeln!(file, "{line}")?;
        }
        file.sync_data()?;
        drop(file);
        fs::rename(&tmp_path, &active_path)?;

        log::info!(
            "boardfold: board '{board_id}': archived {} bundle(s) below serial {serial}",
            archived.len()
        );
        Ok(())
    }
}

impl EventLogStore for FileStore {
    fn create_board(&self, record: &SnapshotRecord) -> Result<()> {
        let board_id = &record.board_id;
        let dir = self.board_dir(board_id)?;
        fs::create_dir_all(&dir)?;
        self.exclusive(board_id, &dir, || {
            let path = dir.join(SNAPSHOT_FILE);
            if path.exists() {
                return Err(Error::BoardExists(board_id.clone()));
            }
            snapshot::save(&path, record)?;
            log::info!("boardfold: created board '{board_id}'");
            Ok(())
        })
    }

    fn append_bundle(&self, board_id: &BoardId, entries: &[HistoryEntry]) -> Result<()> {
        let dir = self.require_board(board_id)?;
        self.exclusive(board_id, &dir, || {
            let path = dir.join(BUNDLES_FILE);
            let snapshot_serial = read_snapshot_serial(&dir, board_id)?;
            let tail = match repair_tail(&path)? {
                Some(line) => decode_line(board_id, &line)?.last_serial.max(snapshot_serial),
                None => snapshot_serial,
            };
            let bundle = store::next_bundle(board_id, tail, entries)?;
            let line = encode_line(&bundle)?;

            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            file.write_all(line.as_bytes())?;
            file.sync_data()?;
            log::debug!(
                "boardfold: board '{board_id}': appended serials {}..={}",
                bundle.first_serial,
                bundle.last_serial
            );
            Ok(())
        })
    }

    fn stream_bundles(
        &self,
        board_id: &BoardId,
        after_serial: Serial,
    ) -> Result<BundleStream<'_>> {
        let dir = self.require_board(board_id)?;
        let active = ActiveLines::open(&dir.join(BUNDLES_FILE))?;

        let active_floor = match first_complete_line(&dir.join(BUNDLES_FILE))? {
            Some(line) => Some(decode_line(board_id, &line)?.first_serial),
            None => None,
        };
        let archive = match active_floor {
            Some(floor) if after_serial >= floor => None,
            _ => archive::lines(&dir.join(ARCHIVE_FILE))?,
        };

        Ok(Box::new(BundleLines {
            board_id: board_id.clone(),
            after_serial,
            archive,
            archived_through: 0,
            active,
        }))
    }

    fn read_snapshot(&self, board_id: &BoardId) -> Result<SnapshotRecord> {
        let dir = self.board_dir(board_id)?;
        snapshot::load(&dir.join(SNAPSHOT_FILE))?
            .ok_or_else(|| Error::UnknownBoard(board_id.clone()))
    }

    fn write_snapshot(&self, board_id: &BoardId, board: &Board) -> Result<()> {
        let dir = self.require_board(board_id)?;
        self.exclusive(board_id, &dir, || {
            snapshot::save(&dir.join(SNAPSHOT_FILE), &SnapshotRecord::of(board))?;
            log::info!(
                "boardfold: board '{board_id}': snapshot written at serial {}",
                board.serial
            );
            if self.archive_superseded {
                self.archive_below(board_id, &dir, board.serial)?;
            }
            Ok(())
        })
    }

    fn tail_serial(&self, board_id: &BoardId) -> Result<Serial> {
        let dir = self.require_board(board_id)?;
        let snapshot_serial = read_snapshot_serial(&dir, board_id)?;
        match last_complete_line(&dir.join(BUNDLES_FILE))? {
            Some((line, _)) => {
                let last = decode_line(board_id, &line)?.last_serial;
                Ok(last.max(snapshot_serial))
            }
            None => Ok(snapshot_serial),
        }
    }
}

fn read_snapshot_serial(dir: &Path, board_id: &BoardId) -> Result<Serial> {
    snapshot::load(&dir.join(SNAPSHOT_FILE))?
        .map(|s| s.serial)
        .ok_or_else(|| Error::UnknownBoard(board_id.clone()))
}

struct BoardLock(Option<File>);

impl BoardLock {
    fn acquire(dir: &Path, mode: LockMode) -> io::Result<Self> {
        match mode {
            LockMode::None => Ok(BoardLock(None)),
            LockMode::Flock => {
                let file = OpenOptions::new()
                    .create(true)
                    .truncate(false)
                    .write(true)
                    .open(dir.join(LOCK_FILE))?;
                FileExt::lock_exclusive(&file)?;
                Ok(BoardLock(Some(file)))
            }
        }
    }
}

impl Drop for BoardLock {
    fn drop(&mut self) {
        if let Some(file) = &self.0 {
            let _ = FileExt::unlock(file);
        }
    }
}

fn encode_line(bundle: &EventBundle) -> Result<String> {
    let json = serde_json::to_string(bundle)?;
    Ok(format!("{} {json}\n", line_hash(json.as_bytes())))
}

fn decode_line(board_id: &BoardId, line: &str) -> Result<EventBundle> {
    let corrupt = |detail: String| Error::Corrupt {
        board_id: board_id.clone(),
        detail,
    };
    let (hash, json) = line
        .split_once(' ')
        .ok_or_else(|| corrupt("missing checksum".to_string()))?;
    let actual = line_hash(json.as_bytes());
    if actual != hash {
        return Err(corrupt(format!("checksum {hash} does not match {actual}")));
    }
    let bundle: EventBundle = serde_json::from_str(json)?;
    if &bundle.board_id != board_id || !bundle.is_well_formed() {
        return Err(corrupt(format!(
            "bundle {}..={} does not match its entries",
            bundle.first_serial, bundle.last_serial
        )));
    }
    Ok(bundle)
}

/// Complete lines of the active bundle file, as seen when it was opened.
///
/// A trailing line without a newline is a write interrupted by a crash and is
/// not yielded.
struct ActiveLines {
    reader: BufReader<File>,
    pos: u64,
    file_len: u64,
}

impl ActiveLines {
    fn open(path: &Path) -> io::Result<Option<Self>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let file_len = file.metadata()?.len();
        Ok(Some(ActiveLines {
            reader: BufReader::new(file),
            pos: 0,
            file_len,
        }))
    }
}

impl Iterator for ActiveLines {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.pos >= self.file_len {
                return None;
            }
            let mut line = String::new();
            let read = match self.reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(n) => n as u64,
                Err(e) => return Some(Err(e)),
            };
            if !line.ends_with('\n') || self.pos + read > self.file_len {
                return None;
            }
            self.pos += read;
            line.pop();
            if line.is_empty() {
                continue;
            }
            return Some(Ok(line));
        }
    }
}

struct BundleLines {
    board_id: BoardId,
    after_serial: Serial,
    archive: Option<archive::ArchiveLines>,
    archived_through: Serial,
    active: Option<ActiveLines>,
}

impl BundleLines {
    fn next_line(&mut self) -> Option<(bool, io::Result<String>)> {
        if let Some(archive) = &mut self.archive {
            match archive.next() {
                Some(line) => return Some((true, line)),
                None => self.archive = None,
            }
        }
        self.active.as_mut()?.next().map(|line| (false, line))
    }
}

impl Iterator for BundleLines {
    type Item = Result<EventBundle>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (from_archive, line) = self.next_line()?;
            let line = match line {
                Ok(line) if line.is_empty() => continue,
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            let bundle = match decode_line(&self.board_id, &line) {
                Ok(bundle) => bundle,
                Err(e) => return Some(Err(e)),
            };
            if from_archive {
                self.archived_through = self.archived_through.max(bundle.last_serial);
            } else if bundle.last_serial <= self.archived_through {
                // archived but not yet removed from the active file
                log::debug!(
                    "boardfold: board '{}': skipping active bundle {}..={} already archived",
                    self.board_id,
                    bundle.first_serial,
                    bundle.last_serial
                );
                continue;
            }
            if bundle.last_serial >= self.after_serial {
                return Some(Ok(bundle));
            }
        }
    }
}

fn first_complete_line(path: &Path) -> io::Result<Option<String>> {
    ActiveLines::open(path)?
        .and_then(|mut lines| lines.next())
        .transpose()
}

/// The last complete line of the file, and the byte length up to and
/// including its newline.
fn last_complete_line(path: &Path) -> io::Result<Option<(String, u64)>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let len = file.metadata()?.len();

    let mut buf: Vec<u8> = Vec::new();
    let mut pos = len;
    while pos > 0 {
        let step = pos.min(8192);
        pos -= step;
        let mut chunk = vec![0u8; step as usize];
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(&mut chunk)?;
        chunk.extend_from_slice(&buf);
        buf = chunk;

        let Some(end) = buf.iter().rposition(|&b| b == b'\n') else {
            continue;
        };
        let start = match buf[..end].iter().rposition(|&b| b == b'\n') {
            Some(nl) => nl + 1,
            None if pos == 0 => 0,
            None => continue,
        };
        let line = String::from_utf8(buf[start..end].to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        return Ok(Some((line, pos + end as u64 + 1)));
    }
    Ok(None)
}

/// Drop a partial trailing line left by an interrupted append and return the
/// last complete line. Must be called with the board lock held.
fn repair_tail(path: &Path) -> io::Result<Option<String>> {
    let len = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let last = last_complete_line(path)?;
    let valid_len = last.as_ref().map_or(0, |(_, end)| *end);
    if valid_len < len {
        log::warn!(
            "boardfold: truncating {} partial byte(s) at end of {}",
            len - valid_len,
            path.display()
        );
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(valid_len)?;
        file.sync_data()?;
    }
    Ok(last.map(|(line, _)| line))
}
