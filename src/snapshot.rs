//! On-disk persistence of [`SnapshotRecord`]s.

use crate::store::SnapshotRecord;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Save a snapshot atomically.
///
/// Writes to a `.tmp` file first, syncs, then renames over the final path.
/// If the process crashes mid-write the previous snapshot survives intact,
/// which is safe: the loader reconciles a lagging snapshot from the bundles.
pub(crate) fn save(path: &Path, snapshot: &SnapshotRecord) -> io::Result<()> {
    let tmp_path = path.with_extension("json.tmp");

    let json = serde_json::to_vec_pretty(snapshot)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(&json)?;
    file.sync_data()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Load a snapshot.
///
/// Returns `Ok(None)` if the file doesn't exist. A snapshot that fails to
/// parse is an error: without it the board's name and access policy are
/// unknown, so it cannot be silently rebuilt.
pub(crate) fn load(path: &Path) -> io::Result<Option<SnapshotRecord>> {
    let contents = match fs::read(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    serde_json::from_slice(&contents)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
