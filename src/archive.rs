//! Superseded bundle lines, kept as concatenated zstd frames.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

const LEVEL: i32 = 3;

pub(crate) type ArchiveLines = io::Lines<BufReader<zstd::Decoder<'static, BufReader<File>>>>;

/// Append `lines` as one new frame. An empty slice writes nothing.
pub(crate) fn append_frame(path: &Path, lines: &[String]) -> io::Result<()> {
    if lines.is_empty() {
        return Ok(());
    }
    let mut frame = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        frame.push_str(line);
        frame.push('\n');
    }
    let compressed = zstd::encode_all(frame.as_bytes(), LEVEL)?;

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&compressed)?;
    file.sync_data()
}

/// Every archived line, oldest first, across all frames. `None` if nothing
/// has been archived yet.
pub(crate) fn lines(path: &Path) -> io::Result<Option<ArchiveLines>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let decoder = zstd::Decoder::new(file)?;
    Ok(Some(BufReader::new(decoder).lines()))
}
