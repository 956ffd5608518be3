//! Human-readable record-by-record dump of one snapshot file.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use envelope::SecretKey;
use snapshot::{RecordKind, SnapshotReader};

use crate::error::EngineError;

/// Decrypts `file` and writes one line per record to `out`.
///
/// Payload bytes are summarised by length rather than dumped raw; the one
/// exception is a symlink's target, which is short and meaningful to a
/// human reader.
pub fn cat<W: Write>(secret: &SecretKey, file: &Path, out: &mut W) -> Result<(), EngineError> {
    let mut reader = SnapshotReader::open(File::open(file)?, secret)?;
    let header = reader.header().clone();
    writeln!(
        out,
        "snapshot host={} base_timestamp={} increment={} format={}",
        header.hostname, header.base_timestamp, header.increment, header.format_version
    )?;

    while let Some(record) = reader.next_record()? {
        let kind = match record.kind {
            RecordKind::Meta => "meta",
            RecordKind::Full => "full",
            RecordKind::Delta => "delta",
            RecordKind::Tombstone => "tombstone",
        };
        let path = String::from_utf8_lossy(&record.meta.path).into_owned();
        write!(
            out,
            "{kind:<9} mode={:06o} uid={} gid={} mtime={} size={} payload={}",
            record.meta.mode,
            record.meta.uid,
            record.meta.gid,
            record.meta.mtime,
            record.meta.size,
            record.payload_len,
        )?;
        if record.kind == RecordKind::Full && is_symlink(record.meta.mode) {
            let target = reader.payload_bytes()?;
            write!(out, " target={}", String::from_utf8_lossy(&target))?;
        }
        writeln!(out, " {path}")?;
    }
    Ok(())
}

fn is_symlink(mode: u32) -> bool {
    mode & u32::from(libc::S_IFMT) == u32::from(libc::S_IFLNK)
}
