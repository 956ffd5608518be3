//! Record metadata and the record header wire encoding.

use std::io::{Read, Write};

use crate::error::SnapshotError;

/// Upper bound on an encoded path, as a corruption guard while reading.
const MAX_PATH_LEN: u32 = 64 * 1024;

/// What a record's payload means.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum RecordKind {
    /// Metadata only: directory, device, fifo, or attribute change.
    Meta = 0,
    /// Full content: new regular file or new symlink target.
    Full = 1,
    /// Delta against the previous generation's content.
    Delta = 2,
    /// Path was deleted since the last generation.
    Tombstone = 3,
}

impl RecordKind {
    fn from_wire(value: u8) -> Result<Self, SnapshotError> {
        match value {
            0 => Ok(Self::Meta),
            1 => Ok(Self::Full),
            2 => Ok(Self::Delta),
            3 => Ok(Self::Tombstone),
            _ => Err(SnapshotError::Corrupt("unknown record kind")),
        }
    }
}

/// Per-path attributes carried by every record.
///
/// Paths are raw bytes as produced by the walker; POSIX mode semantics
/// (file-type bits plus permissions). A record with every numeric field
/// zero is a tombstone.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Metadata {
    /// Absolute path.
    pub path: Vec<u8>,
    /// File type and permission bits.
    pub mode: u32,
    /// Owner uid.
    pub uid: u32,
    /// Owner gid.
    pub gid: u32,
    /// Modification time, unix seconds.
    pub mtime: i64,
    /// Content size; zero for non-regular entries and tombstones.
    pub size: u64,
}

impl Metadata {
    /// Builds the all-zero metadata of a tombstone for `path`.
    #[must_use]
    pub fn tombstone(path: Vec<u8>) -> Self {
        Self {
            path,
            mode: 0,
            uid: 0,
            gid: 0,
            mtime: 0,
            size: 0,
        }
    }

    /// Permission bits without the file-type portion.
    #[must_use]
    pub const fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

/// Writes one record header.
pub(crate) fn write_header<W: Write>(
    out: &mut W,
    meta: &Metadata,
    kind: RecordKind,
    payload_len: u64,
) -> Result<(), SnapshotError> {
    let path_len =
        u32::try_from(meta.path.len()).map_err(|_| SnapshotError::Corrupt("path too long"))?;
    out.write_all(&path_len.to_le_bytes())?;
    out.write_all(&meta.path)?;
    out.write_all(&meta.mode.to_le_bytes())?;
    out.write_all(&meta.uid.to_le_bytes())?;
    out.write_all(&meta.gid.to_le_bytes())?;
    out.write_all(&meta.mtime.to_le_bytes())?;
    out.write_all(&meta.size.to_le_bytes())?;
    out.write_all(&[kind as u8])?;
    out.write_all(&payload_len.to_le_bytes())?;
    Ok(())
}

/// Reads one record header; clean EOF before the first byte yields `None`.
pub(crate) fn read_header<R: Read>(
    reader: &mut R,
) -> Result<Option<(Metadata, RecordKind, u64)>, SnapshotError> {
    let path_len = match read_u32_or_eof(reader)? {
        Some(len) => len,
        None => return Ok(None),
    };
    if path_len > MAX_PATH_LEN {
        return Err(SnapshotError::Corrupt("path length out of range"));
    }
    let mut path = vec![0u8; path_len as usize];
    reader.read_exact(&mut path)?;

    let mode = read_u32(reader)?;
    let uid = read_u32(reader)?;
    let gid = read_u32(reader)?;
    let mtime = read_i64(reader)?;
    let size = read_u64(reader)?;
    let mut kind = [0u8; 1];
    reader.read_exact(&mut kind)?;
    let kind = RecordKind::from_wire(kind[0])?;
    let payload_len = read_u64(reader)?;

    Ok(Some((
        Metadata {
            path,
            mode,
            uid,
            gid,
            mtime,
            size,
        },
        kind,
        payload_len,
    )))
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32, SnapshotError> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64, SnapshotError> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

fn read_i64<R: Read>(reader: &mut R) -> Result<i64, SnapshotError> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(i64::from_le_bytes(bytes))
}

fn read_u32_or_eof<R: Read>(reader: &mut R) -> Result<Option<u32>, SnapshotError> {
    let mut bytes = [0u8; 4];
    let mut filled = 0;
    while filled < bytes.len() {
        match reader.read(&mut bytes[filled..])? {
            0 if filled == 0 => return Ok(None),
            0 => return Err(SnapshotError::Corrupt("record header cut short")),
            n => filled += n,
        }
    }
    Ok(Some(u32::from_le_bytes(bytes)))
}
