//! Block signature tables and metadata digests.
//!
//! A [`FileSignature`] summarises one version of a file: a table of per-block
//! weak and strong checksums plus a digest of the file's metadata tuple. The
//! serialized form is what the signature cache persists between runs, and the
//! parsed form is what delta generation consumes. Equality of serialized
//! signatures is the engine's change-detection test, so the encoding must be
//! deterministic.

use std::io::Read;

use md5::{Digest, Md5};

use crate::error::DeltaError;

/// Length in bytes of a strong block digest (MD5).
pub(crate) const STRONG_LEN: usize = 16;

/// Length in bytes of the metadata digest folded into every signature.
pub const META_DIGEST_LEN: usize = 16;

/// Serialized header: block size, block count, tail length, metadata digest.
const HEADER_LEN: usize = 4 + 4 + 4 + META_DIGEST_LEN;

/// Serialized length of a single block descriptor.
const BLOCK_ENTRY_LEN: usize = 4 + STRONG_LEN;

/// Smallest block size the codec will choose.
const MIN_BLOCK_SIZE: u64 = 512;

/// Largest block size the codec will choose.
const MAX_BLOCK_SIZE: u64 = 2048;

/// Chooses the content block size for a file of `len` bytes.
///
/// Follows the square-root heuristic rsync uses so the signature grows with
/// the square root of the file size, rounded to a 64-byte multiple and
/// clamped to the codec's supported range.
#[must_use]
pub fn block_size_for(len: u64) -> u32 {
    len.isqrt()
        .next_multiple_of(64)
        .clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE) as u32
}

/// Digest of a path's metadata tuple.
///
/// The tuple `(mode, uid, gid, size, mtime)` is hashed in little-endian
/// order; symlinks additionally fold in their target bytes. For regular
/// files the digest lands in the signature header, so a metadata-only change
/// still produces a different signature. For directories, devices, and
/// fifos the digest *is* the whole signature.
#[must_use]
pub fn metadata_digest(
    mode: u32,
    uid: u32,
    gid: u32,
    size: u64,
    mtime: i64,
    link_target: Option<&[u8]>,
) -> [u8; META_DIGEST_LEN] {
    let mut hasher = Md5::new();
    hasher.update(mode.to_le_bytes());
    hasher.update(uid.to_le_bytes());
    hasher.update(gid.to_le_bytes());
    hasher.update(size.to_le_bytes());
    hasher.update(mtime.to_le_bytes());
    if let Some(target) = link_target {
        hasher.update(target);
    }
    hasher.finalize().into()
}

/// Weak and strong checksum of one content block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockSum {
    /// Packed rolling checksum of the block.
    pub weak: u32,
    /// MD5 digest of the block.
    pub strong: [u8; STRONG_LEN],
}

/// Signature of one version of a file's content and metadata.
///
/// # Examples
///
/// ```
/// use std::io::Cursor;
///
/// let data = b"some file content".to_vec();
/// let meta = delta::metadata_digest(0o100644, 0, 0, data.len() as u64, 0, None);
/// let sig = delta::FileSignature::generate(Cursor::new(&data), data.len() as u64, meta)
///     .unwrap();
/// let bytes = sig.to_bytes();
/// let parsed = delta::FileSignature::from_bytes(&bytes).unwrap();
/// assert_eq!(parsed.block_size(), sig.block_size());
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileSignature {
    block_size: u32,
    tail_len: u32,
    meta_digest: [u8; META_DIGEST_LEN],
    blocks: Vec<BlockSum>,
}

impl FileSignature {
    /// Consumes exactly `len` bytes of `reader` and builds the signature.
    ///
    /// The final block may be shorter than the block size; its real length
    /// is recorded in the header so delta generation can match it at end of
    /// stream.
    pub fn generate<R: Read>(
        mut reader: R,
        len: u64,
        meta_digest: [u8; META_DIGEST_LEN],
    ) -> Result<Self, DeltaError> {
        let block_size = block_size_for(len);
        let mut blocks = Vec::with_capacity(len.div_ceil(u64::from(block_size.max(1))) as usize);
        let mut buf = vec![0u8; block_size as usize];
        let mut remaining = len;
        let mut tail_len = 0u32;

        while remaining > 0 {
            let want = remaining.min(u64::from(block_size)) as usize;
            read_exact_or_eof(&mut reader, &mut buf[..want])?;
            let block = &buf[..want];
            blocks.push(BlockSum {
                weak: crate::rolling::RollingChecksum::checksum(block),
                strong: Md5::digest(block).into(),
            });
            tail_len = want as u32;
            remaining -= want as u64;
        }

        Ok(Self {
            block_size,
            tail_len,
            meta_digest,
            blocks,
        })
    }

    /// Block size the signature was generated with.
    #[must_use]
    pub const fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Length of the final block; zero when the signature covers no content.
    #[must_use]
    pub const fn tail_len(&self) -> u32 {
        self.tail_len
    }

    /// Per-block checksum table in content order.
    #[must_use]
    pub fn blocks(&self) -> &[BlockSum] {
        &self.blocks
    }

    /// Serializes the signature into the opaque byte form the cache stores.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.blocks.len() * BLOCK_ENTRY_LEN);
        out.extend_from_slice(&self.block_size.to_le_bytes());
        out.extend_from_slice(&(self.blocks.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.tail_len.to_le_bytes());
        out.extend_from_slice(&self.meta_digest);
        for block in &self.blocks {
            out.extend_from_slice(&block.weak.to_le_bytes());
            out.extend_from_slice(&block.strong);
        }
        out
    }

    /// Parses a signature previously produced by [`Self::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DeltaError> {
        if bytes.len() < HEADER_LEN {
            return Err(DeltaError::TruncatedSignature {
                expected: HEADER_LEN,
                found: bytes.len(),
            });
        }
        let block_size = read_u32(bytes, 0);
        let block_count = read_u32(bytes, 4);
        let tail_len = read_u32(bytes, 8);
        let mut meta_digest = [0u8; META_DIGEST_LEN];
        meta_digest.copy_from_slice(&bytes[12..HEADER_LEN]);

        if block_size == 0 {
            return Err(DeltaError::CorruptSignature("zero block size"));
        }
        if tail_len > block_size {
            return Err(DeltaError::CorruptSignature("tail longer than block size"));
        }

        let expected = HEADER_LEN + block_count as usize * BLOCK_ENTRY_LEN;
        if bytes.len() != expected {
            return Err(DeltaError::TruncatedSignature {
                expected,
                found: bytes.len(),
            });
        }

        let mut blocks = Vec::with_capacity(block_count as usize);
        let mut cursor = HEADER_LEN;
        for _ in 0..block_count {
            let weak = read_u32(bytes, cursor);
            let mut strong = [0u8; STRONG_LEN];
            strong.copy_from_slice(&bytes[cursor + 4..cursor + BLOCK_ENTRY_LEN]);
            blocks.push(BlockSum { weak, strong });
            cursor += BLOCK_ENTRY_LEN;
        }

        Ok(Self {
            block_size,
            tail_len,
            meta_digest,
            blocks,
        })
    }
}

/// Reads a little-endian `u32` from a slice already checked to be long enough.
#[inline]
fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Reads exactly `buf.len()` bytes, mapping a short read to an error.
///
/// The signature walk trusts the size reported by the caller; a file that
/// shrinks mid-read is surfaced as an I/O error rather than silently
/// producing a signature for different content.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), DeltaError> {
    reader.read_exact(buf).map_err(DeltaError::from)
}
