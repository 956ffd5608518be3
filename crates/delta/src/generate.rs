//! Delta generation: scan new content against an old block signature.
//!
//! The generator keeps a sliding window of one block over the new content.
//! Whenever the weak rolling checksum of the window matches a block of the
//! old signature, the match is verified with the strong digest and emitted
//! as a copy reference; otherwise the window slides one byte and the byte
//! left behind becomes part of a pending literal run. Memory use is bounded
//! by the window plus one read chunk; consumed literals are flushed and the
//! buffer compacted as the scan advances.

use std::io::{Read, Write};

use md5::{Digest, Md5};
use rustc_hash::FxHashMap;

use crate::error::DeltaError;
use crate::rolling::RollingChecksum;
use crate::signature::{FileSignature, STRONG_LEN};

/// Op tag for a literal run: `0x00 | len: u32 | bytes`.
pub(crate) const OP_LITERAL: u8 = 0x00;

/// Op tag for a block copy: `0x01 | block_index: u32 | len: u32`.
pub(crate) const OP_COPY: u8 = 0x01;

/// Read granularity while scanning new content.
const READ_CHUNK: usize = 64 * 1024;

/// Pending literals are flushed once the consumed prefix grows past this.
const COMPACT_THRESHOLD: usize = 256 * 1024;

/// Streams `len` bytes of `reader` and writes a delta against `sig` to `out`.
///
/// The delta reconstructs the new content when replayed against the old
/// content by [`crate::apply_delta`]. Output is a compact sequence of
/// literal runs and copy references; identical content produces a delta of
/// copy references only.
pub fn generate_delta<R: Read, W: Write>(
    sig: &FileSignature,
    reader: R,
    len: u64,
    mut out: W,
) -> Result<(), DeltaError> {
    let block_size = sig.block_size() as usize;
    out.write_all(&sig.block_size().to_le_bytes())?;

    let mut emitter = OpEmitter::new(&mut out, sig.block_size());
    let table = WeakTable::build(sig);

    let mut reader = reader.take(len);
    let mut buf: Vec<u8> = Vec::with_capacity(block_size + READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut eof = false;

    let mut pos = 0usize;
    let mut lit_start = 0usize;
    let mut rolling = RollingChecksum::new();
    let mut rehash = true;

    loop {
        // Keep at least one full window buffered, or everything up to EOF.
        while !eof && buf.len() - pos < block_size {
            match reader.read(&mut chunk) {
                Ok(0) => eof = true,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }

        if buf.len() - pos < block_size {
            break;
        }

        if rehash {
            rolling.update_from_block(&buf[pos..pos + block_size]);
            rehash = false;
        }

        let matched = table.lookup(rolling.value(), &buf[pos..pos + block_size]);
        if let Some(index) = matched {
            emitter.literal(&buf[lit_start..pos])?;
            emitter.copy(index, block_size as u64)?;
            pos += block_size;
            lit_start = pos;
            rehash = true;
        } else {
            rolling.roll(buf[pos], buf[pos + block_size - 1]);
            pos += 1;
        }

        // Bytes before `lit_start` are already emitted; bytes in
        // `lit_start..pos` are decided literals. Flush and drop both so the
        // buffer never grows past the threshold plus one window.
        if pos >= COMPACT_THRESHOLD {
            emitter.literal(&buf[lit_start..pos])?;
            buf.drain(..pos);
            pos = 0;
            lit_start = 0;
        }
    }

    // Fewer than block_size bytes remain; the only possible match left is
    // the signature's short tail block.
    let rest = &buf[pos..];
    if !rest.is_empty() {
        if let Some(index) = table.lookup_tail(sig, rest) {
            emitter.literal(&buf[lit_start..pos])?;
            emitter.copy(index, rest.len() as u64)?;
        } else {
            emitter.literal(&buf[lit_start..])?;
        }
    } else {
        emitter.literal(&buf[lit_start..pos])?;
    }

    emitter.finish()
}

/// Weak-checksum index over the full-size blocks of a signature.
struct WeakTable {
    by_weak: FxHashMap<u32, Vec<u32>>,
    strong: Vec<[u8; STRONG_LEN]>,
}

impl WeakTable {
    fn build(sig: &FileSignature) -> Self {
        let blocks = sig.blocks();
        let full_count = if sig.tail_len() != 0 && sig.tail_len() < sig.block_size() {
            blocks.len().saturating_sub(1)
        } else {
            blocks.len()
        };

        let mut by_weak: FxHashMap<u32, Vec<u32>> = FxHashMap::default();
        let mut strong = Vec::with_capacity(blocks.len());
        for (index, block) in blocks.iter().enumerate() {
            strong.push(block.strong);
            if index < full_count {
                by_weak.entry(block.weak).or_default().push(index as u32);
            }
        }
        Self { by_weak, strong }
    }

    /// Returns the index of a full block matching `window`, if any.
    fn lookup(&self, weak: u32, window: &[u8]) -> Option<u32> {
        let candidates = self.by_weak.get(&weak)?;
        let mut digest: Option<[u8; STRONG_LEN]> = None;
        for &index in candidates {
            let strong = digest.get_or_insert_with(|| Md5::digest(window).into());
            if self.strong[index as usize] == *strong {
                return Some(index);
            }
        }
        None
    }

    /// Matches the end-of-stream remainder against the signature's short
    /// tail block, when one exists and the lengths agree.
    fn lookup_tail(&self, sig: &FileSignature, rest: &[u8]) -> Option<u32> {
        let tail_len = sig.tail_len();
        if tail_len == 0 || tail_len >= sig.block_size() || rest.len() != tail_len as usize {
            return None;
        }
        let index = (sig.blocks().len() - 1) as u32;
        let tail = &sig.blocks()[index as usize];
        if RollingChecksum::checksum(rest) == tail.weak
            && <[u8; STRONG_LEN]>::from(Md5::digest(rest)) == tail.strong
        {
            Some(index)
        } else {
            None
        }
    }
}

/// Writes delta operations, coalescing adjacent copies and chunking literals.
struct OpEmitter<'a, W: Write> {
    out: &'a mut W,
    block_size: u64,
    pending: Option<PendingCopy>,
}

struct PendingCopy {
    start_index: u32,
    len: u64,
}

impl<'a, W: Write> OpEmitter<'a, W> {
    fn new(out: &'a mut W, block_size: u32) -> Self {
        Self {
            out,
            block_size: u64::from(block_size),
            pending: None,
        }
    }

    fn literal(&mut self, bytes: &[u8]) -> Result<(), DeltaError> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.flush_copy()?;
        for run in bytes.chunks(u32::MAX as usize) {
            self.out.write_all(&[OP_LITERAL])?;
            self.out.write_all(&(run.len() as u32).to_le_bytes())?;
            self.out.write_all(run)?;
        }
        Ok(())
    }

    fn copy(&mut self, index: u32, len: u64) -> Result<(), DeltaError> {
        if let Some(pending) = &mut self.pending {
            // A copy extends the pending run when it starts exactly where
            // the run ends and the run so far covers whole blocks.
            let blocks_covered = pending.len / self.block_size;
            let contiguous = pending.len % self.block_size == 0
                && u64::from(pending.start_index) + blocks_covered == u64::from(index)
                && pending.len + len <= u64::from(u32::MAX);
            if contiguous {
                pending.len += len;
                return Ok(());
            }
            self.flush_copy()?;
        }
        self.pending = Some(PendingCopy {
            start_index: index,
            len,
        });
        Ok(())
    }

    fn flush_copy(&mut self) -> Result<(), DeltaError> {
        if let Some(pending) = self.pending.take() {
            self.out.write_all(&[OP_COPY])?;
            self.out.write_all(&pending.start_index.to_le_bytes())?;
            self.out.write_all(&(pending.len as u32).to_le_bytes())?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<(), DeltaError> {
        self.flush_copy()?;
        self.out.flush()?;
        Ok(())
    }
}
