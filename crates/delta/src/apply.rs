//! Delta application: replay literal and copy operations against old bytes.

use std::io::Write;

use crate::error::DeltaError;
use crate::generate::{OP_COPY, OP_LITERAL};

/// Reconstructs new content by applying `delta` to `prev`.
///
/// `prev` must be the exact bytes the delta's signature was generated from;
/// copy references index block offsets within it. The reconstruction is
/// deterministic and validates every operation before writing it.
///
/// # Examples
///
/// ```
/// use std::io::Cursor;
///
/// let prev = b"aaaa bbbb cccc dddd".repeat(100);
/// let new = b"aaaa XXXX cccc dddd".repeat(100);
/// let meta = delta::metadata_digest(0o100644, 0, 0, prev.len() as u64, 0, None);
/// let sig = delta::FileSignature::generate(Cursor::new(&prev), prev.len() as u64, meta)
///     .unwrap();
///
/// let mut encoded = Vec::new();
/// delta::generate_delta(&sig, Cursor::new(&new), new.len() as u64, &mut encoded).unwrap();
///
/// let mut rebuilt = Vec::new();
/// delta::apply_delta(&prev, &encoded, &mut rebuilt).unwrap();
/// assert_eq!(rebuilt, new);
/// ```
pub fn apply_delta<W: Write>(prev: &[u8], delta: &[u8], mut out: W) -> Result<(), DeltaError> {
    if delta.len() < 4 {
        return Err(DeltaError::CorruptDelta("missing block size header"));
    }
    let block_size = u64::from(u32::from_le_bytes([delta[0], delta[1], delta[2], delta[3]]));
    if block_size == 0 {
        return Err(DeltaError::CorruptDelta("zero block size"));
    }

    let mut cursor = 4usize;
    while cursor < delta.len() {
        let tag = delta[cursor];
        cursor += 1;
        match tag {
            OP_LITERAL => {
                let len = read_u32(delta, &mut cursor)? as usize;
                let end = cursor
                    .checked_add(len)
                    .filter(|&end| end <= delta.len())
                    .ok_or(DeltaError::CorruptDelta("literal run past end of delta"))?;
                out.write_all(&delta[cursor..end])?;
                cursor = end;
            }
            OP_COPY => {
                let index = u64::from(read_u32(delta, &mut cursor)?);
                let len = u64::from(read_u32(delta, &mut cursor)?);
                let offset = index
                    .checked_mul(block_size)
                    .ok_or(DeltaError::CorruptDelta("copy offset overflow"))?;
                let end = offset
                    .checked_add(len)
                    .ok_or(DeltaError::CorruptDelta("copy length overflow"))?;
                if end > prev.len() as u64 {
                    return Err(DeltaError::CopyOutOfRange {
                        offset,
                        len,
                        prev_len: prev.len() as u64,
                    });
                }
                out.write_all(&prev[offset as usize..end as usize])?;
            }
            _ => return Err(DeltaError::CorruptDelta("unknown operation tag")),
        }
    }

    out.flush()?;
    Ok(())
}

fn read_u32(delta: &[u8], cursor: &mut usize) -> Result<u32, DeltaError> {
    let end = cursor
        .checked_add(4)
        .filter(|&end| end <= delta.len())
        .ok_or(DeltaError::CorruptDelta("truncated operation header"))?;
    let value = u32::from_le_bytes([
        delta[*cursor],
        delta[*cursor + 1],
        delta[*cursor + 2],
        delta[*cursor + 3],
    ]);
    *cursor = end;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::apply_delta;

    #[test]
    fn rejects_empty_delta() {
        assert!(apply_delta(b"prev", &[], &mut Vec::new()).is_err());
    }

    #[test]
    fn rejects_unknown_tag() {
        let mut delta = 512u32.to_le_bytes().to_vec();
        delta.push(0x7f);
        assert!(apply_delta(b"prev", &delta, &mut Vec::new()).is_err());
    }

    #[test]
    fn rejects_copy_past_previous_content() {
        let mut delta = 512u32.to_le_bytes().to_vec();
        delta.push(super::OP_COPY);
        delta.extend_from_slice(&0u32.to_le_bytes());
        delta.extend_from_slice(&512u32.to_le_bytes());
        assert!(apply_delta(b"short", &delta, &mut Vec::new()).is_err());
    }

    #[test]
    fn literal_only_delta_reproduces_bytes() {
        let mut delta = 512u32.to_le_bytes().to_vec();
        delta.push(super::OP_LITERAL);
        delta.extend_from_slice(&5u32.to_le_bytes());
        delta.extend_from_slice(b"hello");
        let mut out = Vec::new();
        apply_delta(&[], &delta, &mut out).unwrap();
        assert_eq!(out, b"hello");
    }
}
