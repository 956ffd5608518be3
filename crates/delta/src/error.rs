use std::io;

use thiserror::Error;

/// Errors raised by signature parsing, delta generation, and delta replay.
#[derive(Debug, Error)]
pub enum DeltaError {
    /// An underlying reader or writer failed.
    #[error("delta codec I/O failure: {0}")]
    Io(#[from] io::Error),

    /// A serialized signature ended before the declared block table.
    #[error("signature truncated: expected {expected} bytes, found {found}")]
    TruncatedSignature {
        /// Bytes the header promised.
        expected: usize,
        /// Bytes actually present.
        found: usize,
    },

    /// A serialized signature violated a structural rule.
    #[error("corrupt signature: {0}")]
    CorruptSignature(&'static str),

    /// A serialized delta ended mid-operation or used an unknown op tag.
    #[error("corrupt delta: {0}")]
    CorruptDelta(&'static str),

    /// A copy operation referenced bytes outside the previous content.
    #[error("delta copy out of range: offset {offset} len {len} exceeds previous length {prev_len}")]
    CopyOutOfRange {
        /// Byte offset into the previous content.
        offset: u64,
        /// Requested copy length.
        len: u64,
        /// Length of the previous content.
        prev_len: u64,
    },
}
