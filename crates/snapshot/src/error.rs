use std::io;

use thiserror::Error;

/// Errors raised while writing or reading a snapshot file.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// An underlying read, write, or filesystem call failed.
    #[error("snapshot I/O failure: {0}")]
    Io(#[from] io::Error),

    /// The sealed envelope could not be opened or written.
    #[error(transparent)]
    Envelope(#[from] envelope::EnvelopeError),

    /// The decrypted stream does not parse as a snapshot.
    #[error("snapshot corrupt: {0}")]
    Corrupt(&'static str),

    /// The snapshot was written by an incompatible format version.
    #[error("snapshot format version {version} is not supported")]
    UnsupportedVersion {
        /// Version found in the header.
        version: u16,
    },

    /// A payload reader yielded fewer bytes than the record promised.
    #[error("record payload cut short: expected {expected} bytes, got {actual}")]
    ShortPayload {
        /// Bytes the record header declared.
        expected: u64,
        /// Bytes actually read.
        actual: u64,
    },

    /// The hostname does not fit the 16-bit length prefix.
    #[error("hostname exceeds 65535 bytes")]
    HostnameTooLong,

    /// The base timestamp does not map to a calendar date.
    #[error("base timestamp {timestamp} is out of range")]
    TimestampOutOfRange {
        /// The offending unix timestamp.
        timestamp: i64,
    },
}
