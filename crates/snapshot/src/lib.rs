#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `snapshot` owns the on-disk snapshot artifact: the single
//! `<YYYYMMDDhhmm>-<hostname>-<NN>.gz.enc` file a backup run produces. The
//! crate provides the record wire format, the strictly append-only
//! [`SnapshotWriter`] the engine streams records into, and the
//! [`SnapshotReader`] that `restore` and `cat` iterate.
//!
//! # File Layout
//!
//! Outside-in: sealed envelope (recipient public key) → gzip stream at the
//! configured level → record stream. Inside the compression, all integers
//! little-endian:
//!
//! ```text
//! magic "OCBK" | format_version: u16 | hostname_len: u16 | hostname |
//! base_timestamp: i64 | increment: u16
//! then per record:
//! path_len: u32 | path | mode: u32 | uid: u32 | gid: u32 |
//! mtime: i64 | size: u64 | kind: u8 | payload_len: u64 | payload
//! ```
//!
//! # Invariants
//!
//! - Records emerge in exactly the order they were added; there is no seek.
//! - A snapshot is only visible under its final name once
//!   [`SnapshotWriter::close`] has finished the gzip stream, sealed the
//!   envelope, and fsynced. The writer never deletes a partial file; that
//!   cleanup belongs to the caller, which knows whether the run failed.
//! - A tombstone record carries all-zero metadata and an empty payload.

mod error;
mod name;
mod reader;
mod record;
mod writer;

pub use error::SnapshotError;
pub use name::SnapshotName;
pub use reader::{Record, SnapshotHeader, SnapshotReader};
pub use record::{Metadata, RecordKind};
pub use writer::{SnapshotOptions, SnapshotWriter};

/// Magic bytes opening the record stream.
pub(crate) const MAGIC: [u8; 4] = *b"OCBK";

/// Snapshot format version.
pub const FORMAT_VERSION: u16 = 1;

/// File name suffix for committed snapshots.
pub const SNAPSHOT_SUFFIX: &str = ".gz.enc";
