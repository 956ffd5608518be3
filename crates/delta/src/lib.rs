#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `delta` provides the rolling-checksum delta codec at the bottom of the
//! oc-backup workspace. It is a pure transformer: given the block signature
//! of an old version of a byte stream and the bytes of a new version, it
//! produces a compact delta; given the old bytes and the delta, it
//! reconstructs the new version exactly. The crate performs no encryption,
//! no compression, and owns no I/O policy beyond reading the streams it is
//! handed.
//!
//! # Design
//!
//! The codec follows the classic rsync construction:
//!
//! - [`RollingChecksum`] is the Adler-32 style weak checksum (two 16-bit
//!   components) that supports O(1) window slides.
//! - [`FileSignature`] is a table of per-block `(weak, strong)` descriptors
//!   over fixed-size content blocks, plus a small header carrying the block
//!   size and a digest of the file's metadata tuple.
//! - [`generate_delta`] streams the new content, sliding the weak window one
//!   byte at a time and verifying candidate matches with the strong digest,
//!   emitting literal runs and block copy references.
//! - [`apply_delta`] replays those operations against the old bytes.
//!
//! # Invariants
//!
//! - `apply_delta(prev, generate_delta(signature(prev), new)) == new` for
//!   all byte strings `prev` and `new`.
//! - Signature generation and delta generation are deterministic; equal
//!   input bytes and metadata produce byte-identical signatures.
//! - Both components of the weak checksum are truncated to 16 bits after
//!   every update.
//!
//! # Errors
//!
//! [`DeltaError`] covers truncated or corrupt signatures and deltas as well
//! as copy references that fall outside the previous content. I/O failures
//! from the supplied readers and writers are forwarded unchanged.

mod apply;
mod error;
mod generate;
mod rolling;
mod signature;

pub use apply::apply_delta;
pub use error::DeltaError;
pub use generate::generate_delta;
pub use rolling::RollingChecksum;
pub use signature::{BlockSum, FileSignature, META_DIGEST_LEN, block_size_for, metadata_digest};
