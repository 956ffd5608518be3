#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `engine` is the stateful core of oc-backup: it walks the configured
//! source roots, reconciles every entry against the previous run's
//! signature cache, streams full contents or rolling-hash deltas into a
//! single sealed snapshot file, records deletions as tombstones, and
//! commits a fresh signature cache for the next run. The inverse
//! operations, [`restore`] and [`cat`], live here as well because they
//! share the engine's view of the snapshot chain.
//!
//! # Design
//!
//! A run is single-threaded: exactly one path is processed at a time, in
//! lexicographic walk order per root, roots in configured order. The only
//! concurrency is the signal handler the CLI wires to the [`Cancel`]
//! token; the token is checked at every file boundary and before every
//! record emission, so the worst-case cancellation latency is one file's
//! processing time.
//!
//! Failure handling follows the configuration / per-file / structural
//! split: configuration problems abort before any I/O, per-file problems
//! are logged and skipped, and structural problems (cache corruption,
//! snapshot write failure, cancellation) abort the run, delete the partial
//! snapshot, and leave the previous signature cache untouched.

mod backup;
mod cancel;
mod cat;
mod error;
mod fsmeta;
mod restore;

pub use backup::{BackupSummary, MEMORY_LIMIT, backup};
pub use cancel::Cancel;
pub use cat::cat;
pub use error::EngineError;
pub use restore::{RestoreSummary, restore};
