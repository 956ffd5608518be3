#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `sigcache` persists the per-path signatures that gate change detection
//! between backup runs. A run loads the previous cache read-only, writes a
//! fresh cache to `sig.cache.inprogress` entry by entry as it walks, and
//! atomically renames it over `sig.cache` only after the snapshot has been
//! committed. A failed or cancelled run therefore leaves the previous
//! generation's cache untouched.
//!
//! # On-Disk Format
//!
//! All integers little-endian:
//!
//! ```text
//! magic "OCSC" | version: u16 | hostname_len: u16 | hostname |
//! base_timestamp: i64 | increment: u16
//! then per entry: path_len: u32 | path | sig_len: u32 | sig
//! ```
//!
//! Paths are raw bytes exactly as the walker produced them; signatures are
//! the opaque tokens handed over by the delta codec.
//!
//! # Invariants
//!
//! - Each path is recorded at most once per cache; a duplicate
//!   [`CacheWriter::add`] is an error.
//! - Writing is append-only within a run; entries are never mutated in
//!   place.
//! - A missing cache file is [`Ok(None)`], a distinct outcome from a
//!   corrupt one.

mod error;

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

pub use error::CacheError;

/// Magic bytes opening every cache file.
const MAGIC: [u8; 4] = *b"OCSC";

/// Current cache format version.
pub const CACHE_VERSION: u16 = 1;

/// Upper bound on a single path or signature entry, as a corruption guard.
const MAX_ENTRY_LEN: u32 = 64 * 1024 * 1024;

/// A previous run's signature cache, loaded read-only.
pub struct SigCache {
    hostname: String,
    base_timestamp: i64,
    increment: u16,
    entries: FxHashMap<Vec<u8>, Vec<u8>>,
}

impl SigCache {
    /// Loads a committed cache file.
    ///
    /// A missing file yields `Ok(None)`; anything else that prevents a full
    /// parse is an error, because acting on half a cache would misclassify
    /// every path the missing half covered.
    pub fn load(path: &Path) -> Result<Option<Self>, CacheError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(CacheError::Io(err)),
        };
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(CacheError::Corrupt("bad magic"));
        }
        let version = read_u16(&mut reader)?;
        if version != CACHE_VERSION {
            return Err(CacheError::UnsupportedVersion { version });
        }
        let hostname_len = read_u16(&mut reader)? as usize;
        let mut hostname = vec![0u8; hostname_len];
        reader.read_exact(&mut hostname)?;
        let hostname =
            String::from_utf8(hostname).map_err(|_| CacheError::Corrupt("hostname not UTF-8"))?;
        let base_timestamp = read_i64(&mut reader)?;
        let increment = read_u16(&mut reader)?;

        let mut entries = FxHashMap::default();
        loop {
            let path_len = match read_u32_or_eof(&mut reader)? {
                Some(len) => len,
                None => break,
            };
            let path = read_entry(&mut reader, path_len, "path")?;
            let sig_len = read_u32_or_eof(&mut reader)?
                .ok_or(CacheError::Corrupt("entry cut short after path"))?;
            let sig = read_entry(&mut reader, sig_len, "signature")?;
            if entries.insert(path, sig).is_some() {
                return Err(CacheError::Corrupt("duplicate path"));
            }
        }

        debug!(
            entries = entries.len(),
            base_timestamp, increment, "loaded signature cache"
        );
        Ok(Some(Self {
            hostname,
            base_timestamp,
            increment,
            entries,
        }))
    }

    /// Hostname recorded when the cache was written.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Base timestamp of the generation the cache belongs to.
    #[must_use]
    pub const fn base_timestamp(&self) -> i64 {
        self.base_timestamp
    }

    /// Increment of the run that wrote the cache.
    #[must_use]
    pub const fn increment(&self) -> u16 {
        self.increment
    }

    /// Number of paths recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the cache records no paths.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends the stored signature for `path` to `buf`, if one exists.
    ///
    /// Accepting an optional cache lets first runs share the lookup path:
    /// with no previous cache every lookup leaves `buf` empty and every
    /// entry classifies as new.
    pub fn signature_of(cache: Option<&Self>, path: &[u8], buf: &mut Vec<u8>) {
        if let Some(sig) = cache.and_then(|cache| cache.entries.get(path)) {
            buf.extend_from_slice(sig);
        }
    }

    /// The paths present in the cache, in sorted order.
    ///
    /// This seeds the engine's deletion set; sorted order makes tombstone
    /// emission deterministic.
    #[must_use]
    pub fn paths(&self) -> BTreeSet<Vec<u8>> {
        self.entries.keys().cloned().collect()
    }
}

/// Append-only writer for the next run's cache.
pub struct CacheWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    seen: FxHashSet<Vec<u8>>,
    hostname: String,
    base_timestamp: i64,
    increment: u16,
}

impl CacheWriter {
    /// Creates `path` (truncating any stale leftover) and writes the header.
    pub fn create(
        path: &Path,
        hostname: &str,
        base_timestamp: i64,
        increment: u16,
    ) -> Result<Self, CacheError> {
        let hostname_len =
            u16::try_from(hostname.len()).map_err(|_| CacheError::HostnameTooLong)?;
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&MAGIC)?;
        writer.write_all(&CACHE_VERSION.to_le_bytes())?;
        writer.write_all(&hostname_len.to_le_bytes())?;
        writer.write_all(hostname.as_bytes())?;
        writer.write_all(&base_timestamp.to_le_bytes())?;
        writer.write_all(&increment.to_le_bytes())?;
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            seen: FxHashSet::default(),
            hostname: hostname.to_string(),
            base_timestamp,
            increment,
        })
    }

    /// Hostname the cache header carries.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Base timestamp the cache header carries.
    #[must_use]
    pub const fn base_timestamp(&self) -> i64 {
        self.base_timestamp
    }

    /// Increment the cache header carries.
    #[must_use]
    pub const fn increment(&self) -> u16 {
        self.increment
    }

    /// Records `(path, signature)` for the next run.
    pub fn add(&mut self, path: &[u8], signature: &[u8]) -> Result<(), CacheError> {
        if !self.seen.insert(path.to_vec()) {
            return Err(CacheError::DuplicatePath {
                path: String::from_utf8_lossy(path).into_owned(),
            });
        }
        let path_len = u32::try_from(path.len()).map_err(|_| CacheError::EntryTooLong)?;
        let sig_len = u32::try_from(signature.len()).map_err(|_| CacheError::EntryTooLong)?;
        if path_len > MAX_ENTRY_LEN || sig_len > MAX_ENTRY_LEN {
            return Err(CacheError::EntryTooLong);
        }
        self.writer.write_all(&path_len.to_le_bytes())?;
        self.writer.write_all(path)?;
        self.writer.write_all(&sig_len.to_le_bytes())?;
        self.writer.write_all(signature)?;
        Ok(())
    }

    /// Returns `true` when `path` has already been recorded this run.
    ///
    /// Overlapping source roots visit the same path twice; callers check
    /// before emitting a second snapshot record for it.
    #[must_use]
    pub fn contains(&self, path: &[u8]) -> bool {
        self.seen.contains(path)
    }

    /// Number of paths recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns `true` when nothing has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Flushes, fsyncs, and atomically renames the cache over `dest`.
    pub fn commit(mut self, dest: &Path) -> Result<PathBuf, CacheError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        drop(self.writer);
        fs::rename(&self.path, dest)?;
        Ok(dest.to_path_buf())
    }

    /// Path of the in-progress file, for cleanup on abort.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_u16<R: Read>(reader: &mut R) -> Result<u16, CacheError> {
    let mut bytes = [0u8; 2];
    reader.read_exact(&mut bytes)?;
    Ok(u16::from_le_bytes(bytes))
}

fn read_i64<R: Read>(reader: &mut R) -> Result<i64, CacheError> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(i64::from_le_bytes(bytes))
}

/// Reads a `u32` length prefix; clean EOF at an entry boundary ends the file.
fn read_u32_or_eof<R: Read>(reader: &mut R) -> Result<Option<u32>, CacheError> {
    let mut bytes = [0u8; 4];
    let mut filled = 0;
    while filled < bytes.len() {
        match reader.read(&mut bytes[filled..])? {
            0 if filled == 0 => return Ok(None),
            0 => return Err(CacheError::Corrupt("length prefix cut short")),
            n => filled += n,
        }
    }
    Ok(Some(u32::from_le_bytes(bytes)))
}

fn read_entry<R: Read>(reader: &mut R, len: u32, what: &'static str) -> Result<Vec<u8>, CacheError> {
    if len > MAX_ENTRY_LEN {
        return Err(CacheError::Corrupt(what));
    }
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}
