//! The walk-and-reconcile backup driver.
//!
//! One run: prepare the destination, load the previous signature cache,
//! decide the generation, open the snapshot, walk every configured root in
//! lexicographic order, classify and reconcile each entry, tombstone
//! whatever the previous run saw that this run did not, and finally commit
//! snapshot and cache together. Any structural failure deletes the partial
//! snapshot and leaves the previous cache in place, so a crashed or
//! cancelled run is invisible to consumers.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Cursor, Seek, SeekFrom};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use config::BackupConfig;
use delta::FileSignature;
use envelope::PublicKey;
use sigcache::{CacheError, CacheWriter, SigCache};
use snapshot::{Metadata, RecordKind, SNAPSHOT_SUFFIX, SnapshotOptions, SnapshotWriter};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cancel::Cancel;
use crate::error::EngineError;
use crate::fsmeta::{self, EntryClass};

/// Cap on each reusable scratch buffer; buffers growing past this are
/// dropped after the file that inflated them.
pub const MEMORY_LIMIT: usize = 10 * 1024 * 1024;

/// Files larger than this stage their delta in a spill file inside the
/// backup path instead of holding it in memory.
const SPILL_THRESHOLD: u64 = 10 * MEMORY_LIMIT as u64;

/// Committed signature cache file name.
const CACHE_FILE: &str = "sig.cache";

/// Transient cache name while a run is writing it.
const CACHE_INPROGRESS: &str = "sig.cache.inprogress";

/// Prefix of delta spill files inside the backup path.
const DELTA_PREFIX: &str = "delta";

/// Outcome of one successful backup run.
#[derive(Clone, Debug, Default)]
pub struct BackupSummary {
    /// Committed snapshot file.
    pub snapshot: PathBuf,
    /// Encrypted bytes on disk.
    pub bytes_written: u64,
    /// Generation base timestamp of the run.
    pub base_timestamp: i64,
    /// Increment of the run within its generation.
    pub increment: u16,
    /// Paths recorded for the first time.
    pub added: u64,
    /// Paths whose signature changed since the previous run.
    pub changed: u64,
    /// Paths left out of the snapshot because nothing changed.
    pub unchanged: u64,
    /// Tombstones emitted.
    pub deleted: u64,
    /// Paths skipped by exclude patterns.
    pub excluded: u64,
    /// Per-file errors logged and skipped.
    pub errors: u64,
}

/// Runs one backup increment for `config`, sealing to `recipient`.
pub fn backup(
    cancel: &Cancel,
    recipient: &PublicKey,
    config: &BackupConfig,
) -> Result<BackupSummary, EngineError> {
    let run_start = SystemTime::now();
    let uid = nix::unistd::Uid::effective().as_raw();
    let gid = resolve_group(&config.group)?;

    prepare_backup_dir(&config.backuppath, uid, gid)?;
    sweep_stale_spill_files(&config.backuppath, run_start);

    let existing = load_previous_cache(&config.backuppath.join(CACHE_FILE))?;
    let hostname = hostname()?;

    // A run continues the previous generation only when the cache is
    // usable, was written by this host, and the ceiling has room left.
    let (existing, base_timestamp, increment) = match existing {
        Some(cache)
            if cache.hostname() == hostname
                && u32::from(cache.increment()) + 1 <= u32::from(config.maxintervals) =>
        {
            let base = cache.base_timestamp();
            let increment = cache.increment() + 1;
            (Some(cache), base, increment)
        }
        previous => {
            if previous.is_some() {
                info!("starting fresh generation; previous snapshots will be discarded");
            }
            discard_old_snapshots(&config.backuppath, config.dryrun)?;
            (None, unix_timestamp(run_start)?, 0u16)
        }
    };

    let cache_dest = config.backuppath.join(CACHE_FILE);
    let inprogress = config.backuppath.join(CACHE_INPROGRESS);
    let mut cache = CacheWriter::create(&inprogress, &hostname, base_timestamp, increment)?;
    let mut writer = SnapshotWriter::create(
        recipient,
        &SnapshotOptions {
            dir: &config.backuppath,
            hostname: &hostname,
            base_timestamp,
            increment,
            gzip_level: config.gzlevel,
            uid,
            gid,
        },
    )?;
    let snapshot_path = writer.path().to_path_buf();

    // Roots are canonicalized before walking, so the "never descend into
    // the backup directory" test must use the canonical form too.
    let backup_root = config.backuppath.canonicalize()?;

    match walk_roots(
        cancel,
        config,
        &backup_root,
        existing.as_ref(),
        &mut cache,
        &mut writer,
    ) {
        Ok(mut summary) => {
            summary.base_timestamp = base_timestamp;
            summary.increment = increment;
            summary.snapshot = snapshot_path.clone();
            match writer.close() {
                Ok(bytes) => summary.bytes_written = bytes,
                Err(err) => {
                    abort_cleanup(&snapshot_path, &inprogress);
                    return Err(err.into());
                }
            }
            if let Err(err) = cache.commit(&cache_dest) {
                abort_cleanup(&snapshot_path, &inprogress);
                return Err(err.into());
            }
            chown_best_effort(&cache_dest, uid, gid);
            info!(
                snapshot = %summary.snapshot.display(),
                bytes = summary.bytes_written,
                added = summary.added,
                changed = summary.changed,
                unchanged = summary.unchanged,
                deleted = summary.deleted,
                excluded = summary.excluded,
                errors = summary.errors,
                "backup complete"
            );
            Ok(summary)
        }
        Err(err) => {
            drop(writer);
            drop(cache);
            abort_cleanup(&snapshot_path, &inprogress);
            Err(err)
        }
    }
}

/// Walks every root, reconciles entries, and emits tombstones.
fn walk_roots(
    cancel: &Cancel,
    config: &BackupConfig,
    backup_root: &Path,
    existing: Option<&SigCache>,
    cache: &mut CacheWriter,
    writer: &mut SnapshotWriter,
) -> Result<BackupSummary, EngineError> {
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    let mut summary = BackupSummary::default();
    let mut remaining: BTreeSet<Vec<u8>> = existing.map(SigCache::paths).unwrap_or_default();
    let mut scratch = Scratch::default();

    for root in &config.paths {
        let root = match root.canonicalize() {
            Ok(root) => root,
            Err(err) => {
                warn!(root = %root.display(), %err, "cannot resolve source root; skipping");
                summary.errors += 1;
                continue;
            }
        };

        let mut entries = WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();
        while let Some(entry) = entries.next() {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(%err, "walk error; continuing");
                    summary.errors += 1;
                    continue;
                }
            };
            let path = entry.path();

            // Never back up the backup directory itself.
            if path.starts_with(backup_root) {
                if entry.file_type().is_dir() {
                    entries.skip_current_dir();
                }
                continue;
            }

            let path_bytes = path.as_os_str().as_bytes();
            if config.excludes.is_match(path_bytes) {
                summary.excluded += 1;
                if entry.file_type().is_dir() {
                    entries.skip_current_dir();
                }
                continue;
            }

            if cache.contains(path_bytes) {
                // Overlapping roots; the first visit already recorded it.
                debug!(path = %path.display(), "already recorded this run");
                continue;
            }

            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(err) => {
                    carry_forward(
                        existing,
                        cache,
                        &mut remaining,
                        &mut summary,
                        path,
                        &mut scratch,
                    );
                    warn!(path = %path.display(), %err, "cannot stat; skipping");
                    continue;
                }
            };

            process_entry(
                config,
                existing,
                cache,
                writer,
                &mut remaining,
                &mut scratch,
                &mut summary,
                path,
                &meta,
            )?;
            scratch.shrink();
        }
    }

    for path in remaining {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        writer.add(&Metadata::tombstone(path), RecordKind::Tombstone, None, 0)?;
        summary.deleted += 1;
    }

    Ok(summary)
}

/// Reconciles one classified entry against the previous cache.
#[allow(clippy::too_many_arguments)]
fn process_entry(
    config: &BackupConfig,
    existing: Option<&SigCache>,
    cache: &mut CacheWriter,
    writer: &mut SnapshotWriter,
    remaining: &mut BTreeSet<Vec<u8>>,
    scratch: &mut Scratch,
    summary: &mut BackupSummary,
    path: &Path,
    meta: &fs::Metadata,
) -> Result<(), EngineError> {
    let class = fsmeta::classify(path, meta);
    if class == EntryClass::Socket {
        debug!(path = %path.display(), "skipping socket");
        return Ok(());
    }

    let record = fsmeta::capture(path.as_os_str().as_bytes().to_vec(), meta, class);
    scratch.prev_sig.clear();
    SigCache::signature_of(existing, &record.path, &mut scratch.prev_sig);

    match class {
        EntryClass::Directory | EntryClass::Special => {
            let sig = fsmeta::meta_signature(&record);
            if scratch.prev_sig == sig {
                summary.unchanged += 1;
            } else {
                writer.add(&record, RecordKind::Meta, None, 0)?;
                bump(summary, scratch.prev_sig.is_empty());
            }
            record_path(cache, remaining, &record.path, &sig)?;
        }
        EntryClass::Symlink => {
            let target = match fs::read_link(path) {
                Ok(target) => target,
                Err(err) => {
                    carry_forward(existing, cache, remaining, summary, path, scratch);
                    warn!(path = %path.display(), %err, "cannot read symlink target; skipping");
                    return Ok(());
                }
            };
            let target = target.as_os_str().as_bytes().to_vec();
            let digest = delta::metadata_digest(
                record.mode,
                record.uid,
                record.gid,
                record.size,
                record.mtime,
                Some(&target),
            );
            let sig =
                FileSignature::generate(Cursor::new(&target), target.len() as u64, digest)?;
            scratch.new_sig = sig.to_bytes();

            if scratch.prev_sig.is_empty() {
                emit_full(writer, &record, &target)?;
                summary.added += 1;
            } else if scratch.prev_sig == scratch.new_sig {
                summary.unchanged += 1;
            } else if let Ok(prev) = FileSignature::from_bytes(&scratch.prev_sig) {
                scratch.delta.clear();
                delta::generate_delta(
                    &prev,
                    Cursor::new(&target),
                    target.len() as u64,
                    &mut scratch.delta,
                )?;
                writer.add(
                    &record,
                    RecordKind::Delta,
                    Some(&mut scratch.delta.as_slice()),
                    scratch.delta.len() as u64,
                )?;
                summary.changed += 1;
            } else {
                // The path changed type since the previous run; the old
                // signature is not a content signature, so re-send.
                emit_full(writer, &record, &target)?;
                summary.changed += 1;
            }
            record_path(cache, remaining, &record.path, &scratch.new_sig)?;
        }
        EntryClass::Regular => {
            let mut file = match File::open(path) {
                Ok(file) => file,
                Err(err) => {
                    carry_forward(existing, cache, remaining, summary, path, scratch);
                    warn!(path = %path.display(), %err, "cannot open; skipping");
                    return Ok(());
                }
            };
            let digest = delta::metadata_digest(
                record.mode,
                record.uid,
                record.gid,
                record.size,
                record.mtime,
                None,
            );
            let sig = match FileSignature::generate(BufReader::new(&file), record.size, digest) {
                Ok(sig) => sig,
                Err(delta::DeltaError::Io(err)) => {
                    carry_forward(existing, cache, remaining, summary, path, scratch);
                    warn!(path = %path.display(), %err, "read failed while signing; skipping");
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };
            scratch.new_sig = sig.to_bytes();

            if scratch.prev_sig.is_empty() {
                file.seek(SeekFrom::Start(0))?;
                writer.add(&record, RecordKind::Full, Some(&mut file), record.size)?;
                summary.added += 1;
            } else if scratch.prev_sig == scratch.new_sig {
                summary.unchanged += 1;
            } else if let Ok(prev) = FileSignature::from_bytes(&scratch.prev_sig) {
                file.seek(SeekFrom::Start(0))?;
                emit_delta(config, writer, &record, &prev, &mut file, scratch)?;
                summary.changed += 1;
            } else {
                warn!(path = %path.display(), "previous signature unusable; sending full content");
                file.seek(SeekFrom::Start(0))?;
                writer.add(&record, RecordKind::Full, Some(&mut file), record.size)?;
                summary.changed += 1;
            }
            record_path(cache, remaining, &record.path, &scratch.new_sig)?;
        }
        EntryClass::Socket => unreachable!("sockets return early"),
    }

    Ok(())
}

/// Emits a delta record, spilling to a temp file for very large sources.
fn emit_delta(
    config: &BackupConfig,
    writer: &mut SnapshotWriter,
    record: &Metadata,
    prev: &FileSignature,
    file: &mut File,
    scratch: &mut Scratch,
) -> Result<(), EngineError> {
    if record.size > SPILL_THRESHOLD {
        let mut spill = tempfile::Builder::new()
            .prefix(DELTA_PREFIX)
            .tempfile_in(&config.backuppath)?;
        delta::generate_delta(
            prev,
            BufReader::new(&*file),
            record.size,
            &mut BufWriter::new(spill.as_file_mut()),
        )?;
        let len = spill.as_file().metadata()?.len();
        spill.as_file_mut().seek(SeekFrom::Start(0))?;
        writer.add(record, RecordKind::Delta, Some(spill.as_file_mut()), len)?;
        // Dropping the guard unlinks the spill file, error paths included.
    } else {
        scratch.delta.clear();
        delta::generate_delta(prev, BufReader::new(&*file), record.size, &mut scratch.delta)?;
        writer.add(
            record,
            RecordKind::Delta,
            Some(&mut scratch.delta.as_slice()),
            scratch.delta.len() as u64,
        )?;
    }
    Ok(())
}

fn emit_full(
    writer: &mut SnapshotWriter,
    record: &Metadata,
    content: &[u8],
) -> Result<(), EngineError> {
    writer.add(
        record,
        RecordKind::Full,
        Some(&mut Cursor::new(content)),
        content.len() as u64,
    )?;
    Ok(())
}

/// Records a path in the next-run cache and clears it from the deletion set.
fn record_path(
    cache: &mut CacheWriter,
    remaining: &mut BTreeSet<Vec<u8>>,
    path: &[u8],
    sig: &[u8],
) -> Result<(), EngineError> {
    match cache.add(path, sig) {
        Ok(()) => {}
        Err(CacheError::DuplicatePath { path }) => {
            warn!(%path, "path recorded twice; keeping first entry");
        }
        Err(err) => return Err(err.into()),
    }
    remaining.remove(path);
    Ok(())
}

/// Unreadable entry policy: the previous signature, when one exists, is
/// carried forward so a transient read failure neither tombstones the path
/// nor forces a full re-send when it becomes readable again.
fn carry_forward(
    existing: Option<&SigCache>,
    cache: &mut CacheWriter,
    remaining: &mut BTreeSet<Vec<u8>>,
    summary: &mut BackupSummary,
    path: &Path,
    scratch: &mut Scratch,
) {
    summary.errors += 1;
    let path_bytes = path.as_os_str().as_bytes();
    scratch.prev_sig.clear();
    SigCache::signature_of(existing, path_bytes, &mut scratch.prev_sig);
    if scratch.prev_sig.is_empty() {
        return;
    }
    if let Err(err) = record_path(cache, remaining, path_bytes, &scratch.prev_sig) {
        warn!(path = %path.display(), %err, "cannot carry forward signature");
    }
}

fn bump(summary: &mut BackupSummary, is_new: bool) {
    if is_new {
        summary.added += 1;
    } else {
        summary.changed += 1;
    }
}

/// Reusable per-file buffers, capped after every entry.
#[derive(Default)]
struct Scratch {
    prev_sig: Vec<u8>,
    new_sig: Vec<u8>,
    delta: Vec<u8>,
}

impl Scratch {
    /// Replaces any buffer that outgrew the cap and asks the allocator to
    /// return the freed pages, keeping steady-state memory flat.
    fn shrink(&mut self) {
        let mut released = false;
        for buf in [&mut self.prev_sig, &mut self.new_sig, &mut self.delta] {
            if buf.capacity() > MEMORY_LIMIT {
                *buf = Vec::new();
                released = true;
            }
        }
        if released {
            release_memory();
        }
    }
}

#[cfg(target_os = "linux")]
fn release_memory() {
    // SAFETY: malloc_trim takes no arguments that alias Rust memory; it
    // only walks allocator state.
    unsafe {
        libc::malloc_trim(0);
    }
}

#[cfg(not(target_os = "linux"))]
fn release_memory() {}

/// Loads the previous cache; an unsupported version counts as absent so a
/// format bump forces a fresh generation instead of failing every run.
fn load_previous_cache(path: &Path) -> Result<Option<SigCache>, EngineError> {
    match SigCache::load(path) {
        Ok(cache) => Ok(cache),
        Err(CacheError::UnsupportedVersion { version }) => {
            warn!(version, "signature cache from incompatible version; starting fresh");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

fn prepare_backup_dir(path: &Path, uid: u32, gid: u32) -> Result<(), EngineError> {
    fs::create_dir_all(path)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o750))?;
    nix::unistd::chown(
        path,
        Some(nix::unistd::Uid::from_raw(uid)),
        Some(nix::unistd::Gid::from_raw(gid)),
    )
    .map_err(|errno| EngineError::Io(errno.into()))?;
    Ok(())
}

fn chown_best_effort(path: &Path, uid: u32, gid: u32) {
    if let Err(err) = nix::unistd::chown(
        path,
        Some(nix::unistd::Uid::from_raw(uid)),
        Some(nix::unistd::Gid::from_raw(gid)),
    ) {
        warn!(path = %path.display(), %err, "failed to chown signature cache");
    }
}

fn resolve_group(name: &str) -> Result<u32, EngineError> {
    uzers::get_group_by_name(name)
        .map(|group| group.gid())
        .ok_or_else(|| EngineError::UnknownGroup(name.to_string()))
}

fn hostname() -> Result<String, EngineError> {
    let name = nix::unistd::gethostname().map_err(|errno| EngineError::Hostname(errno.to_string()))?;
    name.into_string()
        .map_err(|_| EngineError::Hostname("hostname is not valid UTF-8".to_string()))
}

fn unix_timestamp(moment: SystemTime) -> Result<i64, EngineError> {
    let since_epoch = moment
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_err(|err| EngineError::Clock(err.to_string()))?;
    i64::try_from(since_epoch.as_secs()).map_err(|_| EngineError::Clock("clock out of range".into()))
}

/// Fresh generation: every previous snapshot in the backup path goes away
/// so increment 0 is the only member on completion.
fn discard_old_snapshots(dir: &Path, dryrun: bool) -> Result<(), EngineError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.ends_with(SNAPSHOT_SUFFIX) {
            continue;
        }
        if dryrun {
            info!(file = name, "dry-run: would remove old snapshot");
        } else {
            info!(file = name, "removing old snapshot");
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Removes delta spill files orphaned by an earlier crash or kill.
fn sweep_stale_spill_files(dir: &Path, run_start: SystemTime) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(DELTA_PREFIX) {
            continue;
        }
        let stale = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .map(|modified| modified < run_start)
            .unwrap_or(false);
        if stale {
            warn!(file = name, "removing stale delta spill file");
            let _ = fs::remove_file(entry.path());
        }
    }
}

fn abort_cleanup(snapshot: &Path, inprogress: &Path) {
    if let Err(err) = fs::remove_file(snapshot) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %snapshot.display(), %err, "failed to remove partial snapshot");
        }
    }
    if let Err(err) = fs::remove_file(inprogress) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %inprogress.display(), %err, "failed to remove in-progress cache");
        }
    }
}
