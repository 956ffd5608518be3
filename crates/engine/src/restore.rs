//! Restore: select the newest generation and replay its snapshots.
//!
//! Snapshots of a generation are cumulative, so restore applies increment
//! 0 first and each later increment on top, in order. Records are applied
//! in stream order, which matches the producing walk order: directories
//! arrive before their children, tombstones last.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use envelope::SecretKey;
use filetime::FileTime;
use snapshot::{Metadata, Record, RecordKind, SnapshotName, SnapshotReader};
use tracing::{debug, info, warn};

use crate::error::EngineError;

/// Outcome of one restore operation.
#[derive(Clone, Debug, Default)]
pub struct RestoreSummary {
    /// Snapshot files applied, in increment order.
    pub snapshots_applied: u32,
    /// Records that created or updated something under the destination.
    pub restored: u64,
    /// Tombstones that removed something.
    pub deleted: u64,
    /// Records skipped by the path filter.
    pub filtered: u64,
    /// Delta records whose predecessor content was missing.
    pub corrupt: u64,
}

/// Restores the most recent generation under `backuppath` into `dest`.
///
/// `path_filter` restricts application to matching record paths;
/// `ceiling` stops after the given increment (default: all). A chain that
/// does not start at increment 0 or has gaps is refused outright rather
/// than producing a silently truncated tree.
pub fn restore(
    secret: &SecretKey,
    backuppath: &Path,
    dest: &Path,
    path_filter: Option<&regex::bytes::Regex>,
    ceiling: Option<u16>,
) -> Result<RestoreSummary, EngineError> {
    let members = select_generation(backuppath, ceiling)?;
    fs::create_dir_all(dest)?;

    let mut summary = RestoreSummary::default();
    for (increment, path) in members {
        debug!(file = %path.display(), increment, "applying snapshot");
        let mut reader = SnapshotReader::open(File::open(&path)?, secret)?;
        while let Some(record) = reader.next_record()? {
            if let Some(filter) = path_filter {
                if !filter.is_match(&record.meta.path) {
                    summary.filtered += 1;
                    continue;
                }
            }
            apply_record(dest, &record, &mut reader, &mut summary)?;
        }
        summary.snapshots_applied += 1;
    }

    info!(
        snapshots = summary.snapshots_applied,
        restored = summary.restored,
        deleted = summary.deleted,
        corrupt = summary.corrupt,
        "restore complete"
    );
    Ok(summary)
}

/// Picks the newest generation's members up to `ceiling` and verifies the
/// increment chain is complete.
fn select_generation(
    backuppath: &Path,
    ceiling: Option<u16>,
) -> Result<Vec<(u16, PathBuf)>, EngineError> {
    let mut by_generation: BTreeMap<(String, String), BTreeMap<u16, PathBuf>> = BTreeMap::new();
    for entry in fs::read_dir(backuppath)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(parsed) = SnapshotName::parse(name) else {
            continue;
        };
        by_generation
            .entry((parsed.stamp, parsed.hostname))
            .or_default()
            .insert(parsed.increment, entry.path());
    }

    // Stamps are fixed-width digits, so the map order is chronological and
    // the last entry is the newest generation.
    let Some(((stamp, hostname), increments)) = by_generation.into_iter().next_back() else {
        return Err(EngineError::NoSnapshots(backuppath.to_path_buf()));
    };

    let ceiling = ceiling.unwrap_or(u16::MAX);
    let members: Vec<(u16, PathBuf)> = increments
        .into_iter()
        .filter(|(increment, _)| *increment <= ceiling)
        .collect();

    if members.is_empty() {
        return Err(EngineError::BrokenChain(format!(
            "generation {stamp}-{hostname} has no increments at or below {ceiling}"
        )));
    }
    for (expected, (increment, _)) in members.iter().enumerate() {
        if usize::from(*increment) != expected {
            return Err(EngineError::BrokenChain(format!(
                "generation {stamp}-{hostname} is missing increment {expected}"
            )));
        }
    }

    Ok(members)
}

/// Applies one record under `dest`.
fn apply_record<R: std::io::Read>(
    dest: &Path,
    record: &Record,
    reader: &mut SnapshotReader<R>,
    summary: &mut RestoreSummary,
) -> Result<(), EngineError> {
    let Some(target) = target_path(dest, &record.meta.path) else {
        warn!("record path does not map under destination; skipping");
        return Ok(());
    };

    match record.kind {
        RecordKind::Tombstone => {
            remove_existing(&target);
            summary.deleted += 1;
        }
        RecordKind::Meta => {
            apply_meta_record(&target, &record.meta)?;
            summary.restored += 1;
        }
        RecordKind::Full => {
            ensure_parent(&target)?;
            if is_symlink(record.meta.mode) {
                let link = reader.payload_bytes()?;
                replace_symlink(&target, &link, &record.meta)?;
            } else {
                prepare_regular_target(&target);
                let mut file = File::create(&target)?;
                reader.copy_payload(&mut file)?;
                drop(file);
                apply_attributes(&target, &record.meta, false);
            }
            summary.restored += 1;
        }
        RecordKind::Delta => {
            ensure_parent(&target)?;
            let encoded = reader.payload_bytes()?;
            let previous = if is_symlink(record.meta.mode) {
                fs::read_link(&target)
                    .map(|link| link.as_os_str().as_bytes().to_vec())
                    .ok()
            } else {
                fs::read(&target).ok()
            };
            let Some(previous) = previous else {
                warn!(path = %target.display(),
                    "delta record without predecessor content; chain corrupt for this path");
                summary.corrupt += 1;
                return Ok(());
            };
            let mut rebuilt = Vec::new();
            delta::apply_delta(&previous, &encoded, &mut rebuilt)?;
            if is_symlink(record.meta.mode) {
                replace_symlink(&target, &rebuilt, &record.meta)?;
            } else {
                fs::write(&target, &rebuilt)?;
                apply_attributes(&target, &record.meta, false);
            }
            summary.restored += 1;
        }
    }
    Ok(())
}

/// Creates or updates a directory, fifo, or device node.
fn apply_meta_record(target: &Path, meta: &Metadata) -> Result<(), EngineError> {
    ensure_parent(target)?;
    let file_type = meta.mode & u32::from(libc::S_IFMT);
    if file_type == u32::from(libc::S_IFDIR) {
        if fs::symlink_metadata(target).map(|m| !m.is_dir()).unwrap_or(false) {
            remove_existing(target);
        }
        fs::create_dir_all(target)?;
    } else if fs::symlink_metadata(target).is_err() {
        let mode = nix::sys::stat::Mode::from_bits_truncate(meta.permissions() as libc::mode_t);
        if file_type == u32::from(libc::S_IFIFO) {
            nix::unistd::mkfifo(target, mode).map_err(|errno| EngineError::Io(errno.into()))?;
        } else {
            // Block and character records carry no device numbers, so a
            // faithful node cannot be rebuilt; mknod is attempted for the
            // type bits and degrades to a warning without privilege.
            let kind = if file_type == u32::from(libc::S_IFBLK) {
                nix::sys::stat::SFlag::S_IFBLK
            } else {
                nix::sys::stat::SFlag::S_IFCHR
            };
            if let Err(errno) = nix::sys::stat::mknod(target, kind, mode, 0) {
                warn!(path = %target.display(), %errno, "cannot recreate device node");
                return Ok(());
            }
        }
    }
    apply_attributes(target, meta, false);
    Ok(())
}

/// Maps a record's absolute path underneath the destination directory.
fn target_path(dest: &Path, record_path: &[u8]) -> Option<PathBuf> {
    let relative = record_path.strip_prefix(b"/").unwrap_or(record_path);
    if relative.is_empty() {
        return None;
    }
    let relative = Path::new(OsStr::from_bytes(relative));
    // Reject escapes; record paths come from our own walker but the
    // snapshot is still external input.
    if relative
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return None;
    }
    Some(dest.join(relative))
}

fn ensure_parent(target: &Path) -> Result<(), EngineError> {
    if let Some(parent) = target.parent() {
        // Created permissive; a later directory record fixes the modes.
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn is_symlink(mode: u32) -> bool {
    mode & u32::from(libc::S_IFMT) == u32::from(libc::S_IFLNK)
}

fn remove_existing(target: &Path) {
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => {
            if let Err(err) = fs::remove_dir_all(target) {
                warn!(path = %target.display(), %err, "cannot remove directory");
            }
        }
        Ok(_) => {
            if let Err(err) = fs::remove_file(target) {
                warn!(path = %target.display(), %err, "cannot remove entry");
            }
        }
        Err(_) => {}
    }
}

/// Clears anything that would make a plain `File::create` misbehave: a
/// directory cannot be truncated, and creating through a symlink would
/// write to the link's destination instead of replacing the link.
fn prepare_regular_target(target: &Path) {
    if fs::symlink_metadata(target)
        .map(|m| m.is_dir() || m.file_type().is_symlink())
        .unwrap_or(false)
    {
        remove_existing(target);
    }
}

fn replace_symlink(target: &Path, link: &[u8], meta: &Metadata) -> Result<(), EngineError> {
    if fs::symlink_metadata(target).is_ok() {
        remove_existing(target);
    }
    std::os::unix::fs::symlink(Path::new(OsStr::from_bytes(link)), target)?;
    apply_attributes(target, meta, true);
    Ok(())
}

/// Applies mode, owner, and mtime; ownership degrades to a warning when
/// the process lacks privilege.
fn apply_attributes(target: &Path, meta: &Metadata, symlink: bool) {
    if !symlink {
        if let Err(err) = fs::set_permissions(target, fs::Permissions::from_mode(meta.permissions()))
        {
            warn!(path = %target.display(), %err, "cannot set permissions");
        }
    }

    let chown_result = if symlink {
        std::os::unix::fs::lchown(target, Some(meta.uid), Some(meta.gid))
    } else {
        std::os::unix::fs::chown(target, Some(meta.uid), Some(meta.gid))
    };
    if let Err(err) = chown_result {
        debug!(path = %target.display(), %err, "cannot set ownership");
    }

    let mtime = FileTime::from_unix_time(meta.mtime, 0);
    let times_result = if symlink {
        filetime::set_symlink_file_times(target, mtime, mtime)
    } else {
        filetime::set_file_times(target, mtime, mtime)
    };
    if let Err(err) = times_result {
        warn!(path = %target.display(), %err, "cannot set mtime");
    }
}
