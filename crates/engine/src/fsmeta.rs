//! Filesystem metadata helpers: classification and attribute capture.

use std::fs::Metadata as FsMetadata;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;

use snapshot::Metadata;
use tracing::warn;

/// How the engine treats one directory entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum EntryClass {
    /// Walked into and recorded as metadata-only.
    Directory,
    /// Target read and recorded as content.
    Symlink,
    /// Content opened, signed, and streamed.
    Regular,
    /// Recorded as metadata-only; content never opened.
    Special,
    /// Skipped entirely; not recorded and not preserved.
    Socket,
}

/// Classifies an entry from its (symlink-aware) metadata.
///
/// Modes the engine does not recognise fall through to the regular-file
/// path, with a warning; device nodes are never read as files regardless.
pub(crate) fn classify(path: &Path, meta: &FsMetadata) -> EntryClass {
    let file_type = meta.file_type();
    if file_type.is_dir() {
        EntryClass::Directory
    } else if file_type.is_symlink() {
        EntryClass::Symlink
    } else if file_type.is_file() {
        EntryClass::Regular
    } else if file_type.is_socket() {
        EntryClass::Socket
    } else if file_type.is_block_device() || file_type.is_char_device() || file_type.is_fifo() {
        EntryClass::Special
    } else {
        warn!(path = %path.display(), mode = format_args!("{:o}", meta.mode()),
            "unrecognised file mode; treating as regular file");
        EntryClass::Regular
    }
}

/// Captures the record metadata for an entry.
///
/// Size is recorded only for regular files; non-regular entries carry
/// size zero, matching what a tombstone-free record stream promises.
pub(crate) fn capture(path_bytes: Vec<u8>, meta: &FsMetadata, class: EntryClass) -> Metadata {
    let size = match class {
        EntryClass::Regular => meta.size(),
        _ => 0,
    };
    Metadata {
        path: path_bytes,
        mode: meta.mode(),
        uid: meta.uid(),
        gid: meta.gid(),
        mtime: meta.mtime(),
        size,
    }
}

/// Metadata-only signature for directories, devices, and fifos.
pub(crate) fn meta_signature(meta: &Metadata) -> Vec<u8> {
    delta::metadata_digest(meta.mode, meta.uid, meta.gid, meta.size, meta.mtime, None).to_vec()
}
