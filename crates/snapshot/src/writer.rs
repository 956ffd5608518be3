//! Append-only snapshot writer: records → gzip → sealed envelope → file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use envelope::{PublicKey, SealedWriter};
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, warn};

use crate::error::SnapshotError;
use crate::name::SnapshotName;
use crate::record::{Metadata, RecordKind, write_header};
use crate::{FORMAT_VERSION, MAGIC};

/// Copy granularity when streaming payload bytes into the record stream.
const COPY_CHUNK: usize = 64 * 1024;

/// Everything needed to open a snapshot for one run.
pub struct SnapshotOptions<'a> {
    /// Directory the snapshot lands in.
    pub dir: &'a Path,
    /// Hostname written into the header and the file name.
    pub hostname: &'a str,
    /// Generation base timestamp, unix seconds.
    pub base_timestamp: i64,
    /// Increment within the generation.
    pub increment: u16,
    /// gzip level, 0-9.
    pub gzip_level: u32,
    /// Owner uid for the output file.
    pub uid: u32,
    /// Owner gid for the output file.
    pub gid: u32,
}

/// Strictly append-only builder for one snapshot file.
///
/// Records are written in call order through gzip into the sealed
/// envelope. The file only counts as committed after [`Self::close`]; on
/// any earlier failure the caller deletes the partial file.
pub struct SnapshotWriter {
    encoder: GzEncoder<SealedWriter<File>>,
    path: PathBuf,
    records: u64,
}

impl SnapshotWriter {
    /// Creates the output file, stacks the envelope and gzip encoders, and
    /// writes the snapshot header.
    pub fn create(recipient: &PublicKey, opts: &SnapshotOptions<'_>) -> Result<Self, SnapshotError> {
        let name = SnapshotName::format(opts.base_timestamp, opts.hostname, opts.increment)?;
        let path = opts.dir.join(&name);

        let mut open = OpenOptions::new();
        open.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            open.mode(0o640);
        }
        let file = open.open(&path)?;
        chown_best_effort(&path, opts.uid, opts.gid);

        let sealed = SealedWriter::new(file, recipient)?;
        let mut encoder = GzEncoder::new(sealed, Compression::new(opts.gzip_level.min(9)));

        let hostname_len =
            u16::try_from(opts.hostname.len()).map_err(|_| SnapshotError::HostnameTooLong)?;
        encoder.write_all(&MAGIC)?;
        encoder.write_all(&FORMAT_VERSION.to_le_bytes())?;
        encoder.write_all(&hostname_len.to_le_bytes())?;
        encoder.write_all(opts.hostname.as_bytes())?;
        encoder.write_all(&opts.base_timestamp.to_le_bytes())?;
        encoder.write_all(&opts.increment.to_le_bytes())?;

        debug!(path = %path.display(), increment = opts.increment, "opened snapshot");
        Ok(Self {
            encoder,
            path,
            records: 0,
        })
    }

    /// Appends one record, streaming exactly `payload_len` bytes from
    /// `payload` when one is supplied.
    pub fn add(
        &mut self,
        meta: &Metadata,
        kind: RecordKind,
        payload: Option<&mut dyn Read>,
        payload_len: u64,
    ) -> Result<(), SnapshotError> {
        write_header(&mut self.encoder, meta, kind, payload_len)?;

        if let Some(reader) = payload {
            let mut remaining = payload_len;
            let mut buf = [0u8; COPY_CHUNK];
            while remaining > 0 {
                let want = remaining.min(COPY_CHUNK as u64) as usize;
                let got = reader.read(&mut buf[..want])?;
                if got == 0 {
                    return Err(SnapshotError::ShortPayload {
                        expected: payload_len,
                        actual: payload_len - remaining,
                    });
                }
                self.encoder.write_all(&buf[..got])?;
                remaining -= got as u64;
            }
        } else if payload_len != 0 {
            return Err(SnapshotError::ShortPayload {
                expected: payload_len,
                actual: 0,
            });
        }

        self.records += 1;
        Ok(())
    }

    /// Finishes gzip, seals the envelope, fsyncs, and closes the file.
    ///
    /// Returns the number of encrypted bytes on disk.
    pub fn close(self) -> Result<u64, SnapshotError> {
        let sealed = self.encoder.finish()?;
        let file = sealed.finish()?;
        file.sync_all()?;
        let bytes = file.metadata()?.len();
        debug!(path = %self.path.display(), records = self.records, bytes, "closed snapshot");
        Ok(bytes)
    }

    /// Final path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended so far.
    #[must_use]
    pub const fn records(&self) -> u64 {
        self.records
    }
}

/// Chowns the snapshot to the configured owner, degrading to a warning
/// when the process lacks the privilege (typical in tests).
fn chown_best_effort(path: &Path, uid: u32, gid: u32) {
    #[cfg(unix)]
    {
        use nix::unistd::{Gid, Uid, chown};
        if let Err(err) = chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid))) {
            warn!(path = %path.display(), uid, gid, %err, "failed to chown snapshot");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (path, uid, gid);
    }
}
