//! Streaming snapshot reader: file → unseal → gunzip → records.

use std::io::{Read, Write, copy, sink};

use envelope::{SealedReader, SecretKey};
use flate2::read::GzDecoder;

use crate::error::SnapshotError;
use crate::record::{Metadata, RecordKind, read_header};
use crate::{FORMAT_VERSION, MAGIC};

/// Fixed header parsed from the front of the record stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotHeader {
    /// Format version the file was written with.
    pub format_version: u16,
    /// Hostname of the producing machine.
    pub hostname: String,
    /// Generation base timestamp, unix seconds.
    pub base_timestamp: i64,
    /// Increment within the generation.
    pub increment: u16,
}

/// One record header; the payload is consumed through the reader.
#[derive(Clone, Debug)]
pub struct Record {
    /// Path attributes.
    pub meta: Metadata,
    /// Payload semantics.
    pub kind: RecordKind,
    /// Exact payload length following the header.
    pub payload_len: u64,
}

/// Iterates the records of one snapshot file.
///
/// The payload of the current record must be consumed (or is skipped
/// automatically) before the next call to [`Self::next_record`]; the
/// underlying stream has no seek.
pub struct SnapshotReader<R: Read> {
    decoder: GzDecoder<SealedReader<R>>,
    header: SnapshotHeader,
    pending_payload: u64,
}

impl<R: Read> SnapshotReader<R> {
    /// Unseals `source` with `secret` and parses the snapshot header.
    pub fn open(source: R, secret: &SecretKey) -> Result<Self, SnapshotError> {
        let sealed = SealedReader::new(source, secret)?;
        let mut decoder = GzDecoder::new(sealed);

        let mut magic = [0u8; 4];
        decoder.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(SnapshotError::Corrupt("bad magic"));
        }
        let format_version = read_u16(&mut decoder)?;
        if format_version != FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                version: format_version,
            });
        }
        let hostname_len = read_u16(&mut decoder)? as usize;
        let mut hostname = vec![0u8; hostname_len];
        decoder.read_exact(&mut hostname)?;
        let hostname =
            String::from_utf8(hostname).map_err(|_| SnapshotError::Corrupt("hostname not UTF-8"))?;
        let base_timestamp = read_i64(&mut decoder)?;
        let increment = read_u16(&mut decoder)?;

        Ok(Self {
            decoder,
            header: SnapshotHeader {
                format_version,
                hostname,
                base_timestamp,
                increment,
            },
            pending_payload: 0,
        })
    }

    /// The parsed snapshot header.
    #[must_use]
    pub fn header(&self) -> &SnapshotHeader {
        &self.header
    }

    /// Advances to the next record, skipping any unconsumed payload.
    pub fn next_record(&mut self) -> Result<Option<Record>, SnapshotError> {
        self.skip_payload()?;
        match read_header(&mut self.decoder)? {
            Some((meta, kind, payload_len)) => {
                self.pending_payload = payload_len;
                Ok(Some(Record {
                    meta,
                    kind,
                    payload_len,
                }))
            }
            None => Ok(None),
        }
    }

    /// Streams the current record's payload into `out`.
    pub fn copy_payload<W: Write>(&mut self, out: &mut W) -> Result<u64, SnapshotError> {
        let expected = self.pending_payload;
        let mut taken = (&mut self.decoder).take(expected);
        let copied = copy(&mut taken, out)?;
        self.pending_payload = 0;
        if copied != expected {
            return Err(SnapshotError::ShortPayload {
                expected,
                actual: copied,
            });
        }
        Ok(copied)
    }

    /// Reads the current record's payload into memory.
    pub fn payload_bytes(&mut self) -> Result<Vec<u8>, SnapshotError> {
        let mut buf = Vec::with_capacity(usize::try_from(self.pending_payload).unwrap_or(0));
        self.copy_payload(&mut buf)?;
        Ok(buf)
    }

    /// Discards the current record's payload.
    pub fn skip_payload(&mut self) -> Result<(), SnapshotError> {
        if self.pending_payload > 0 {
            self.copy_payload(&mut sink())?;
        }
        Ok(())
    }
}

fn read_u16<R: Read>(reader: &mut R) -> Result<u16, SnapshotError> {
    let mut bytes = [0u8; 2];
    reader.read_exact(&mut bytes)?;
    Ok(u16::from_le_bytes(bytes))
}

fn read_i64<R: Read>(reader: &mut R) -> Result<i64, SnapshotError> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(i64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Cursor;

    use envelope::SecretKey;

    use super::SnapshotReader;
    use crate::record::{Metadata, RecordKind};
    use crate::writer::{SnapshotOptions, SnapshotWriter};

    fn meta(path: &[u8], size: u64) -> Metadata {
        Metadata {
            path: path.to_vec(),
            mode: 0o100644,
            uid: 0,
            gid: 0,
            mtime: 1_700_000_000,
            size,
        }
    }

    #[test]
    fn writer_reader_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (secret, public) = SecretKey::generate().unwrap();

        let mut writer = SnapshotWriter::create(
            &public,
            &SnapshotOptions {
                dir: dir.path(),
                hostname: "unit-host",
                base_timestamp: 1_700_000_000,
                increment: 2,
                gzip_level: 6,
                uid: nix::unistd::Uid::effective().as_raw(),
                gid: nix::unistd::Gid::effective().as_raw(),
            },
        )
        .unwrap();

        let payload = b"file contents here";
        writer
            .add(
                &meta(b"/src/a.txt", payload.len() as u64),
                RecordKind::Full,
                Some(&mut Cursor::new(payload)),
                payload.len() as u64,
            )
            .unwrap();
        writer
            .add(
                &Metadata::tombstone(b"/src/gone".to_vec()),
                RecordKind::Tombstone,
                None,
                0,
            )
            .unwrap();
        let path = writer.path().to_path_buf();
        let bytes = writer.close().unwrap();
        assert!(bytes > 0);
        assert!(path.file_name().unwrap().to_str().unwrap().ends_with("-unit-host-2.gz.enc"));

        let mut reader = SnapshotReader::open(File::open(&path).unwrap(), &secret).unwrap();
        assert_eq!(reader.header().hostname, "unit-host");
        assert_eq!(reader.header().base_timestamp, 1_700_000_000);
        assert_eq!(reader.header().increment, 2);

        let first = reader.next_record().unwrap().unwrap();
        assert_eq!(first.meta.path, b"/src/a.txt");
        assert_eq!(first.kind, RecordKind::Full);
        assert_eq!(reader.payload_bytes().unwrap(), payload);

        let second = reader.next_record().unwrap().unwrap();
        assert_eq!(second.kind, RecordKind::Tombstone);
        assert_eq!(second.meta.mode, 0);
        assert_eq!(second.payload_len, 0);

        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn unconsumed_payload_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (secret, public) = SecretKey::generate().unwrap();

        let mut writer = SnapshotWriter::create(
            &public,
            &SnapshotOptions {
                dir: dir.path(),
                hostname: "h",
                base_timestamp: 0,
                increment: 0,
                gzip_level: 1,
                uid: nix::unistd::Uid::effective().as_raw(),
                gid: nix::unistd::Gid::effective().as_raw(),
            },
        )
        .unwrap();

        for index in 0..3u8 {
            let payload = vec![index; 1000];
            writer
                .add(
                    &meta(format!("/f{index}").as_bytes(), 1000),
                    RecordKind::Full,
                    Some(&mut Cursor::new(&payload)),
                    1000,
                )
                .unwrap();
        }
        let path = writer.path().to_path_buf();
        writer.close().unwrap();

        let mut reader = SnapshotReader::open(File::open(&path).unwrap(), &secret).unwrap();
        // Never touch payloads; iteration must still see every record.
        let mut count = 0;
        while reader.next_record().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn short_payload_reader_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (_, public) = SecretKey::generate().unwrap();

        let mut writer = SnapshotWriter::create(
            &public,
            &SnapshotOptions {
                dir: dir.path(),
                hostname: "h",
                base_timestamp: 0,
                increment: 0,
                gzip_level: 6,
                uid: nix::unistd::Uid::effective().as_raw(),
                gid: nix::unistd::Gid::effective().as_raw(),
            },
        )
        .unwrap();

        let short = b"only ten b";
        let result = writer.add(
            &meta(b"/truncated", 100),
            RecordKind::Full,
            Some(&mut Cursor::new(short)),
            100,
        );
        assert!(result.is_err());
    }
}
