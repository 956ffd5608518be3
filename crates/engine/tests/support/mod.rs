//! Shared fixtures for the engine integration tests.
#![allow(dead_code)]

use std::fs::File;
use std::path::{Path, PathBuf};

use config::BackupConfig;
use envelope::{PublicKey, SecretKey};
use regex::bytes::RegexSet;
use snapshot::{Record, SnapshotReader};

/// Generates an in-memory keypair for one test.
pub fn keypair() -> (SecretKey, PublicKey) {
    SecretKey::generate().expect("key generation")
}

/// Name of the group the test process runs as; always resolvable.
pub fn own_group() -> String {
    let gid = uzers::get_effective_gid();
    uzers::get_group_by_gid(gid)
        .expect("effective group exists")
        .name()
        .to_string_lossy()
        .into_owned()
}

/// Backup configuration pointing one source root at one backup dir.
pub fn config_for(src: &Path, backuppath: &Path) -> BackupConfig {
    BackupConfig {
        backuppath: backuppath.to_path_buf(),
        group: own_group(),
        paths: vec![src.to_path_buf()],
        excludes: RegexSet::empty(),
        pubkeyfile: PathBuf::from("/unused/in/tests"),
        maxintervals: 30,
        gzlevel: 6,
        dryrun: false,
    }
}

/// All committed snapshot files under `backuppath`, sorted by name.
pub fn snapshot_files(backuppath: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(backuppath)
        .expect("backup dir readable")
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(".gz.enc"))
        })
        .collect();
    files.sort();
    files
}

/// Decrypts one snapshot and collects `(path, kind, payload)` per record.
pub fn read_records(file: &Path, secret: &SecretKey) -> Vec<(Vec<u8>, snapshot::RecordKind, Vec<u8>)> {
    let mut reader =
        SnapshotReader::open(File::open(file).expect("snapshot opens"), secret).expect("unseals");
    let mut records = Vec::new();
    loop {
        let record: Option<Record> = reader.next_record().expect("record parses");
        let Some(record) = record else { break };
        let payload = reader.payload_bytes().expect("payload reads");
        records.push((record.meta.path.clone(), record.kind, payload));
    }
    records
}

/// Strips a test root prefix from recorded paths for readable assertions.
pub fn relative_paths(records: &[(Vec<u8>, snapshot::RecordKind, Vec<u8>)], root: &Path) -> Vec<String> {
    let root = root.to_string_lossy().into_owned();
    records
        .iter()
        .map(|(path, _, _)| {
            let path = String::from_utf8_lossy(path).into_owned();
            path.strip_prefix(&root).unwrap_or(&path).to_string()
        })
        .collect()
}
