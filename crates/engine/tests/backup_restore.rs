//! End-to-end scenarios: first run, incremental change, deletion, restore.

mod support;

use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt, symlink};

use engine::{Cancel, backup, restore};
use snapshot::RecordKind;
use support::{config_for, keypair, read_records, relative_paths, snapshot_files};

#[test]
fn first_run_records_everything_as_full_content() {
    let src_dir = tempfile::tempdir().unwrap();
    let dst_dir = tempfile::tempdir().unwrap();
    let src = src_dir.path().canonicalize().unwrap();

    fs::write(src.join("a.txt"), b"hello\n").unwrap();
    fs::create_dir(src.join("d")).unwrap();
    fs::write(src.join("d/b.txt"), b"world\n").unwrap();

    let (secret, public) = keypair();
    let config = config_for(&src, dst_dir.path());
    let summary = backup(&Cancel::new(), &public, &config).unwrap();

    assert_eq!(summary.increment, 0);
    assert_eq!(summary.added, 4); // root dir, a.txt, d, d/b.txt
    assert_eq!(summary.deleted, 0);

    let files = snapshot_files(dst_dir.path());
    assert_eq!(files.len(), 1);
    let name = files[0].file_name().unwrap().to_str().unwrap();
    assert!(name.ends_with("-0.gz.enc"), "unexpected name {name}");

    let records = read_records(&files[0], &secret);
    let paths = relative_paths(&records, &src);
    assert_eq!(paths, vec!["", "/a.txt", "/d", "/d/b.txt"]);
    assert_eq!(records[0].1, RecordKind::Meta);
    assert_eq!(records[1].1, RecordKind::Full);
    assert_eq!(records[1].2, b"hello\n");
    assert_eq!(records[2].1, RecordKind::Meta);
    assert_eq!(records[3].1, RecordKind::Full);
    assert_eq!(records[3].2, b"world\n");

    assert!(dst_dir.path().join("sig.cache").exists());
    assert!(!dst_dir.path().join("sig.cache.inprogress").exists());
}

#[test]
fn second_run_emits_only_the_changed_file_as_delta() {
    let src_dir = tempfile::tempdir().unwrap();
    let dst_dir = tempfile::tempdir().unwrap();
    let src = src_dir.path().canonicalize().unwrap();

    fs::write(src.join("a.txt"), b"hello\n").unwrap();
    fs::create_dir(src.join("d")).unwrap();
    fs::write(src.join("d/b.txt"), b"world\n").unwrap();

    let (secret, public) = keypair();
    let config = config_for(&src, dst_dir.path());
    backup(&Cancel::new(), &public, &config).unwrap();

    let mut content = fs::read(src.join("a.txt")).unwrap();
    content.extend_from_slice(b"!\n");
    fs::write(src.join("a.txt"), &content).unwrap();

    let summary = backup(&Cancel::new(), &public, &config).unwrap();
    assert_eq!(summary.increment, 1);
    assert_eq!(summary.changed, 1);
    assert_eq!(summary.added, 0);
    assert_eq!(summary.unchanged, 3);

    let files = snapshot_files(dst_dir.path());
    assert_eq!(files.len(), 2);

    let records = read_records(&files[1], &secret);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].1, RecordKind::Delta);
    assert!(String::from_utf8_lossy(&records[0].0).ends_with("/a.txt"));
}

#[test]
fn deletion_is_tombstoned_and_restore_honours_it() {
    let src_dir = tempfile::tempdir().unwrap();
    let dst_dir = tempfile::tempdir().unwrap();
    let src = src_dir.path().canonicalize().unwrap();

    fs::write(src.join("a.txt"), b"hello\n").unwrap();
    fs::create_dir(src.join("d")).unwrap();
    fs::write(src.join("d/b.txt"), b"world\n").unwrap();

    let (secret, public) = keypair();
    let config = config_for(&src, dst_dir.path());
    backup(&Cancel::new(), &public, &config).unwrap();

    let mut content = fs::read(src.join("a.txt")).unwrap();
    content.extend_from_slice(b"!\n");
    fs::write(src.join("a.txt"), &content).unwrap();
    backup(&Cancel::new(), &public, &config).unwrap();

    fs::remove_file(src.join("d/b.txt")).unwrap();
    let summary = backup(&Cancel::new(), &public, &config).unwrap();
    assert_eq!(summary.deleted, 1);

    let files = snapshot_files(dst_dir.path());
    let records = read_records(&files[2], &secret);
    let tombstones: Vec<_> = records
        .iter()
        .filter(|(_, kind, _)| *kind == RecordKind::Tombstone)
        .collect();
    assert_eq!(tombstones.len(), 1);
    assert!(String::from_utf8_lossy(&tombstones[0].0).ends_with("/d/b.txt"));

    // Full restore reproduces the final state: b.txt gone, a.txt updated.
    let restore_dir = tempfile::tempdir().unwrap();
    restore(&secret, dst_dir.path(), restore_dir.path(), None, None).unwrap();
    let restored_root = restore_dir.path().join(src.strip_prefix("/").unwrap());
    assert_eq!(fs::read(restored_root.join("a.txt")).unwrap(), b"hello\n!\n");
    assert!(restored_root.join("d").is_dir());
    assert!(!restored_root.join("d/b.txt").exists());

    // Ceiling 1 restores the state before the deletion.
    let earlier_dir = tempfile::tempdir().unwrap();
    restore(&secret, dst_dir.path(), earlier_dir.path(), None, Some(1)).unwrap();
    let earlier_root = earlier_dir.path().join(src.strip_prefix("/").unwrap());
    assert_eq!(fs::read(earlier_root.join("d/b.txt")).unwrap(), b"world\n");
}

#[test]
fn restore_reproduces_attributes_and_symlinks() {
    let src_dir = tempfile::tempdir().unwrap();
    let dst_dir = tempfile::tempdir().unwrap();
    let src = src_dir.path().canonicalize().unwrap();

    fs::write(src.join("file"), b"attribute carrier").unwrap();
    fs::set_permissions(src.join("file"), fs::Permissions::from_mode(0o640)).unwrap();
    filetime::set_file_mtime(
        src.join("file"),
        filetime::FileTime::from_unix_time(1_600_000_000, 0),
    )
    .unwrap();
    symlink("file", src.join("link")).unwrap();

    let (secret, public) = keypair();
    let config = config_for(&src, dst_dir.path());
    backup(&Cancel::new(), &public, &config).unwrap();

    let restore_dir = tempfile::tempdir().unwrap();
    restore(&secret, dst_dir.path(), restore_dir.path(), None, None).unwrap();
    let root = restore_dir.path().join(src.strip_prefix("/").unwrap());

    let meta = fs::metadata(root.join("file")).unwrap();
    assert_eq!(meta.permissions().mode() & 0o7777, 0o640);
    assert_eq!(meta.mtime(), 1_600_000_000);

    let link = fs::read_link(root.join("link")).unwrap();
    assert_eq!(link.to_str().unwrap(), "file");
}

#[test]
fn changed_symlink_target_travels_as_delta_and_restores() {
    let src_dir = tempfile::tempdir().unwrap();
    let dst_dir = tempfile::tempdir().unwrap();
    let src = src_dir.path().canonicalize().unwrap();

    fs::write(src.join("one"), b"1").unwrap();
    fs::write(src.join("two"), b"2").unwrap();
    symlink("one", src.join("current")).unwrap();

    let (secret, public) = keypair();
    let config = config_for(&src, dst_dir.path());
    backup(&Cancel::new(), &public, &config).unwrap();

    fs::remove_file(src.join("current")).unwrap();
    symlink("two", src.join("current")).unwrap();
    backup(&Cancel::new(), &public, &config).unwrap();

    // Recreating the link also touched the source directory, so the
    // increment may carry a directory record as well; find the link.
    let files = snapshot_files(dst_dir.path());
    let records = read_records(&files[1], &secret);
    let link_record = records
        .iter()
        .find(|(path, _, _)| String::from_utf8_lossy(path).ends_with("/current"))
        .expect("link record present");
    assert_eq!(link_record.1, RecordKind::Delta);

    let restore_dir = tempfile::tempdir().unwrap();
    restore(&secret, dst_dir.path(), restore_dir.path(), None, None).unwrap();
    let root = restore_dir.path().join(src.strip_prefix("/").unwrap());
    assert_eq!(fs::read_link(root.join("current")).unwrap().to_str().unwrap(), "two");
}

#[test]
fn restore_path_filter_limits_application() {
    let src_dir = tempfile::tempdir().unwrap();
    let dst_dir = tempfile::tempdir().unwrap();
    let src = src_dir.path().canonicalize().unwrap();

    fs::write(src.join("keep.txt"), b"keep").unwrap();
    fs::write(src.join("drop.txt"), b"drop").unwrap();

    let (secret, public) = keypair();
    let config = config_for(&src, dst_dir.path());
    backup(&Cancel::new(), &public, &config).unwrap();

    let restore_dir = tempfile::tempdir().unwrap();
    let filter = regex::bytes::Regex::new(r"keep\.txt$").unwrap();
    restore(&secret, dst_dir.path(), restore_dir.path(), Some(&filter), None).unwrap();
    let root = restore_dir.path().join(src.strip_prefix("/").unwrap());
    assert!(root.join("keep.txt").exists());
    assert!(!root.join("drop.txt").exists());
}

#[test]
fn large_file_change_round_trips_through_delta() {
    let src_dir = tempfile::tempdir().unwrap();
    let dst_dir = tempfile::tempdir().unwrap();
    let src = src_dir.path().canonicalize().unwrap();

    // Big enough for many blocks, small enough to stay in-memory.
    let mut content: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
    fs::write(src.join("blob"), &content).unwrap();

    let (secret, public) = keypair();
    let config = config_for(&src, dst_dir.path());
    backup(&Cancel::new(), &public, &config).unwrap();

    content.splice(150_000..150_000, b"inserted run".iter().copied());
    fs::write(src.join("blob"), &content).unwrap();
    backup(&Cancel::new(), &public, &config).unwrap();

    let restore_dir = tempfile::tempdir().unwrap();
    restore(&secret, dst_dir.path(), restore_dir.path(), None, None).unwrap();
    let root = restore_dir.path().join(src.strip_prefix("/").unwrap());
    assert_eq!(fs::read(root.join("blob")).unwrap(), content);
}

#[test]
fn empty_roots_still_produce_a_valid_snapshot() {
    let src_dir = tempfile::tempdir().unwrap();
    let dst_dir = tempfile::tempdir().unwrap();
    let src = src_dir.path().canonicalize().unwrap();

    let (secret, public) = keypair();
    let mut config = config_for(&src, dst_dir.path());
    config.paths.clear();

    let summary = backup(&Cancel::new(), &public, &config).unwrap();
    assert_eq!(summary.added, 0);

    let files = snapshot_files(dst_dir.path());
    assert_eq!(files.len(), 1);
    assert!(read_records(&files[0], &secret).is_empty());
}
