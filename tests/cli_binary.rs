//! Exit-code and diagnostic contract of the installed binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn oc_backup() -> Command {
    Command::cargo_bin("oc-backup").expect("binary builds")
}

#[test]
fn version_exits_zero() {
    oc_backup().arg("--version").assert().success();
}

#[test]
fn help_exits_zero_and_lists_subcommands() {
    oc_backup()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("backup"))
        .stdout(predicate::str::contains("restore"))
        .stdout(predicate::str::contains("cat"));
}

#[test]
fn missing_config_file_exits_one() {
    oc_backup()
        .args(["--config", "/nonexistent/oc-backup.toml", "backup"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("oc-backup:"));
}

#[test]
fn incomplete_config_is_a_fatal_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("oc-backup.toml");
    std::fs::write(&config, "backuppath = \"/tmp/nowhere\"\n").unwrap();

    oc_backup()
        .args(["--config", config.to_str().unwrap(), "backup"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("backup.group"));
}

#[test]
fn unknown_subcommand_fails() {
    oc_backup().arg("replicate").assert().failure();
}
