#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `config` loads the oc-backup TOML configuration file and validates it
//! per subcommand. Parsing is tolerant: every key is optional at the file
//! level so `restore` does not demand backup-only keys and vice versa.
//! Validation happens when a subcommand asks for its view of the
//! configuration, and a missing required key is a fatal configuration
//! error reported before any I/O.
//!
//! # Example
//!
//! ```toml
//! debug = false
//! dryrun = false
//! backuppath = "/var/backups/oc"
//!
//! [backup]
//! group = "backup"
//! paths = ["/etc", "/home"]
//! excludes = ["\\.cache/", "~$"]
//! pubkeyfile = "/etc/oc-backup/key.pub"
//! maxintervals = 30
//! gzlevel = 6
//!
//! [restore]
//! secretfile = "/root/oc-backup/key.sec"
//! ```

mod error;

use std::fs;
use std::path::{Path, PathBuf};

use regex::bytes::RegexSet;
use serde::Deserialize;

pub use error::ConfigError;

/// Increment ceiling applied when `backup.maxintervals` is absent.
pub const DEFAULT_MAX_INTERVALS: u16 = 30;

/// gzip level applied when `backup.gzlevel` is absent.
pub const DEFAULT_GZIP_LEVEL: u32 = 6;

/// Raw configuration as parsed from the file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Enable debug-level logging.
    #[serde(default)]
    pub debug: bool,
    /// Log destructive actions instead of performing them.
    #[serde(default)]
    pub dryrun: bool,
    /// Recognised for compatibility; the profiling endpoint is not
    /// compiled into this implementation.
    #[serde(default)]
    pub profile: bool,
    /// Directory holding the snapshot files and signature cache.
    pub backuppath: Option<PathBuf>,
    /// Backup-specific keys.
    #[serde(default)]
    pub backup: BackupSection,
    /// Restore-specific keys.
    #[serde(default)]
    pub restore: RestoreSection,
}

/// Raw `[backup]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackupSection {
    /// POSIX group name that owns the output.
    pub group: Option<String>,
    /// Source roots to walk, in order.
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    /// Regular expressions over absolute paths; matches are skipped.
    #[serde(default)]
    pub excludes: Vec<String>,
    /// Recipient public key file.
    pub pubkeyfile: Option<PathBuf>,
    /// Increment ceiling per generation.
    pub maxintervals: Option<u16>,
    /// gzip compression level, 0-9.
    pub gzlevel: Option<u32>,
}

/// Raw `[restore]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RestoreSection {
    /// Recipient secret key file.
    pub secretfile: Option<PathBuf>,
}

/// Validated view required by the `backup` subcommand.
#[derive(Debug)]
pub struct BackupConfig {
    /// Output directory, absolute.
    pub backuppath: PathBuf,
    /// Group name owning the output.
    pub group: String,
    /// Source roots in configured order.
    pub paths: Vec<PathBuf>,
    /// Compiled exclude set, matched against absolute path bytes.
    pub excludes: RegexSet,
    /// Recipient public key file.
    pub pubkeyfile: PathBuf,
    /// Increment ceiling per generation.
    pub maxintervals: u16,
    /// gzip level.
    pub gzlevel: u32,
    /// Dry-run flag for destructive actions.
    pub dryrun: bool,
}

/// Validated view required by `restore` and `cat`.
#[derive(Debug)]
pub struct RestoreConfig {
    /// Recipient secret key file.
    pub secretfile: PathBuf,
    /// Output directory, absolute; only `restore` needs it.
    pub backuppath: Option<PathBuf>,
}

impl Config {
    /// Reads and parses `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source: Box::new(source),
        })
    }

    /// Validates the keys the `backup` subcommand requires.
    pub fn backup_config(&self) -> Result<BackupConfig, ConfigError> {
        let backuppath = self
            .backuppath
            .clone()
            .ok_or(ConfigError::MissingKey("backuppath"))?;
        if !backuppath.is_absolute() {
            return Err(ConfigError::RelativeBackupPath(backuppath));
        }
        let group = self
            .backup
            .group
            .clone()
            .ok_or(ConfigError::MissingKey("backup.group"))?;
        let pubkeyfile = self
            .backup
            .pubkeyfile
            .clone()
            .ok_or(ConfigError::MissingKey("backup.pubkeyfile"))?;
        if self.backup.paths.is_empty() {
            return Err(ConfigError::MissingKey("backup.paths"));
        }

        let gzlevel = self.backup.gzlevel.unwrap_or(DEFAULT_GZIP_LEVEL);
        if gzlevel > 9 {
            return Err(ConfigError::InvalidGzipLevel(gzlevel));
        }

        let excludes = RegexSet::new(&self.backup.excludes).map_err(|source| {
            ConfigError::InvalidExclude {
                source: Box::new(source),
            }
        })?;

        Ok(BackupConfig {
            backuppath,
            group,
            paths: self.backup.paths.clone(),
            excludes,
            pubkeyfile,
            maxintervals: self.backup.maxintervals.unwrap_or(DEFAULT_MAX_INTERVALS),
            gzlevel,
            dryrun: self.dryrun,
        })
    }

    /// Validates the keys `restore` and `cat` require.
    pub fn restore_config(&self) -> Result<RestoreConfig, ConfigError> {
        let secretfile = self
            .restore
            .secretfile
            .clone()
            .ok_or(ConfigError::MissingKey("restore.secretfile"))?;
        Ok(RestoreConfig {
            secretfile,
            backuppath: self.backuppath.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{Config, ConfigError, DEFAULT_GZIP_LEVEL, DEFAULT_MAX_INTERVALS};

    fn write_config(text: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oc-backup.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
        (dir, path)
    }

    const FULL: &str = r#"
debug = true
dryrun = true
backuppath = "/var/backups/oc"

[backup]
group = "backup"
paths = ["/etc", "/srv"]
excludes = ["\\.cache/"]
pubkeyfile = "/etc/oc-backup/key.pub"
maxintervals = 14
gzlevel = 9

[restore]
secretfile = "/root/key.sec"
"#;

    #[test]
    fn full_config_parses_and_validates() {
        let (_dir, path) = write_config(FULL);
        let config = Config::load(&path).unwrap();
        assert!(config.debug);

        let backup = config.backup_config().unwrap();
        assert_eq!(backup.group, "backup");
        assert_eq!(backup.paths.len(), 2);
        assert_eq!(backup.maxintervals, 14);
        assert_eq!(backup.gzlevel, 9);
        assert!(backup.dryrun);
        assert!(backup.excludes.is_match(b"/home/user/.cache/file"));
        assert!(!backup.excludes.is_match(b"/home/user/file"));

        let restore = config.restore_config().unwrap();
        assert_eq!(restore.secretfile.to_str().unwrap(), "/root/key.sec");
    }

    #[test]
    fn defaults_apply_when_keys_are_absent() {
        let (_dir, path) = write_config(
            r#"
backuppath = "/b"

[backup]
group = "g"
paths = ["/src"]
pubkeyfile = "/k.pub"
"#,
        );
        let backup = Config::load(&path).unwrap().backup_config().unwrap();
        assert_eq!(backup.maxintervals, DEFAULT_MAX_INTERVALS);
        assert_eq!(backup.gzlevel, DEFAULT_GZIP_LEVEL);
        assert!(!backup.dryrun);
        assert!(backup.excludes.is_empty());
    }

    #[test]
    fn missing_required_key_is_reported_by_name() {
        let (_dir, path) = write_config("backuppath = \"/b\"\n");
        let err = Config::load(&path).unwrap().backup_config().unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("backup.group")));
    }

    #[test]
    fn restore_does_not_require_backup_keys() {
        let (_dir, path) = write_config("[restore]\nsecretfile = \"/k.sec\"\n");
        let config = Config::load(&path).unwrap();
        assert!(config.restore_config().is_ok());
        assert!(config.backup_config().is_err());
    }

    #[test]
    fn bad_exclude_regex_is_a_config_error() {
        let (_dir, path) = write_config(
            r#"
backuppath = "/b"

[backup]
group = "g"
paths = ["/src"]
excludes = ["("]
pubkeyfile = "/k.pub"
"#,
        );
        assert!(matches!(
            Config::load(&path).unwrap().backup_config(),
            Err(ConfigError::InvalidExclude { .. })
        ));
    }

    #[test]
    fn gzip_level_out_of_range_is_rejected() {
        let (_dir, path) = write_config(
            r#"
backuppath = "/b"

[backup]
group = "g"
paths = ["/src"]
pubkeyfile = "/k.pub"
gzlevel = 12
"#,
        );
        assert!(matches!(
            Config::load(&path).unwrap().backup_config(),
            Err(ConfigError::InvalidGzipLevel(12))
        ));
    }

    #[test]
    fn relative_backuppath_is_rejected() {
        let (_dir, path) = write_config(
            r#"
backuppath = "relative/dir"

[backup]
group = "g"
paths = ["/src"]
pubkeyfile = "/k.pub"
"#,
        );
        assert!(matches!(
            Config::load(&path).unwrap().backup_config(),
            Err(ConfigError::RelativeBackupPath(_))
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let (_dir, path) = write_config("unknown_key = 1\n");
        assert!(Config::load(&path).is_err());
    }
}
