#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `cli` is the thin command-line front-end for oc-backup. It parses the
//! subcommands, loads and validates the configuration, installs the
//! interrupt handler that trips the engine's cancellation token, prompts
//! for the secret-key passphrase on the controlling terminal, and maps
//! every failure to exit code 1 with a diagnostic on standard error.
//!
//! Subcommands:
//!
//! - `backup` — produce one snapshot increment.
//! - `restore <destPath> [filenameRegex] [increment]` — apply the newest
//!   generation under the destination directory.
//! - `cat <snapshot-file>` — dump a snapshot record by record.
//! - `keygen <basename>` — generate a recipient keypair.
//!
//! The crate is the only place a tracing subscriber is installed; library
//! crates emit events against whatever dispatcher the embedder provides,
//! which in tests is the no-op default.

mod commands;
mod error;
mod password;

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;

use crate::error::CliError;

/// Default configuration file location.
const DEFAULT_CONFIG: &str = "/etc/oc-backup/oc-backup.toml";

#[derive(Parser)]
#[command(
    name = "oc-backup",
    version,
    about = "Incremental encrypted file-tree backup",
    max_term_width = 100
)]
struct Cli {
    /// Configuration file.
    #[arg(long, value_name = "FILE", default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Produce one snapshot increment from the configured roots.
    Backup,
    /// Restore the most recent generation into a destination directory.
    Restore {
        /// Directory the restored tree is written under.
        dest: PathBuf,
        /// Only apply records whose path matches this regular expression.
        filename_regex: Option<String>,
        /// Stop after this increment (default: apply the whole chain).
        increment: Option<u16>,
    },
    /// Dump one snapshot file record by record.
    Cat {
        /// Snapshot file to inspect.
        snapshot: PathBuf,
    },
    /// Generate a recipient keypair: <basename>.pub and <basename>.sec.
    Keygen {
        /// Output path prefix for the two key files.
        basename: PathBuf,
    },
}

/// Entry point; returns the process exit code.
pub fn run<I, T>(args: I) -> u8
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) => {
            // clap renders help and version itself; those are successes,
            // everything else is a usage error.
            let _ = err.print();
            return u8::from(!matches!(
                err.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ));
        }
    };

    match dispatch(cli) {
        Ok(()) => 0,
        Err(err) => {
            error!("{err}");
            eprintln!("oc-backup: {err}");
            1
        }
    }
}

fn dispatch(cli: Cli) -> Result<(), CliError> {
    // Key generation needs no configuration file.
    if let Command::Keygen { basename } = &cli.command {
        init_logging(false);
        return commands::keygen(basename);
    }

    let config = config::Config::load(&cli.config)?;
    init_logging(config.debug);

    match cli.command {
        Command::Backup => commands::backup(&config),
        Command::Restore {
            dest,
            filename_regex,
            increment,
        } => commands::restore(&config, &dest, filename_regex.as_deref(), increment),
        Command::Cat { snapshot } => commands::cat(&config, &snapshot),
        Command::Keygen { .. } => unreachable!("handled above"),
    }
}

/// Installs the process-wide tracing subscriber.
///
/// `RUST_LOG` overrides the configured level so operators can raise
/// verbosity for one run without touching the configuration file.
fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use clap::Parser;

    #[test]
    fn parses_backup() {
        let cli = Cli::try_parse_from(["oc-backup", "backup"]).unwrap();
        assert!(matches!(cli.command, Command::Backup));
        assert_eq!(cli.config.to_str().unwrap(), super::DEFAULT_CONFIG);
    }

    #[test]
    fn parses_restore_with_optional_arguments() {
        let cli =
            Cli::try_parse_from(["oc-backup", "restore", "/tmp/out", "etc/.*", "3"]).unwrap();
        match cli.command {
            Command::Restore {
                dest,
                filename_regex,
                increment,
            } => {
                assert_eq!(dest.to_str().unwrap(), "/tmp/out");
                assert_eq!(filename_regex.as_deref(), Some("etc/.*"));
                assert_eq!(increment, Some(3));
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn config_flag_overrides_default() {
        let cli =
            Cli::try_parse_from(["oc-backup", "--config", "/tmp/x.toml", "backup"]).unwrap();
        assert_eq!(cli.config.to_str().unwrap(), "/tmp/x.toml");
    }

    #[test]
    fn rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["oc-backup", "replicate"]).is_err());
    }
}
