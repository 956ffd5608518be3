//! Subcommand implementations.

use std::io::Write;
use std::path::Path;

use config::Config;
use engine::Cancel;
use envelope::{PublicKey, SecretKey};
use tracing::{debug, info};

use crate::error::CliError;
use crate::password;

/// Runs one backup increment.
pub(crate) fn backup(config: &Config) -> Result<(), CliError> {
    let backup_config = config.backup_config()?;
    let recipient = PublicKey::load(&backup_config.pubkeyfile)?;

    let cancel = Cancel::new();
    register_interrupts(&cancel)?;

    let summary = engine::backup(&cancel, &recipient, &backup_config)?;
    println!(
        "{}: {} bytes, {} added, {} changed, {} unchanged, {} deleted, {} excluded, {} errors",
        summary.snapshot.display(),
        summary.bytes_written,
        summary.added,
        summary.changed,
        summary.unchanged,
        summary.deleted,
        summary.excluded,
        summary.errors,
    );
    Ok(())
}

/// Restores the newest generation into `dest`.
pub(crate) fn restore(
    config: &Config,
    dest: &Path,
    filename_regex: Option<&str>,
    increment: Option<u16>,
) -> Result<(), CliError> {
    let restore_config = config.restore_config()?;
    let backuppath = restore_config
        .backuppath
        .as_deref()
        .ok_or(CliError::MissingBackupPath)?;

    let filter = filename_regex
        .map(regex::bytes::Regex::new)
        .transpose()
        .map_err(Box::new)?;

    let secret = unlock_secret(&restore_config.secretfile)?;
    let summary = engine::restore(&secret, backuppath, dest, filter.as_ref(), increment)?;
    println!(
        "restored {} records from {} snapshots into {} ({} deleted, {} filtered, {} corrupt)",
        summary.restored,
        summary.snapshots_applied,
        dest.display(),
        summary.deleted,
        summary.filtered,
        summary.corrupt,
    );
    Ok(())
}

/// Dumps one snapshot file to standard output.
pub(crate) fn cat(config: &Config, snapshot: &Path) -> Result<(), CliError> {
    let restore_config = config.restore_config()?;
    let secret = unlock_secret(&restore_config.secretfile)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    engine::cat(&secret, snapshot, &mut out)?;
    out.flush()?;
    Ok(())
}

/// Generates `<basename>.pub` and `<basename>.sec`.
pub(crate) fn keygen(basename: &Path) -> Result<(), CliError> {
    let passphrase = password::prompt_new()?;
    let (secret, public) = SecretKey::generate()?;

    let pub_path = basename.with_extension("pub");
    let sec_path = basename.with_extension("sec");
    public.save(&pub_path)?;
    secret.save(&sec_path, passphrase.as_bytes())?;

    info!(public = %pub_path.display(), secret = %sec_path.display(), "keypair written");
    println!("public key: {}", pub_path.display());
    println!("secret key: {} (mode 0600)", sec_path.display());
    Ok(())
}

/// Prompts for the passphrase and unseals the secret key file.
fn unlock_secret(path: &Path) -> Result<SecretKey, CliError> {
    let passphrase = password::prompt(&format!("Passphrase for {}: ", path.display()))?;
    let secret = SecretKey::load(path, passphrase.as_bytes())?;
    debug!(path = %path.display(), "secret key unsealed");
    Ok(secret)
}

/// Routes SIGINT and SIGTERM to the engine's cancellation token.
fn register_interrupts(cancel: &Cancel) -> Result<(), CliError> {
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, cancel.flag())?;
    }
    Ok(())
}
