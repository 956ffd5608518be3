//! Passphrase prompting on the controlling terminal.

use zeroize::Zeroizing;

use crate::error::CliError;

/// Prompts once, for unlocking an existing secret key.
pub(crate) fn prompt(prompt: &str) -> Result<Zeroizing<String>, CliError> {
    rpassword::prompt_password(prompt)
        .map(Zeroizing::new)
        .map_err(CliError::Passphrase)
}

/// Prompts twice and insists the entries match, for key generation.
pub(crate) fn prompt_new() -> Result<Zeroizing<String>, CliError> {
    let first = prompt("New passphrase: ")?;
    let second = prompt("Repeat passphrase: ")?;
    if *first != *second {
        return Err(CliError::PassphraseMismatch);
    }
    Ok(first)
}
