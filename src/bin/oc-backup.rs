//! `oc-backup` binary entry point; all logic lives in the `cli` crate.

use std::process::ExitCode;

fn main() -> ExitCode {
    ExitCode::from(cli::run(std::env::args_os()))
}
