//! Entry point for the `historian-prep` binary.
//!
//! Delegates to [`historian_harness::cli::run`], which loads configuration,
//! initialises telemetry and stages the configured database.

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    historian_harness::cli::run(std::env::args_os(), &mut io::stdout(), &mut io::stderr())
}
