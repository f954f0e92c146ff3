//! zbc_dev_control - Main entry point
//!
//! Mutates a zoned device and reads or updates its Zone Domains activation
//! settings. Exits with status 0 on success and 1 on any usage or runtime error.

use std::process::ExitCode;

use anyhow::Result;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use zbc_dev_control::cli::Cli;
use zbc_dev_control::device::EmulatedDriver;
use zbc_dev_control::workflow;

/// Initialize the tracing subscriber.
///
/// `-v` raises the default level to debug, `RUST_LOG` overrides both.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Main application entry point
fn main() -> ExitCode {
    let cli = match Cli::try_parse_args() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version are not failures
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_tracing(cli.verbose);
    debug!("CLI arguments parsed");

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("✗ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let request = cli.into_request().map_err(|e| {
        if e.is_usage() {
            eprintln!("Run with --help for usage and the list of mutation targets");
        }
        e
    })?;
    debug!(?request, "running device control workflow");

    let report = workflow::run(&EmulatedDriver, &request)?;
    print!("{}", report);

    Ok(())
}
