//! tickshell - run shell commands from a cooperative tick loop
//!
//! Thin binary entry point that delegates to the CLI handlers.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tickshell::cli::config::handle_config_command;
use tickshell::cli::run::{handle_run_command, process_exit_status};
use tickshell::cli::{Cli, Commands};
use tickshell::config::{self, TraceLevel};

fn main() -> Result<ExitCode> {
    let args = Cli::parse();

    let loaded = config::load(args.config.as_deref()).context("failed to load configuration")?;
    initialize_tracing(loaded.config.debug.trace_level.raised(args.verbose));

    match &args.command {
        Commands::Run(run_args) => {
            let code = handle_run_command(run_args, &loaded.config)?;
            Ok(ExitCode::from(process_exit_status(code)))
        }
        Commands::Config => {
            handle_config_command(&loaded)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// `RUST_LOG` takes precedence; otherwise log tickshell crates at `level`.
/// Logs go to stderr so child output on stdout stays clean.
fn initialize_tracing(level: TraceLevel) {
    let filter_str = format!(
        "tickshell={level},tickshell_runner={level},tickshell_commons={level}"
    );
    let init_result = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter_str)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();

    if let Err(err) = init_result {
        eprintln!("warning: failed to initialize tracing: {err}");
    }
}
