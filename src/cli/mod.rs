//! Command-line surface of the `tickshell` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tickshell_runner::{ChainPolicy, OutputEncoding};

pub mod config;
pub mod run;

#[derive(Debug, Parser)]
#[command(name = "tickshell")]
#[command(about = "Run shell commands from a cooperative tick loop")]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to $TICKSHELL_CONFIG, then ./tickshell.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Raise log verbosity; repeat for more
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run commands through the system shell and stream their output
    Run(RunArgs),
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Commands to chain into one shell invocation
    #[arg(required = true, num_args = 1..)]
    pub commands: Vec<String>,

    /// Block on the calling thread instead of going through the tick loop
    #[arg(long)]
    pub sync: bool,

    /// How consecutive commands are chained: and, or, always
    #[arg(long, default_value = "and", value_parser = parse_chain_policy)]
    pub chain: ChainPolicy,

    /// Working directory for the shell
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Environment override KEY=VALUE; values may reference %NAME% (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Directory to put in front of PATH (repeatable)
    #[arg(long = "path-prepend", value_name = "DIR")]
    pub path_prepend: Vec<String>,

    /// Codec for child output: utf8 or latin1 (default: from the locale)
    #[arg(long)]
    pub encoding: Option<OutputEncoding>,

    /// Kill the operation after this many milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Host loop period in milliseconds (overrides [host] tick_interval_ms)
    #[arg(long)]
    pub tick_ms: Option<u64>,
}

fn parse_chain_policy(value: &str) -> Result<ChainPolicy, String> {
    ChainPolicy::parse(value).ok_or_else(|| format!("unknown chain policy `{value}` (expected and, or, always)"))
}

fn parse_env_pair(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, val)) if !key.trim().is_empty() => Ok((key.trim().to_string(), val.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{value}`")),
    }
}
