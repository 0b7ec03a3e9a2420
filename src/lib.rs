//! # tickshell
//!
//! Command-line host for [`tickshell_runner`]. It owns a fixed-rate
//! cooperative loop ([`host::TickLoop`]), attaches the runner's dispatch
//! queue to it and runs shell commands either in the background, streaming
//! their output tick by tick, or synchronously.
//!
//! ```bash
//! # Stream output, kill after two seconds
//! tickshell run --timeout-ms 2000 "make test"
//!
//! # Chain with "or" semantics and block until done
//! tickshell run --sync --chain or "test -f build.lock" "make build"
//!
//! # Show the effective configuration
//! tickshell config
//! ```
//!
//! Defaults live in `tickshell.toml` (see [`config`]).

pub mod cli;
pub mod config;
pub mod host;

pub use config::{LoadedConfig, TickshellConfig, TraceLevel};
pub use host::TickLoop;
