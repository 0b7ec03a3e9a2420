//! Asynchronous shell command execution for hosts built around a
//! cooperative, single-threaded main loop.
//!
//! Commands run on a background tokio runtime. Their output lines and exit
//! status come back as callbacks in a [`DispatchQueue`], which the host
//! drains once per tick on its own thread; only then do [`Operation`]
//! observers fire. The exception is [`Operation::kill`] on an operation with
//! no live process, which completes it immediately and runs its exit
//! observers on the calling thread. A blocking path
//! ([`Shell::execute_sync`]) is available for callers that can afford to wait.
//!
//! ```no_run
//! use tickshell_runner::{RunnerConfig, Shell, ShellOptions};
//!
//! # fn main() -> anyhow::Result<()> {
//! let shell = Shell::new(RunnerConfig::default())?;
//! let op = shell.execute(["cargo --version"], ShellOptions::new());
//! op.on_log(|line| println!("{line}"));
//! op.on_exit(|code| println!("exited with {code}"));
//! while !op.is_done() {
//!     shell.tick()?;
//!     std::thread::sleep(std::time::Duration::from_millis(16));
//! }
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod dispatch;
pub mod encoding;
pub mod error;
pub mod executor;
pub mod log;
pub mod operation;
pub mod process_group;
pub mod runner;
pub mod shell;
pub mod stream;

pub use command::{ChainPolicy, CommandSpec, CommandSpecBuilder, ShellKind, ShellOptions};
pub use config::RunnerConfig;
pub use dispatch::{Callback, DispatchQueue, DrainReport, TickSource};
pub use encoding::OutputEncoding;
pub use error::ShellError;
pub use executor::{CommandExecutor, ExecOutput, ProcessCommandExecutor};
pub use log::{LogKind, LogLine};
pub use operation::{ChildTerminator, KILLED_EXIT_CODE, Operation};
pub use runner::FAILURE_EXIT_CODE;
pub use shell::Shell;
