use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the runner before or while a shell process runs.
///
/// The asynchronous path never returns these to the caller; they are turned
/// into an Error log line plus exit code `-1` on the operation instead.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("no command to execute")]
    EmptyCommandList,

    #[error("working directory `{}` does not exist or is not a directory", path.display())]
    InvalidWorkDirectory { path: PathBuf },

    #[error("failed to spawn `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{context}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("dispatch queue drained off its designated thread")]
    WrongThread,
}

impl ShellError {
    pub(crate) fn io(context: &'static str, source: io::Error) -> Self {
        Self::Io { context, source }
    }
}
