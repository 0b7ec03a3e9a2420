use std::fs;
use std::path::Path;

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// Tunables for the worker runtime and the pipe readers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    /// Worker threads in the runtime owned by a [`Shell`](crate::Shell).
    #[serde(default = "RunnerConfig::default_worker_threads")]
    pub worker_threads: usize,
    /// Longest line kept from a child pipe; the rest of the line is dropped.
    #[serde(default = "RunnerConfig::default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Ignore everything on stderr after its first blank line.
    #[serde(default)]
    pub stop_stderr_at_blank_line: bool,
    /// Exit code reported when a kill completes an operation with no live process.
    #[serde(default = "RunnerConfig::default_kill_exit_code")]
    pub kill_exit_code: i32,
    /// Override for the shell program (`sh` / `cmd.exe` otherwise).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell_program: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            worker_threads: Self::default_worker_threads(),
            max_line_bytes: Self::default_max_line_bytes(),
            stop_stderr_at_blank_line: false,
            kill_exit_code: Self::default_kill_exit_code(),
            shell_program: None,
        }
    }
}

impl RunnerConfig {
    const MIN_LINE_BYTES: usize = 64;

    const fn default_worker_threads() -> usize {
        4
    }

    const fn default_max_line_bytes() -> usize {
        1024 * 1024
    }

    const fn default_kill_exit_code() -> i32 {
        crate::operation::KILLED_EXIT_CODE
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.worker_threads > 0,
            "runner.worker_threads must be at least 1"
        );
        ensure!(
            self.max_line_bytes >= Self::MIN_LINE_BYTES,
            "runner.max_line_bytes must be at least {} bytes",
            Self::MIN_LINE_BYTES
        );
        if let Some(program) = &self.shell_program {
            ensure!(
                !program.trim().is_empty(),
                "runner.shell_program must not be blank"
            );
        }
        Ok(())
    }

    /// Parse and validate a standalone `RunnerConfig` document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).context("failed to parse runner config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read runner config {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("invalid runner config {}", path.display()))
    }
}
