//! Blocking execution for callers that are already off the host thread or
//! can afford to wait.

use std::io::{self, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::thread;

use tracing::{debug, warn};

use crate::command::CommandSpec;
use crate::config::RunnerConfig;
use crate::encoding::OutputEncoding;
use crate::error::ShellError;
use crate::log::LogLine;
use crate::process_group::exit_code_of;
use crate::stream::{ReadLineResult, StderrFilter, read_line_with_limit_blocking};

/// Output produced by a blocking invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    /// Stdout lines in order, followed by stderr lines in order.
    pub logs: Vec<LogLine>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn has_error(&self) -> bool {
        self.logs.iter().any(LogLine::is_error)
    }

    pub fn output_lines(&self) -> impl Iterator<Item = &str> {
        self.logs
            .iter()
            .filter(|line| !line.is_error())
            .map(LogLine::text)
    }

    pub fn error_lines(&self) -> impl Iterator<Item = &str> {
        self.logs
            .iter()
            .filter(|line| line.is_error())
            .map(LogLine::text)
    }
}

/// Trait implemented by concrete blocking execution strategies.
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, spec: &CommandSpec) -> Result<ExecOutput, ShellError>;
}

/// Runs a [`CommandSpec`] through the system shell via [`std::process::Command`] on
/// the calling thread.
#[derive(Debug, Clone)]
pub struct ProcessCommandExecutor {
    max_line_bytes: usize,
    stop_stderr_at_blank_line: bool,
}

impl ProcessCommandExecutor {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            max_line_bytes: config.max_line_bytes,
            stop_stderr_at_blank_line: config.stop_stderr_at_blank_line,
        }
    }
}

impl Default for ProcessCommandExecutor {
    fn default() -> Self {
        Self::new(&RunnerConfig::default())
    }
}

impl CommandExecutor for ProcessCommandExecutor {
    fn execute(&self, spec: &CommandSpec) -> Result<ExecOutput, ShellError> {
        let mut command = Command::new(&spec.program);
        command
            .args(spec.args())
            .current_dir(&spec.work_directory)
            .envs(&spec.environment)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            command.creation_flags(crate::runner::CREATE_NO_WINDOW);
        }

        let mut child = command.spawn().map_err(|source| ShellError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        debug!(pid = child.id(), invocation = %spec.invocation, "spawned shell (blocking)");

        drop(child.stdin.take());
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ShellError::io("child stdout was not captured", io::Error::other("missing stdout")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ShellError::io("child stderr was not captured", io::Error::other("missing stderr")))?;

        let encoding = spec.encoding;
        let max_line_bytes = self.max_line_bytes;
        let stop_at_blank_line = self.stop_stderr_at_blank_line;
        let stderr_reader = thread::Builder::new()
            .name("tickshell-stderr".into())
            .spawn(move || read_error_lines(stderr, encoding, max_line_bytes, stop_at_blank_line))
            .map_err(|err| ShellError::io("failed to start stderr reader", err))?;

        let mut logs = match read_output_lines(stdout, encoding, max_line_bytes) {
            Ok(lines) => lines,
            Err(err) => {
                abandon(&mut child);
                return Err(err);
            }
        };

        let error_lines = match stderr_reader.join() {
            Ok(Ok(lines)) => lines,
            Ok(Err(err)) => {
                abandon(&mut child);
                return Err(err);
            }
            Err(_) => {
                abandon(&mut child);
                return Err(ShellError::io(
                    "stderr reader panicked",
                    io::Error::other("stderr reader panicked"),
                ));
            }
        };
        logs.extend(error_lines.into_iter().map(LogLine::error));

        let status = child
            .wait()
            .map_err(|err| ShellError::io("failed to wait for shell exit", err))?;
        let exit_code = exit_code_of(status);
        debug!(exit_code, lines = logs.len(), "shell exited (blocking)");
        Ok(ExecOutput { exit_code, logs })
    }
}

/// Kill and reap a child whose output can no longer be collected.
fn abandon(child: &mut Child) {
    if let Err(err) = child.kill() {
        warn!(pid = child.id(), error = %err, "failed to kill shell after read error");
    }
    if let Err(err) = child.wait() {
        warn!(pid = child.id(), error = %err, "failed to reap shell after read error");
    }
}

fn read_output_lines<R: Read>(
    stdout: R,
    encoding: OutputEncoding,
    max_line_bytes: usize,
) -> Result<Vec<LogLine>, ShellError> {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    let mut lines = Vec::new();
    loop {
        let result = read_line_with_limit_blocking(&mut reader, &mut buf, max_line_bytes)
            .map_err(|err| ShellError::io("failed to read child stdout", err))?;
        if result == ReadLineResult::Eof {
            return Ok(lines);
        }
        lines.push(LogLine::output(encoding.decode(&buf)));
    }
}

fn read_error_lines<R: Read>(
    stderr: R,
    encoding: OutputEncoding,
    max_line_bytes: usize,
    stop_at_blank_line: bool,
) -> Result<Vec<String>, ShellError> {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    let mut lines = Vec::new();
    let mut filter = StderrFilter::new(stop_at_blank_line);
    while read_line_with_limit_blocking(&mut reader, &mut buf, max_line_bytes)
        .map_err(|err| ShellError::io("failed to read child stderr", err))?
        != ReadLineResult::Eof
    {
        if filter.keep(&buf) {
            lines.push(encoding.decode(&buf));
        }
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_output_splits_streams() {
        let output = ExecOutput {
            exit_code: 2,
            logs: vec![
                LogLine::output("a"),
                LogLine::output("b"),
                LogLine::error("bad"),
            ],
        };
        assert!(!output.success());
        assert!(output.has_error());
        assert_eq!(output.output_lines().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(output.error_lines().collect::<Vec<_>>(), vec!["bad"]);
    }

    #[cfg(unix)]
    #[test]
    fn abandoned_child_is_killed_and_reaped() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        abandon(&mut child);
        let status = child.try_wait().unwrap().expect("child was reaped");
        assert_eq!(exit_code_of(status), 137);
    }

    #[test]
    fn error_reader_skips_or_stops_at_blank_lines() {
        let data: &[u8] = b"one\n\ntwo\n";
        assert_eq!(
            read_error_lines(data, OutputEncoding::Utf8, 64, false).unwrap(),
            vec!["one", "two"]
        );
        assert_eq!(
            read_error_lines(data, OutputEncoding::Utf8, 64, true).unwrap(),
            vec!["one"]
        );
    }
}
