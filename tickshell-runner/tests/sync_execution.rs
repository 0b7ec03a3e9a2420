#![cfg(unix)]

mod common;

use anyhow::Result;
use pretty_assertions::assert_eq;
use tickshell_runner::{
    ChainPolicy, LogLine, OutputEncoding, RunnerConfig, Shell, ShellError, ShellOptions,
};

use common::shell;

fn utf8() -> ShellOptions {
    ShellOptions::new().encoding(OutputEncoding::Utf8)
}

#[test]
fn returns_stdout_then_stderr_with_exit_code() -> Result<()> {
    let shell = shell()?;
    let output = shell.execute_sync_one(
        "echo 1; echo err >&2; echo 2; echo 3; exit 5",
        &utf8(),
    )?;

    assert_eq!(output.exit_code, 5);
    assert_eq!(
        output.logs,
        vec![
            LogLine::output("1"),
            LogLine::output("2"),
            LogLine::output("3"),
            LogLine::error("err"),
        ]
    );
    assert!(output.has_error());
    Ok(())
}

#[test]
fn honours_chain_policy() -> Result<()> {
    let shell = shell()?;
    let stopped = shell.execute_sync(["exit 1", "echo hi"], &utf8())?;
    assert_eq!(stopped.exit_code, 1);
    assert!(stopped.logs.is_empty());

    let fallback = shell.execute_sync(
        ["exit 1", "echo hi"],
        &utf8().chain_policy(ChainPolicy::OnFailure),
    )?;
    assert_eq!(fallback.exit_code, 0);
    assert_eq!(fallback.output_lines().collect::<Vec<_>>(), vec!["hi"]);
    Ok(())
}

#[test]
fn spawn_failure_is_returned_to_the_caller() -> Result<()> {
    let shell = Shell::new(RunnerConfig {
        worker_threads: 1,
        shell_program: Some("/nonexistent/tickshell-sh".into()),
        ..RunnerConfig::default()
    })?;
    let err = shell.execute_sync_one("true", &utf8()).unwrap_err();
    assert!(matches!(err, ShellError::Spawn { .. }));
    Ok(())
}

#[test]
fn invalid_work_directory_is_returned_to_the_caller() -> Result<()> {
    let shell = shell()?;
    let dir = tempfile::tempdir()?;
    let err = shell
        .execute_sync_one("true", &utf8().work_directory(dir.path().join("missing")))
        .unwrap_err();
    assert!(matches!(err, ShellError::InvalidWorkDirectory { .. }));
    Ok(())
}

#[test]
fn legacy_stderr_mode_drops_lines_after_blank() -> Result<()> {
    let shell = Shell::new(RunnerConfig {
        worker_threads: 1,
        stop_stderr_at_blank_line: true,
        ..RunnerConfig::default()
    })?;
    let output = shell.execute_sync_one("printf 'a\\n\\nb\\n' >&2", &utf8())?;
    assert_eq!(output.error_lines().collect::<Vec<_>>(), vec!["a"]);
    Ok(())
}

#[test]
fn large_stderr_does_not_deadlock() -> Result<()> {
    let shell = shell()?;
    // Well past a pipe buffer on stderr before anything reaches stdout.
    let output = shell.execute_sync_one(
        "i=0; while [ $i -lt 5000 ]; do echo 'stderr line padding padding' >&2; i=$((i+1)); done; echo done",
        &utf8(),
    )?;
    assert_eq!(output.output_lines().collect::<Vec<_>>(), vec!["done"]);
    assert_eq!(output.error_lines().count(), 5000);
    Ok(())
}
