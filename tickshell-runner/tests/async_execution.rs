#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use pretty_assertions::assert_eq;
use tickshell_runner::{
    ChainPolicy, DispatchQueue, FAILURE_EXIT_CODE, KILLED_EXIT_CODE, LogKind, LogLine,
    OutputEncoding, RunnerConfig, Shell, ShellOptions,
};

use common::{Event, Recorder, shell, tick_until, tick_until_done};

fn utf8() -> ShellOptions {
    ShellOptions::new().encoding(OutputEncoding::Utf8)
}

#[test]
fn chained_success_runs_every_command() -> Result<()> {
    let shell = shell()?;
    let op = shell.execute(["exit 0", "echo hi"], utf8());
    let recorder = Recorder::attach(&op);

    tick_until_done(&shell, &op)?;

    assert_eq!(
        recorder.events(),
        vec![Event::Log(LogLine::output("hi")), Event::Exit(0)]
    );
    assert_eq!(op.exit_code(), Some(0));
    assert!(!op.has_error());
    assert!(!op.has_process());
    Ok(())
}

#[test]
fn chained_failure_stops_at_first_failure() -> Result<()> {
    let shell = shell()?;
    let op = shell.execute(["exit 1", "echo hi"], utf8());
    let recorder = Recorder::attach(&op);

    tick_until_done(&shell, &op)?;

    assert_eq!(recorder.events(), vec![Event::Exit(1)]);
    Ok(())
}

#[test]
fn on_failure_policy_runs_fallback() -> Result<()> {
    let shell = shell()?;
    let op = shell.execute(
        ["false", "echo fallback"],
        utf8().chain_policy(ChainPolicy::OnFailure),
    );
    let recorder = Recorder::attach(&op);

    tick_until_done(&shell, &op)?;

    assert_eq!(recorder.texts(), vec!["fallback"]);
    assert_eq!(op.exit_code(), Some(0));
    Ok(())
}

#[test]
fn always_policy_ignores_previous_status() -> Result<()> {
    let shell = shell()?;
    let op = shell.execute(
        ["false", "echo after", "exit 4"],
        utf8().chain_policy(ChainPolicy::Always),
    );
    let recorder = Recorder::attach(&op);

    tick_until_done(&shell, &op)?;

    assert_eq!(recorder.texts(), vec!["after"]);
    assert_eq!(op.exit_code(), Some(4));
    Ok(())
}

#[test]
fn stdout_lines_precede_stderr_lines_and_completion() -> Result<()> {
    let shell = shell()?;
    let op = shell.execute_one("echo one; echo oops >&2; echo two; exit 3", utf8());
    let recorder = Recorder::attach(&op);

    tick_until_done(&shell, &op)?;

    assert_eq!(
        recorder.events(),
        vec![
            Event::Log(LogLine::output("one")),
            Event::Log(LogLine::output("two")),
            Event::Log(LogLine::error("oops")),
            Event::Exit(3),
        ]
    );
    assert!(op.has_error());
    Ok(())
}

#[test]
fn stderr_is_read_past_blank_lines() -> Result<()> {
    let shell = shell()?;
    let op = shell.execute_one("printf 'a\\n\\nb\\n' >&2", utf8());
    let recorder = Recorder::attach(&op);

    tick_until_done(&shell, &op)?;

    let errors: Vec<_> = recorder
        .lines()
        .into_iter()
        .filter(|line| line.kind() == LogKind::Error)
        .map(LogLine::into_text)
        .collect();
    assert_eq!(errors, vec!["a", "b"]);
    Ok(())
}

#[test]
fn legacy_stderr_mode_stops_at_blank_line() -> Result<()> {
    let shell = Shell::new(RunnerConfig {
        worker_threads: 1,
        stop_stderr_at_blank_line: true,
        ..RunnerConfig::default()
    })?;
    let op = shell.execute_one("printf 'a\\n\\nb\\n' >&2", utf8());
    let recorder = Recorder::attach(&op);

    tick_until_done(&shell, &op)?;

    assert_eq!(recorder.texts(), vec!["a"]);
    Ok(())
}

#[test]
fn nothing_is_observed_until_the_queue_drains() -> Result<()> {
    let shell = shell()?;
    let op = shell.execute_one("echo queued", utf8());
    let recorder = Recorder::attach(&op);

    // Give the worker plenty of time; without a tick nothing may fire.
    std::thread::sleep(Duration::from_millis(300));
    assert!(recorder.events().is_empty());
    assert!(!op.is_done());

    tick_until_done(&shell, &op)?;
    assert_eq!(recorder.texts(), vec!["queued"]);
    Ok(())
}

#[test]
fn kill_before_spawn_completes_synthetically() -> Result<()> {
    // A runtime nobody drives yet: the invocation cannot start before kill.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let shell = Shell::with_runtime(runtime.handle().clone(), RunnerConfig::default())?;
    let op = shell.execute_one("echo never", utf8());
    let recorder = Recorder::attach(&op);

    assert!(op.kill());
    assert!(op.is_done());
    assert_eq!(op.exit_code(), Some(KILLED_EXIT_CODE));

    // Now let the worker observe the kill flag.
    runtime.block_on(async { tokio::time::sleep(Duration::from_millis(200)).await });
    let report = shell.tick()?;

    assert_eq!(report.executed, 0);
    assert_eq!(recorder.events(), vec![Event::Exit(KILLED_EXIT_CODE)]);
    assert!(!op.has_process());
    Ok(())
}

#[test]
fn kill_terminates_running_process() -> Result<()> {
    let shell = shell()?;
    let op = shell.execute_one("echo started; sleep 30; echo finished", utf8());
    let recorder = Recorder::attach(&op);

    tick_until(&shell, || !recorder.lines().is_empty())?;
    assert!(op.has_process());
    assert!(op.kill());
    assert!(!op.kill());

    tick_until_done(&shell, &op)?;

    assert_eq!(recorder.texts(), vec!["started"]);
    assert_eq!(recorder.exits(), vec![KILLED_EXIT_CODE]);
    assert!(op.is_kill_requested());
    assert!(!op.has_process());
    Ok(())
}

#[test]
fn double_kill_fires_completion_once() -> Result<()> {
    let shell = shell()?;
    let op = shell.execute_one("sleep 30", utf8());
    let recorder = Recorder::attach(&op);

    op.kill();
    op.kill();
    // Keep ticking a little after completion so any straggling callbacks drain.
    tick_until_done(&shell, &op)?;
    std::thread::sleep(Duration::from_millis(200));
    shell.tick()?;

    assert_eq!(recorder.exits().len(), 1);
    Ok(())
}

#[test]
fn kill_after_exit_completes_without_touching_the_process() -> Result<()> {
    let shell = shell()?;
    let op = shell.execute_one("true", utf8());
    let recorder = Recorder::attach(&op);

    // No ticks: wait for the queued completion, which follows the reap.
    let deadline = std::time::Instant::now() + Duration::from_secs(20);
    while shell.queue().is_empty() {
        assert!(std::time::Instant::now() < deadline, "shell never exited");
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(!op.has_process());
    assert!(!op.is_done());

    assert!(op.kill());
    assert!(op.is_done());
    assert_eq!(op.exit_code(), Some(KILLED_EXIT_CODE));
    assert_eq!(recorder.exits(), vec![KILLED_EXIT_CODE]);

    // The real exit status arrives afterwards and is ignored.
    assert_eq!(shell.tick()?.executed, 1);
    assert_eq!(recorder.events(), vec![Event::Exit(KILLED_EXIT_CODE)]);
    Ok(())
}

#[test]
fn spawn_failure_reports_minus_one_and_error_line() -> Result<()> {
    let shell = Shell::new(RunnerConfig {
        worker_threads: 1,
        shell_program: Some("/nonexistent/tickshell-sh".into()),
        ..RunnerConfig::default()
    })?;
    let op = shell.execute_one("echo hi", utf8());
    let recorder = Recorder::attach(&op);

    tick_until_done(&shell, &op)?;

    let lines = recorder.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].is_error());
    assert!(lines[0].text().contains("/nonexistent/tickshell-sh"));
    assert_eq!(recorder.exits(), vec![FAILURE_EXIT_CODE]);
    assert!(op.has_error());
    Ok(())
}

#[test]
fn invalid_work_directory_is_a_spawn_failure() -> Result<()> {
    let shell = shell()?;
    let missing = tempfile::tempdir()?.path().join("gone");
    let op = shell.execute_one("echo hi", utf8().work_directory(&missing));
    let recorder = Recorder::attach(&op);

    tick_until_done(&shell, &op)?;

    assert_eq!(op.exit_code(), Some(FAILURE_EXIT_CODE));
    assert!(recorder.texts()[0].contains("gone"));
    Ok(())
}

#[test]
fn empty_command_list_is_a_spawn_failure() -> Result<()> {
    let shell = shell()?;
    let op = shell.execute(["", "   "], utf8());
    let recorder = Recorder::attach(&op);

    tick_until_done(&shell, &op)?;

    assert_eq!(op.exit_code(), Some(FAILURE_EXIT_CODE));
    assert_eq!(recorder.texts(), vec!["no command to execute"]);
    Ok(())
}

#[test]
fn environment_values_are_expanded_and_applied() -> Result<()> {
    let shell = shell()?;
    let path = std::env::var("PATH")?;
    let op = shell.execute_one(
        "echo \"$TICKSHELL_GREETING\"; echo \"$TICKSHELL_PATH\"",
        utf8()
            .env("TICKSHELL_GREETING", "hello")
            .env("TICKSHELL_PATH", "%PATH%:/extra"),
    );
    let recorder = Recorder::attach(&op);

    tick_until_done(&shell, &op)?;

    assert_eq!(
        recorder.texts(),
        vec!["hello".to_string(), format!("{path}:/extra")]
    );
    Ok(())
}

#[test]
fn runs_in_the_requested_directory() -> Result<()> {
    let shell = shell()?;
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("marker.txt"), "x")?;
    let op = shell.execute_one("ls", utf8().work_directory(dir.path()));
    let recorder = Recorder::attach(&op);

    tick_until_done(&shell, &op)?;

    assert_eq!(recorder.texts(), vec!["marker.txt"]);
    Ok(())
}

#[test]
fn output_backslashes_become_forward_slashes() -> Result<()> {
    let shell = shell()?;
    let op = shell.execute_one("printf 'a\\\\b\\\\c\\n'; printf 'x\\\\y\\n' >&2", utf8());
    let recorder = Recorder::attach(&op);

    tick_until_done(&shell, &op)?;

    assert_eq!(
        recorder.lines(),
        vec![LogLine::output("a/b/c"), LogLine::error("x\\y")]
    );
    Ok(())
}

#[test]
fn latin1_output_is_decoded_per_byte() -> Result<()> {
    let shell = shell()?;
    let op = shell.execute_one(
        "printf 'caf\\351\\n'",
        ShellOptions::new().encoding(OutputEncoding::Latin1),
    );
    let recorder = Recorder::attach(&op);

    tick_until_done(&shell, &op)?;

    assert_eq!(recorder.texts(), vec!["café"]);
    Ok(())
}

#[test]
fn panicking_observer_does_not_stop_other_operations() -> Result<()> {
    let reporter = Arc::new(tickshell_commons::MemoryErrorReporter::default());
    let shell = shell()?.with_queue(DispatchQueue::with_reporter(reporter.clone()));

    let noisy = shell.execute_one("echo boom", utf8());
    noisy.on_log(|_| panic!("observer exploded"));
    let quiet = shell.execute_one("echo fine", utf8());
    let recorder = Recorder::attach(&quiet);

    tick_until(&shell, || noisy.is_done() && quiet.is_done())?;

    assert_eq!(noisy.exit_code(), Some(0));
    assert_eq!(recorder.texts(), vec!["fine"]);
    assert_eq!(reporter.messages().len(), 1);
    assert!(reporter.messages()[0].contains("observer exploded"));
    Ok(())
}

#[test]
fn panicking_exit_observer_does_not_starve_the_others() -> Result<()> {
    let reporter = Arc::new(tickshell_commons::MemoryErrorReporter::default());
    let shell = shell()?.with_queue(DispatchQueue::with_reporter(reporter.clone()));

    let op = shell.execute_one("exit 4", utf8());
    op.on_exit(|_| panic!("exit observer exploded"));
    let recorder = Recorder::attach(&op);

    tick_until_done(&shell, &op)?;

    assert_eq!(recorder.exits(), vec![4]);
    assert_eq!(reporter.messages().len(), 1);
    assert!(reporter.messages()[0].contains("exit observer exploded"));
    Ok(())
}

#[test]
fn concurrent_operations_all_complete() -> Result<()> {
    let shell = shell()?;
    let completed = Arc::new(AtomicUsize::new(0));
    let ops: Vec<_> = (0..8)
        .map(|i| {
            let op = shell.execute_one(format!("echo {i}"), utf8());
            let completed = Arc::clone(&completed);
            op.on_exit(move |_| {
                completed.fetch_add(1, Ordering::SeqCst);
            });
            op
        })
        .collect();

    tick_until(&shell, || ops.iter().all(|op| op.is_done()))?;

    assert_eq!(completed.load(Ordering::SeqCst), 8);
    assert!(ops.iter().all(|op| op.exit_code() == Some(0)));
    Ok(())
}

#[test]
fn draining_from_another_thread_is_refused() -> Result<()> {
    let shell = shell()?;
    shell.tick()?;
    let queue = shell.queue().clone();
    let result = std::thread::spawn(move || queue.drain()).join();
    assert!(matches!(
        result,
        Ok(Err(tickshell_runner::ShellError::WrongThread))
    ));
    Ok(())
}
