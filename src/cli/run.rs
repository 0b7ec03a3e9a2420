use std::io::{self, Write};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tickshell_commons::{current_path_entries, join_path_list, split_path_list};
use tickshell_runner::{
    FAILURE_EXIT_CODE, LogLine, OutputEncoding, Shell, ShellOptions,
};
use tracing::{info, warn};

use super::RunArgs;
use crate::config::TickshellConfig;
use crate::host::TickLoop;

/// Execute `args` and return the child's exit code.
pub fn handle_run_command(args: &RunArgs, config: &TickshellConfig) -> Result<i32> {
    let options = shell_options(args);
    let shell = Shell::new(config.runner.clone()).context("failed to start shell runner")?;

    if args.sync {
        if args.timeout_ms.is_some() {
            warn!("--timeout-ms has no effect with --sync");
        }
        let output = shell
            .execute_sync(&args.commands, &options)
            .context("command failed to run")?;
        for line in &output.logs {
            emit(line);
        }
        return Ok(output.exit_code);
    }

    let op = shell.execute(args.commands.iter().cloned(), options);
    op.on_log(emit);

    let interval = Duration::from_millis(args.tick_ms.unwrap_or(config.host.tick_interval_ms));
    let mut host = TickLoop::new(interval);
    shell.attach(&mut host);

    let deadline = args
        .timeout_ms
        .map(|ms| Instant::now() + Duration::from_millis(ms));
    let ticks = host.run_until(|| {
        if let Some(deadline) = deadline
            && !op.is_kill_requested()
            && Instant::now() >= deadline
        {
            info!(operation = op.id(), "timeout reached; killing operation");
            op.kill();
        }
        op.is_done()
    });
    info!(operation = op.id(), ticks, exit_code = ?op.exit_code(), "operation finished");

    Ok(op.exit_code().unwrap_or(FAILURE_EXIT_CODE))
}

fn shell_options(args: &RunArgs) -> ShellOptions {
    let mut options = ShellOptions::new()
        .encoding(args.encoding.unwrap_or_else(OutputEncoding::system))
        .chain_policy(args.chain)
        .envs(args.env.iter().cloned());
    if let Some(cwd) = &args.cwd {
        options = options.work_directory(cwd);
    }

    if !args.path_prepend.is_empty() {
        let mut entries = args.path_prepend.clone();
        match options.environment_vars.get("PATH") {
            Some(path) => entries.extend(split_path_list(path)),
            None => entries.extend(current_path_entries()),
        }
        options = options.env("PATH", join_path_list(&entries));
    }
    options
}

/// Output lines to stdout, Error lines to stderr. A closed pipe is ignored.
fn emit(line: &LogLine) {
    let result = if line.is_error() {
        writeln!(io::stderr().lock(), "{line}")
    } else {
        writeln!(io::stdout().lock(), "{line}")
    };
    if let Err(err) = result
        && err.kind() != io::ErrorKind::BrokenPipe
    {
        warn!(error = %err, "failed to write output line");
    }
}

/// Map a child exit code onto a process exit status.
pub fn process_exit_status(code: i32) -> u8 {
    if code < 0 {
        return 1;
    }
    u8::try_from(code.min(i32::from(u8::MAX))).unwrap_or(u8::MAX)
}
