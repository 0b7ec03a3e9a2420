//! Asynchronous process runner.
//!
//! One task per invocation on the worker runtime. The task builds the
//! [`CommandSpec`], spawns the shell in its own process group, streams stdout
//! line by line into the dispatch queue, then queues the stderr lines and
//! finally a single completion callback. Every failure is caught here and
//! turned into an Error line plus exit code `-1`.

use std::io;
use std::process::Stdio;
use std::sync::Arc;

use parking_lot::Mutex;
use tickshell_commons::{DisplayErrorFormatter, ErrorFormatter};
use tokio::io::{AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tracing::{Instrument, debug, error, info_span, trace, warn};

use crate::command::{CommandSpec, CommandSpecBuilder, ShellKind, ShellOptions};
use crate::config::RunnerConfig;
use crate::dispatch::DispatchQueue;
use crate::encoding::OutputEncoding;
use crate::error::ShellError;
use crate::log::LogLine;
use crate::operation::{Binding, ChildTerminator, Operation};
use crate::process_group;
use crate::stream::{ReadLineResult, StderrFilter, read_line_with_limit};

/// Exit code reported when the runner itself failed.
pub const FAILURE_EXIT_CODE: i32 = -1;

/// Windows `CREATE_NO_WINDOW`.
#[cfg(windows)]
pub(crate) const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Terminator that kills the shell's whole process group.
///
/// Clones share the exited flag. Once the runner has reaped the shell the
/// group id may belong to someone else, so no signal is sent after that.
#[derive(Clone)]
struct GroupTerminator {
    #[cfg(windows)]
    pid: u32,
    #[cfg(unix)]
    process_group_id: u32,
    exited: Arc<Mutex<bool>>,
}

impl GroupTerminator {
    #[cfg_attr(not(any(unix, windows)), allow(unused_variables))]
    fn new(pid: u32) -> Self {
        Self {
            #[cfg(windows)]
            pid,
            #[cfg(unix)]
            process_group_id: pid,
            exited: Arc::new(Mutex::new(false)),
        }
    }

    fn mark_exited(&self) {
        *self.exited.lock() = true;
    }
}

impl ChildTerminator for GroupTerminator {
    fn kill(&mut self) -> io::Result<()> {
        // Held while signalling so `mark_exited` cannot slip in between.
        let exited = self.exited.lock();
        if *exited {
            trace!("shell already reaped; not signalling");
            return Ok(());
        }

        #[cfg(unix)]
        {
            process_group::kill_process_group(self.process_group_id)
        }

        #[cfg(windows)]
        {
            process_group::kill_process(self.pid)
        }

        #[cfg(not(any(unix, windows)))]
        {
            Ok(())
        }
    }
}

/// Everything a worker task needs, moved onto the runtime.
pub(crate) struct Invocation {
    pub commands: Vec<String>,
    pub options: ShellOptions,
    pub config: Arc<RunnerConfig>,
    pub queue: DispatchQueue,
    pub operation: Operation,
}

/// Start `invocation` on `runtime`. Returns immediately.
pub(crate) fn spawn_invocation(runtime: &Handle, invocation: Invocation) {
    let span = info_span!("operation", id = invocation.operation.id());
    runtime.spawn(
        async move {
            if let Err(err) = run_invocation(&invocation).await {
                let description = DisplayErrorFormatter
                    .format_error(&anyhow::Error::new(err))
                    .into_owned();
                error!(error = %description, "shell invocation failed");
                let operation = invocation.operation.clone();
                invocation.queue.enqueue(move || {
                    operation.feed_log(LogLine::error(description));
                    operation.fire_done(FAILURE_EXIT_CODE);
                });
            }
        }
        .instrument(span),
    );
}

async fn run_invocation(invocation: &Invocation) -> Result<(), ShellError> {
    let Invocation {
        commands,
        options,
        config,
        queue,
        operation,
    } = invocation;

    let spec = CommandSpecBuilder::new(ShellKind::current())
        .program(config.shell_program.as_deref())
        .build(commands, options)?;

    if operation.is_kill_requested() {
        debug!("kill requested before spawn; not spawning");
        return Ok(());
    }

    let mut child = spawn_child(&spec)?;
    let pid = child
        .id()
        .ok_or_else(|| ShellError::io("spawned shell has no pid", io::Error::other("missing child pid")))?;
    let mut terminator = GroupTerminator::new(pid);
    if operation.bind_process(Box::new(terminator.clone())) == Binding::KilledOnArrival {
        debug!(pid, "operation was killed while spawning");
    }
    debug!(pid, invocation = %spec.invocation, "spawned shell");

    let streamed = stream_output(&mut child, &spec, invocation).await;
    if streamed.is_err()
        && let Err(err) = terminator.kill()
    {
        warn!(pid, error = %err, "failed to kill shell after read error");
    }

    // From here on the pid may be reused, so the operation must forget it
    // before anything else can try to kill it.
    let exit = wait_for_exit(&mut child).await;
    terminator.mark_exited();
    operation.release_process();

    streamed?;
    let exit_code = exit?;
    debug!(exit_code, "shell exited");
    let operation = operation.clone();
    queue.enqueue(move || {
        operation.fire_done(exit_code);
    });
    Ok(())
}

/// Queue every stdout line as it arrives, then the stderr lines.
async fn stream_output(child: &mut Child, spec: &CommandSpec, invocation: &Invocation) -> Result<(), ShellError> {
    let Invocation {
        config,
        queue,
        operation,
        ..
    } = invocation;

    // Redirected but unused: closing it gives the child an immediate EOF.
    drop(child.stdin.take());
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ShellError::io("child stdout was not captured", io::Error::other("missing stdout")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ShellError::io("child stderr was not captured", io::Error::other("missing stderr")))?;

    // Stderr is drained alongside stdout so a chatty child cannot fill the
    // pipe and stall, but its lines are queued only after stdout ends.
    let stderr_task = tokio::spawn(
        collect_error_lines(
            stderr,
            spec.encoding,
            config.max_line_bytes,
            config.stop_stderr_at_blank_line,
        )
        .in_current_span(),
    );

    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        let result = read_line_with_limit(&mut reader, &mut buf, config.max_line_bytes)
            .await
            .map_err(|err| ShellError::io("failed to read child stdout", err))?;
        if result == ReadLineResult::Eof {
            break;
        }
        if result == ReadLineResult::Truncated {
            debug!(limit = config.max_line_bytes, "stdout line truncated");
        }
        let line = LogLine::output(spec.encoding.decode(&buf));
        let operation = operation.clone();
        queue.enqueue(move || operation.feed_log(line));
    }

    let error_lines = stderr_task
        .await
        .map_err(|err| ShellError::io("stderr reader task failed", io::Error::other(err)))??;
    for text in error_lines {
        let operation = operation.clone();
        queue.enqueue(move || operation.feed_log(LogLine::error(text)));
    }
    Ok(())
}

fn spawn_child(spec: &CommandSpec) -> Result<Child, ShellError> {
    let mut command = Command::new(&spec.program);
    command
        .args(spec.args())
        .current_dir(&spec.work_directory)
        .envs(&spec.environment)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    unsafe {
        command.pre_exec(process_group::detach_from_tty);
    }

    #[cfg(windows)]
    command.creation_flags(CREATE_NO_WINDOW);

    command.spawn().map_err(|source| ShellError::Spawn {
        program: spec.program.clone(),
        source,
    })
}

async fn wait_for_exit(child: &mut Child) -> Result<i32, ShellError> {
    let status = child
        .wait()
        .await
        .map_err(|err| ShellError::io("failed to wait for shell exit", err))?;
    Ok(process_group::exit_code_of(status))
}

/// Read stderr to completion, keeping the lines [`StderrFilter`] accepts.
async fn collect_error_lines<R>(
    stderr: R,
    encoding: OutputEncoding,
    max_line_bytes: usize,
    stop_at_blank_line: bool,
) -> Result<Vec<String>, ShellError>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    let mut lines = Vec::new();
    let mut filter = StderrFilter::new(stop_at_blank_line);

    while read_line_with_limit(&mut reader, &mut buf, max_line_bytes)
        .await
        .map_err(|err| ShellError::io("failed to read child stderr", err))?
        != ReadLineResult::Eof
    {
        if filter.keep(&buf) {
            lines.push(encoding.decode(&buf));
        }
    }
    Ok(lines)
}
