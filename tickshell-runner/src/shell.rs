//! Entry point tying the pieces together.
//!
//! A [`Shell`] owns the worker runtime, the [`DispatchQueue`] its operations
//! report through, and the blocking executor used by the synchronous path.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, info};

use crate::command::{CommandSpecBuilder, ShellKind, ShellOptions};
use crate::config::RunnerConfig;
use crate::dispatch::{DispatchQueue, DrainReport, TickSource};
use crate::error::ShellError;
use crate::executor::{CommandExecutor, ExecOutput, ProcessCommandExecutor};
use crate::log::LogLine;
use crate::operation::Operation;
use crate::runner::{FAILURE_EXIT_CODE, Invocation, spawn_invocation};

enum WorkerRuntime {
    Owned(Option<Runtime>),
    Shared(Handle),
}

impl WorkerRuntime {
    fn handle(&self) -> Option<&Handle> {
        match self {
            Self::Owned(runtime) => runtime.as_ref().map(Runtime::handle),
            Self::Shared(handle) => Some(handle),
        }
    }
}

pub struct Shell {
    queue: DispatchQueue,
    runtime: WorkerRuntime,
    config: Arc<RunnerConfig>,
    executor: Arc<dyn CommandExecutor>,
    next_id: AtomicU64,
}

impl fmt::Debug for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shell")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .field("owns_runtime", &matches!(self.runtime, WorkerRuntime::Owned(_)))
            .finish()
    }
}

impl Shell {
    /// Start a shell with its own multi-threaded worker runtime.
    pub fn new(config: RunnerConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name("tickshell-worker")
            .enable_all()
            .build()
            .context("failed to start worker runtime")?;
        info!(worker_threads = config.worker_threads, "started worker runtime");
        Ok(Self::assemble(WorkerRuntime::Owned(Some(runtime)), config))
    }

    /// Run invocations on an existing runtime instead of starting one.
    pub fn with_runtime(handle: Handle, config: RunnerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(WorkerRuntime::Shared(handle), config))
    }

    fn assemble(runtime: WorkerRuntime, config: RunnerConfig) -> Self {
        let executor = Arc::new(ProcessCommandExecutor::new(&config));
        Self {
            queue: DispatchQueue::new(),
            runtime,
            config: Arc::new(config),
            executor,
            next_id: AtomicU64::new(1),
        }
    }

    /// Report through `queue`, e.g. one carrying an error reporter or shared
    /// with other shells.
    pub fn with_queue(mut self, queue: DispatchQueue) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    /// Start `commands` in the background and return its handle right away.
    ///
    /// Nothing observable happens until the queue is drained: every log line
    /// and the completion arrive through [`Shell::tick`] on the consumer
    /// thread. Build and spawn failures complete the operation with exit code
    /// `-1` and one Error line.
    pub fn execute<I, S>(&self, commands: I, options: ShellOptions) -> Operation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let operation = Operation::new(id, self.config.kill_exit_code);
        let invocation = Invocation {
            commands: commands.into_iter().map(Into::into).collect(),
            options,
            config: Arc::clone(&self.config),
            queue: self.queue.clone(),
            operation: operation.clone(),
        };

        match self.runtime.handle() {
            Some(handle) => {
                debug!(operation = id, "queued shell invocation");
                spawn_invocation(handle, invocation);
            }
            None => {
                let operation = operation.clone();
                self.queue.enqueue(move || {
                    operation.feed_log(LogLine::error("worker runtime is shut down"));
                    operation.fire_done(FAILURE_EXIT_CODE);
                });
            }
        }
        operation
    }

    pub fn execute_one(&self, command: impl Into<String>, options: ShellOptions) -> Operation {
        self.execute([command.into()], options)
    }

    /// Run `commands` to completion on the calling thread.
    ///
    /// Do not call this from the consumer thread of a live host loop; it
    /// blocks until the child exits.
    pub fn execute_sync<I, S>(&self, commands: I, options: &ShellOptions) -> Result<ExecOutput, ShellError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let spec = CommandSpecBuilder::new(ShellKind::current())
            .program(self.config.shell_program.as_deref())
            .build(commands, options)?;
        self.executor.execute(&spec)
    }

    pub fn execute_sync_one(&self, command: &str, options: &ShellOptions) -> Result<ExecOutput, ShellError> {
        self.execute_sync([command], options)
    }

    /// Drain the dispatch queue. Call once per host-loop iteration.
    pub fn tick(&self) -> Result<DrainReport, ShellError> {
        self.queue.drain()
    }

    /// Hook [`Shell::tick`] into a host loop.
    pub fn attach<T: TickSource + ?Sized>(&self, source: &mut T) {
        self.queue.attach(source);
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        // Dropping a runtime blocks on its workers and panics inside async
        // contexts; detach instead. Children die with their Child handles.
        if let WorkerRuntime::Owned(runtime) = &mut self.runtime
            && let Some(runtime) = runtime.take()
        {
            runtime.shutdown_background();
        }
    }
}
