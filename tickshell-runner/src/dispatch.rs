//! FIFO of callbacks produced on worker threads and run on the host's
//! designated thread.
//!
//! Workers only ever [`enqueue`](DispatchQueue::enqueue). The host calls
//! [`drain`](DispatchQueue::drain) once per iteration of its main loop, which
//! pops callbacks one at a time and runs them outside the lock. A callback
//! that panics is logged and reported; the rest of the queue still drains.
//!
//! The first thread that drains a queue becomes its consumer. Draining from
//! any other thread afterwards is refused, which keeps every operation
//! mutation on a single thread.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use anyhow::anyhow;
use parking_lot::Mutex;
use tickshell_commons::{ErrorReporter, NoopErrorReporter};
use tracing::{error, trace, warn};

use crate::error::ShellError;

/// A unit of work queued for the consumer thread.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Something that can call a hook once per iteration of a host main loop.
pub trait TickSource {
    fn on_tick(&mut self, hook: Box<dyn FnMut()>);
}

/// What a single drain step did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Callbacks that ran, including the ones that panicked.
    pub executed: usize,
    /// Callbacks that panicked.
    pub failed: usize,
}

#[derive(Clone, Default)]
pub struct DispatchQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    pending: Mutex<VecDeque<Callback>>,
    consumer: OnceLock<ThreadId>,
    reporter: Arc<dyn ErrorReporter>,
}

impl Default for QueueInner {
    fn default() -> Self {
        Self {
            pending: Mutex::default(),
            consumer: OnceLock::new(),
            reporter: Arc::new(NoopErrorReporter),
        }
    }
}

impl fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("pending", &self.len())
            .field("consumer", &self.inner.consumer.get())
            .finish()
    }
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue whose callback failures are also forwarded to `reporter`.
    pub fn with_reporter(reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                reporter,
                ..QueueInner::default()
            }),
        }
    }

    /// Append a callback. Safe to call from any thread.
    pub fn enqueue<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.pending.lock().push_back(Box::new(callback));
    }

    pub fn len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.pending.lock().is_empty()
    }

    /// Thread bound as consumer, once something has drained this queue.
    pub fn consumer(&self) -> Option<ThreadId> {
        self.inner.consumer.get().copied()
    }

    /// Run queued callbacks until the queue is empty.
    ///
    /// Callbacks enqueued while draining run in the same step.
    pub fn drain(&self) -> Result<DrainReport, ShellError> {
        let current = thread::current().id();
        let consumer = *self.inner.consumer.get_or_init(|| current);
        if consumer != current {
            warn!(?consumer, ?current, "refusing to drain dispatch queue off its consumer thread");
            return Err(ShellError::WrongThread);
        }

        let mut report = DrainReport::default();
        loop {
            let next = self.inner.pending.lock().pop_front();
            let Some(callback) = next else {
                break;
            };

            report.executed += 1;
            if let Err(payload) = catch_unwind(AssertUnwindSafe(callback)) {
                report.failed += 1;
                let message = panic_message(payload.as_ref());
                error!(error = %message, "queued callback panicked");
                if let Err(report_err) = self
                    .inner
                    .reporter
                    .capture(&anyhow!("queued callback panicked: {message}"))
                {
                    warn!(error = %report_err, "failed to report callback panic");
                }
            }
        }

        if report.executed > 0 {
            trace!(executed = report.executed, failed = report.failed, "drained dispatch queue");
        }
        Ok(report)
    }

    /// Register [`drain`](Self::drain) as a per-tick hook on `source`.
    pub fn attach<T: TickSource + ?Sized>(&self, source: &mut T) {
        let queue = self.clone();
        source.on_tick(Box::new(move || {
            if let Err(err) = queue.drain() {
                warn!(error = %err, "dispatch queue tick skipped");
            }
        }));
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
