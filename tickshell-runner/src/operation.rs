//! Caller-facing handle for one asynchronous shell invocation.
//!
//! State changes reach an [`Operation`] through callbacks drained from the
//! [`DispatchQueue`](crate::DispatchQueue), so observers run on the host's
//! consumer thread. The worker touches the operation directly only to read
//! the kill flag before spawning and to bind and later release the child,
//! all under the lock [`Operation::kill`] takes. A kill that finds no bound
//! child completes the operation on the calling thread.

use std::fmt;
use std::io;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::dispatch::panic_message;
use crate::log::{LogKind, LogLine};

/// Exit code reported when [`Operation::kill`] completes an operation that
/// never had a live process.
pub const KILLED_EXIT_CODE: i32 = 137;

/// Strategy for forcibly stopping a spawned child.
pub trait ChildTerminator: Send + Sync {
    /// Kill the child process.
    fn kill(&mut self) -> io::Result<()>;
}

type LogObserver = Box<dyn FnMut(&LogLine) + Send>;
type ExitObserver = Box<dyn FnOnce(i32) + Send>;

/// Shared, cloneable handle. Clones observe and control the same invocation.
#[derive(Clone)]
pub struct Operation {
    inner: Arc<OperationState>,
}

struct OperationState {
    id: u64,
    kill_exit_code: i32,
    // Guarded by `process` for writes so a kill and a bind never interleave.
    kill_requested: AtomicBool,
    exit_code: OnceLock<i32>,
    has_error: AtomicBool,
    process: Mutex<Option<Box<dyn ChildTerminator>>>,
    log_observers: Mutex<Vec<LogObserver>>,
    exit_observers: Mutex<Vec<ExitObserver>>,
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id())
            .field("kill_requested", &self.is_kill_requested())
            .field("done", &self.is_done())
            .field("has_error", &self.has_error())
            .field("exit_code", &self.exit_code())
            .finish()
    }
}

/// Result of handing a spawned child to its operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Binding {
    Bound,
    /// A kill arrived first; the child was terminated on the spot.
    KilledOnArrival,
}

impl Operation {
    pub(crate) fn new(id: u64, kill_exit_code: i32) -> Self {
        Self {
            inner: Arc::new(OperationState {
                id,
                kill_exit_code,
                kill_requested: AtomicBool::new(false),
                exit_code: OnceLock::new(),
                has_error: AtomicBool::new(false),
                process: Mutex::new(None),
                log_observers: Mutex::new(Vec::new()),
                exit_observers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_kill_requested(&self) -> bool {
        self.inner.kill_requested.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        self.inner.exit_code.get().is_some()
    }

    /// True once any Error line was fed. Never resets.
    pub fn has_error(&self) -> bool {
        self.inner.has_error.load(Ordering::Acquire)
    }

    /// Exit code, available once the operation is done.
    pub fn exit_code(&self) -> Option<i32> {
        self.inner.exit_code.get().copied()
    }

    /// Whether a live child is currently bound.
    pub fn has_process(&self) -> bool {
        self.inner.process.lock().is_some()
    }

    /// Observe every log line fed from now on.
    pub fn on_log<F>(&self, observer: F)
    where
        F: FnMut(&LogLine) + Send + 'static,
    {
        self.inner.log_observers.lock().push(Box::new(observer));
    }

    /// Observe completion. Registering after completion never fires.
    pub fn on_exit<F>(&self, observer: F)
    where
        F: FnOnce(i32) + Send + 'static,
    {
        if self.is_done() {
            trace!(operation = self.id(), "exit observer registered after completion");
        }
        self.inner.exit_observers.lock().push(Box::new(observer));
    }

    /// Request termination. Only the first call has any effect; it returns
    /// whether this call was that first one.
    ///
    /// With a live child bound, the child's process group is killed and the
    /// runner completes the operation with whatever exit code the OS
    /// reports. Without one (not spawned yet, or already exited and reaped)
    /// the operation completes right here, on the calling thread, with the
    /// kill exit code (137 unless configured otherwise).
    pub fn kill(&self) -> bool {
        let terminator = {
            let mut process = self.inner.process.lock();
            if self.inner.kill_requested.swap(true, Ordering::AcqRel) {
                return false;
            }
            process.take()
        };

        match terminator {
            Some(mut terminator) => {
                debug!(operation = self.id(), "killing bound process");
                if let Err(error) = terminator.kill() {
                    warn!(operation = self.id(), %error, "failed to kill process");
                }
            }
            None => {
                debug!(operation = self.id(), "no live process; completing synthetically");
                self.fire_done(self.inner.kill_exit_code);
            }
        }
        true
    }

    /// Attach the live child. If a kill got here first the child is killed
    /// instead of stored.
    pub(crate) fn bind_process(&self, mut terminator: Box<dyn ChildTerminator>) -> Binding {
        let mut process = self.inner.process.lock();
        if self.inner.kill_requested.load(Ordering::Acquire) {
            drop(process);
            if let Err(error) = terminator.kill() {
                warn!(operation = self.id(), %error, "failed to kill late-bound process");
            }
            return Binding::KilledOnArrival;
        }
        *process = Some(terminator);
        Binding::Bound
    }

    /// Forget the bound child once it has been reaped.
    pub(crate) fn release_process(&self) {
        if self.inner.process.lock().take().is_some() {
            trace!(operation = self.id(), "released exited process");
        }
    }

    /// Deliver one line to the log observers. Lines arriving after
    /// completion are dropped.
    pub(crate) fn feed_log(&self, line: LogLine) {
        if self.is_done() {
            trace!(operation = self.id(), "dropping log line fed after completion");
            return;
        }
        if line.kind() == LogKind::Error {
            self.inner.has_error.store(true, Ordering::Release);
        }

        // Run observers outside the lock so they may register more.
        let mut running = RunningObservers {
            slot: &self.inner.log_observers,
            observers: mem::take(&mut *self.inner.log_observers.lock()),
        };
        for observer in &mut running.observers {
            observer(&line);
        }
    }

    /// Complete the operation. Only the first call has any effect; it
    /// returns whether this call was that first one.
    ///
    /// Every exit observer runs even if one panics; the first panic is
    /// resumed afterwards.
    pub(crate) fn fire_done(&self, exit_code: i32) -> bool {
        if self.inner.exit_code.set(exit_code).is_err() {
            return false;
        }
        self.inner.process.lock().take();
        debug!(operation = self.id(), exit_code, "operation completed");

        let observers = mem::take(&mut *self.inner.exit_observers.lock());
        let mut first_panic = None;
        for observer in observers {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| observer(exit_code))) {
                error!(
                    operation = self.id(),
                    error = %panic_message(payload.as_ref()),
                    "exit observer panicked"
                );
                if first_panic.is_none() {
                    first_panic = Some(payload);
                }
            }
        }
        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
        true
    }
}

/// Log observers taken out of their slot while they run. Dropping puts
/// them back ahead of any registered meanwhile, also when one panics.
struct RunningObservers<'a> {
    slot: &'a Mutex<Vec<LogObserver>>,
    observers: Vec<LogObserver>,
}

impl Drop for RunningObservers<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        let added = mem::replace(&mut *slot, mem::take(&mut self.observers));
        slot.extend(added);
    }
}
