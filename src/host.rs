//! A minimal cooperative host loop.

use std::thread;
use std::time::{Duration, Instant};

use tickshell_runner::TickSource;
use tracing::trace;

/// Fixed-rate loop that calls its hooks once per iteration on the thread
/// that runs it.
pub struct TickLoop {
    interval: Duration,
    hooks: Vec<Box<dyn FnMut()>>,
}

impl TickLoop {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            hooks: Vec::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run every hook once, in registration order.
    pub fn tick_once(&mut self) {
        for hook in &mut self.hooks {
            hook();
        }
    }

    /// Tick until `done` returns true, checking it after every iteration.
    /// Returns the number of iterations run.
    ///
    /// Iterations are scheduled on a fixed grid; one that overruns its slot
    /// skips the missed slots instead of bursting to catch up.
    pub fn run_until(&mut self, mut done: impl FnMut() -> bool) -> u64 {
        let mut ticks = 0;
        let mut next = Instant::now();
        loop {
            self.tick_once();
            ticks += 1;
            if done() {
                trace!(ticks, "host loop finished");
                return ticks;
            }

            next += self.interval;
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            } else {
                next = now;
            }
        }
    }
}

impl TickSource for TickLoop {
    fn on_tick(&mut self, hook: Box<dyn FnMut()>) {
        self.hooks.push(hook);
    }
}
