#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use parking_lot::Mutex;
use tickshell_runner::{LogLine, Operation, RunnerConfig, Shell};

/// Everything an operation reported, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Log(LogLine),
    Exit(i32),
}

#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn attach(op: &Operation) -> Self {
        let recorder = Self::default();
        let logs = Arc::clone(&recorder.events);
        op.on_log(move |line| logs.lock().push(Event::Log(line.clone())));
        let exits = Arc::clone(&recorder.events);
        op.on_exit(move |code| exits.lock().push(Event::Exit(code)));
        recorder
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Log(line) => Some(line.clone()),
                Event::Exit(_) => None,
            })
            .collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.lines().into_iter().map(LogLine::into_text).collect()
    }

    pub fn exits(&self) -> Vec<i32> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Exit(code) => Some(*code),
                Event::Log(_) => None,
            })
            .collect()
    }
}

pub fn shell() -> Result<Shell> {
    Shell::new(RunnerConfig {
        worker_threads: 2,
        ..RunnerConfig::default()
    })
}

/// Tick `shell` the way a host loop would until `op` completes.
pub fn tick_until_done(shell: &Shell, op: &Operation) -> Result<()> {
    tick_until(shell, || op.is_done())
}

pub fn tick_until(shell: &Shell, mut condition: impl FnMut() -> bool) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        shell.tick()?;
        if condition() {
            return Ok(());
        }
        if Instant::now() > deadline {
            bail!("condition not reached before deadline");
        }
        thread::sleep(Duration::from_millis(5));
    }
}
