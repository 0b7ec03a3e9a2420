//! Ready-made adapters for the traits in this crate, mostly useful in tests.

use std::sync::Arc;

use anyhow::{Error, Result};
use parking_lot::Mutex;

use crate::errors::ErrorReporter;

/// Reporter that keeps every captured error message in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryErrorReporter {
    messages: Arc<Mutex<Vec<String>>>,
}

impl MemoryErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the captured messages, oldest first.
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

impl ErrorReporter for MemoryErrorReporter {
    fn capture(&self, error: &Error) -> Result<()> {
        self.messages.lock().push(format!("{error:#}"));
        Ok(())
    }
}
