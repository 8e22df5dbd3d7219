//! Execution context for pipeline runs
//!
//! Contains the state a run's stages share while it executes:
//! - Log buffer preserved on the run record for diagnosis
//! - Cancellation token, and whether cancelling is still allowed to abort

use convoy_core::domain::log::{LogEntry, LogLevel};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Execution context shared across the stages of one run
pub struct RunContext {
    run_id: Uuid,

    /// Log buffer with entries
    log_buffer: Mutex<Vec<LogEntry>>,

    cancel: CancellationToken,

    /// Set once the run produced a side effect a cancel cannot undo
    irreversible: AtomicBool,
}

impl RunContext {
    /// Creates a new execution context
    pub fn new(run_id: Uuid, cancel: CancellationToken) -> Self {
        Self {
            run_id,
            log_buffer: Mutex::new(Vec::new()),
            cancel,
            irreversible: AtomicBool::new(false),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// A cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A cancellation was requested and may still abort the run
    pub fn should_abort(&self) -> bool {
        self.is_cancelled() && !self.irreversible.load(Ordering::SeqCst)
    }

    /// Records that an irreversible side effect (an image push) completed
    pub fn mark_irreversible(&self) {
        self.irreversible.store(true, Ordering::SeqCst);
    }

    /// Adds a log entry to the buffer
    pub fn add_log(&self, entry: LogEntry) {
        let mut buffer = self.log_buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.push(entry);
    }

    /// Logs a debug message
    pub fn log_debug(&self, message: impl Into<String>) {
        self.add_log(LogEntry::new(LogLevel::Debug, message));
    }

    /// Logs an info message
    pub fn log_info(&self, message: impl Into<String>) {
        self.add_log(LogEntry::new(LogLevel::Info, message));
    }

    /// Logs a warning message
    pub fn log_warning(&self, message: impl Into<String>) {
        self.add_log(LogEntry::new(LogLevel::Warning, message));
    }

    /// Logs an error message
    pub fn log_error(&self, message: impl Into<String>) {
        self.add_log(LogEntry::new(LogLevel::Error, message));
    }

    /// Drains all log entries from the buffer
    pub fn drain_logs(&self) -> Vec<LogEntry> {
        let mut buffer = self.log_buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.drain(..).collect()
    }
}
