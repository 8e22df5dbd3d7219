//! Scheduler layer for the runner
//!
//! Watches the configured source and launches a run whenever its revision
//! changes.

pub mod watcher;

pub use watcher::SourceWatcher;
