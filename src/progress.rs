//! Progress reporting for long table scans.
//!
//! Purely observational: implementations must not influence which records
//! get migrated or how failures are handled.

use tracing::info;

pub trait Progress: Send + Sync {
    fn start(&self, label: &str, total: u64) -> Box<dyn ProgressBar>;
}

pub trait ProgressBar: Send {
    fn tick(&mut self);
    fn finish(&mut self);
}

/// Emits a log line every `interval` ticks plus one on completion.
pub struct LogProgress {
    pub interval: u64,
}

impl Default for LogProgress {
    fn default() -> Self {
        Self { interval: 1000 }
    }
}

impl Progress for LogProgress {
    fn start(&self, label: &str, total: u64) -> Box<dyn ProgressBar> {
        info!(label, total, "starting");
        Box::new(LogBar {
            label: label.to_string(),
            total,
            done: 0,
            interval: self.interval.max(1),
        })
    }
}

struct LogBar {
    label: String,
    total: u64,
    done: u64,
    interval: u64,
}

impl ProgressBar for LogBar {
    fn tick(&mut self) {
        self.done += 1;
        if self.done % self.interval == 0 {
            info!(label = %self.label, done = self.done, total = self.total, "progress");
        }
    }

    fn finish(&mut self) {
        info!(label = %self.label, done = self.done, total = self.total, "finished");
    }
}

/// Discards all events. Handy for library callers that do their own logging.
pub struct NoProgress;

impl Progress for NoProgress {
    fn start(&self, _label: &str, _total: u64) -> Box<dyn ProgressBar> {
        Box::new(NoBar)
    }
}

struct NoBar;

impl ProgressBar for NoBar {
    fn tick(&mut self) {}
    fn finish(&mut self) {}
}
