//! Progress reporting and cooperative cancellation.
//!
//! Long-running operations (flush, statistics, histogram, raster copy) take a
//! `&dyn ProgressSink` and call [`report`](ProgressSink::report) after each
//! unit of work. A `false` return asks the operation to stop; it then
//! releases its block leases and fails with `Error::Cancelled`.
//!
//! # Example
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use geoblock_io::progress::ProgressSink;
//!
//! let calls = AtomicUsize::new(0);
//! let stop_after_three = |_fraction: f64, _msg: &str| calls.fetch_add(1, Ordering::Relaxed) < 3;
//! assert!(stop_after_three.report(0.0, ""));
//! ```

use std::sync::Mutex;
use std::sync::PoisonError;

use tracing::info;

/// Receiver of progress updates.
pub trait ProgressSink: Send + Sync {
    /// Reports completion in `[0, 1]`. Returns `false` to cancel.
    fn report(&self, fraction: f64, message: &str) -> bool;
}

impl<F> ProgressSink for F
where
    F: Fn(f64, &str) -> bool + Send + Sync,
{
    fn report(&self, fraction: f64, message: &str) -> bool {
        self(fraction, message)
    }
}

/// Sink that ignores updates and never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _fraction: f64, _message: &str) -> bool {
        true
    }
}

/// Maps `[0, 1]` onto `[start, end]` of a parent sink.
///
/// Used to give each step of a multi-step operation (one band of a dataset
/// copy, say) its slice of the overall progress.
pub struct ScaledProgress<'a> {
    parent: &'a dyn ProgressSink,
    start: f64,
    end: f64,
}

impl<'a> ScaledProgress<'a> {
    /// Wraps `parent`, mapping progress into `[start, end]`.
    pub fn new(parent: &'a dyn ProgressSink, start: f64, end: f64) -> Self {
        Self { parent, start, end }
    }

    /// Slice `step` of `steps` equal slices.
    pub fn step(parent: &'a dyn ProgressSink, step: usize, steps: usize) -> Self {
        let steps = steps.max(1) as f64;
        Self::new(parent, step as f64 / steps, (step + 1) as f64 / steps)
    }
}

impl ProgressSink for ScaledProgress<'_> {
    fn report(&self, fraction: f64, message: &str) -> bool {
        let f = fraction.clamp(0.0, 1.0);
        self.parent.report(self.start + (self.end - self.start) * f, message)
    }
}

/// Logs progress through `tracing` at every 10% step.
#[derive(Debug)]
pub struct LogProgress {
    label: String,
    last_decile: Mutex<Option<u32>>,
}

impl LogProgress {
    /// Creates a sink that prefixes messages with `label`.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            last_decile: Mutex::new(None),
        }
    }
}

impl ProgressSink for LogProgress {
    fn report(&self, fraction: f64, message: &str) -> bool {
        let decile = (fraction.clamp(0.0, 1.0) * 10.0).floor() as u32;
        let mut last = self.last_decile.lock().unwrap_or_else(PoisonError::into_inner);
        if last.is_none_or(|d| decile > d) {
            *last = Some(decile);
            info!(label = %self.label, percent = decile * 10, "{message}");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn closure_can_cancel() {
        let sink = |f: f64, _: &str| f < 0.5;
        assert!(sink.report(0.25, "x"));
        assert!(!sink.report(0.75, "x"));
        assert!(NoProgress.report(1.0, "done"));
    }

    #[test]
    fn scaled_maps_range() {
        let seen = Mutex::new(Vec::new());
        let parent = |f: f64, _: &str| {
            seen.lock().unwrap().push(f);
            true
        };
        let scaled = ScaledProgress::step(&parent, 1, 4);
        scaled.report(0.0, "");
        scaled.report(1.0, "");
        scaled.report(2.0, "");
        assert_eq!(*seen.lock().unwrap(), vec![0.25, 0.5, 0.5]);
    }

    #[test]
    fn scaled_forwards_cancel() {
        let parent = |_: f64, _: &str| false;
        assert!(!ScaledProgress::new(&parent, 0.0, 1.0).report(0.1, ""));
    }

    #[test]
    fn log_progress_never_cancels() {
        let sink = LogProgress::new("stats");
        for i in 0..=20 {
            assert!(sink.report(i as f64 / 20.0, "scanning"));
        }
    }
}
