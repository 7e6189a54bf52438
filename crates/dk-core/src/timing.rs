//! Lightweight wall-clock timing.
//!
//! Timers report through `tracing` so that frontends decide whether the
//! numbers are shown at all.

use std::time::Instant;

/// A simple timer that measures elapsed time.
pub struct Timer {
    label: &'static str,
    start: Instant,
}

impl Timer {
    /// Create and start a new timer with the given label.
    pub fn start(label: &'static str) -> Self {
        Self {
            label,
            start: Instant::now(),
        }
    }

    /// Elapsed seconds so far, without stopping.
    pub fn elapsed_s(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Stop the timer and return elapsed time in seconds.
    pub fn stop(self) -> f64 {
        self.elapsed_s()
    }

    /// Stop the timer and emit the result as an info event.
    pub fn stop_and_log(self) -> f64 {
        let label = self.label;
        let elapsed = self.stop();
        tracing::info!(target: "dk::timing", label, elapsed_s = elapsed, "timer stopped");
        elapsed
    }
}
