//! Progress and diagnostics reporting.
//!
//! The run loop reports through a [`TelemetrySink`]. Whether per-slice
//! samples are sent at all is decided by the manager's `print_progress`
//! option; convergence failures and the final report are always sent.

use std::time::Duration;

use cadence_types::{RunId, RunReport, Steps};
use serde::Serialize;
use tracing::{debug, info};

use crate::timing::WallClockSample;

/// Progress of one completed (or held) slice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceSample {
    /// Run the slice belongs to.
    pub run_id: RunId,
    /// Slice index the window belonged to.
    pub slice_index: u64,
    /// Clock value at the start of the slice.
    pub origin: Steps,
    /// Steps processed in this window.
    pub steps: u64,
    /// Wall-clock bracket of the window's work.
    pub wall: WallClockSample,
    /// Wall-clock time of the run so far.
    pub cumulative: Duration,
    /// Requested work already processed, in percent.
    pub percent_complete: f64,
    /// Simulated time over wall-clock time for this window.
    pub realtime_factor: f64,
}

/// The preliminary solver ran out of passes in one slice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConvergenceFailure {
    /// Run the slice belongs to.
    pub run_id: RunId,
    /// Slice that failed to converge.
    pub slice_index: u64,
    /// Passes performed.
    pub passes: u32,
    /// Tolerance that was not reached.
    pub tolerance: f64,
}

/// Receiver of run-loop telemetry.
///
/// Called from the orchestrating thread only, never from workers.
pub trait TelemetrySink {
    /// A window was processed.
    fn on_slice(&mut self, sample: &SliceSample) {
        let _ = sample;
    }

    /// A slice committed without converging.
    fn on_convergence_failure(&mut self, failure: &ConvergenceFailure) {
        let _ = failure;
    }

    /// A run finished, was terminated, or was cut short.
    fn on_run_complete(&mut self, report: &RunReport) {
        let _ = report;
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpSink;

impl TelemetrySink for NoOpSink {}

/// Writes progress as structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn on_slice(&mut self, sample: &SliceSample) {
        info!(
            run_id = %sample.run_id,
            slice = sample.slice_index,
            origin = sample.origin.get(),
            steps = sample.steps,
            percent_complete = format_args!("{:.1}", sample.percent_complete),
            realtime_factor = format_args!("{:.3}", sample.realtime_factor),
            "Slice complete"
        );
    }

    fn on_convergence_failure(&mut self, failure: &ConvergenceFailure) {
        debug!(
            run_id = %failure.run_id,
            slice = failure.slice_index,
            passes = failure.passes,
            tolerance = failure.tolerance,
            "Preliminary iteration did not converge"
        );
    }

    fn on_run_complete(&mut self, report: &RunReport) {
        info!(
            run_id = %report.run_id,
            end_reason = ?report.end_reason,
            steps_processed = report.steps_processed,
            slices_completed = report.slices_completed,
            wall_clock_ms = report.wall_clock.as_secs_f64() * 1000.0,
            "Run complete"
        );
    }
}

/// Keeps every event in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    /// Slice samples, in emission order.
    pub slices: Vec<SliceSample>,
    /// Convergence failures, in emission order.
    pub failures: Vec<ConvergenceFailure>,
    /// Run reports, in emission order.
    pub reports: Vec<RunReport>,
}

impl RecordingSink {
    /// An empty recorder.
    pub const fn new() -> Self {
        Self {
            slices: Vec::new(),
            failures: Vec::new(),
            reports: Vec::new(),
        }
    }
}

impl TelemetrySink for RecordingSink {
    fn on_slice(&mut self, sample: &SliceSample) {
        self.slices.push(*sample);
    }

    fn on_convergence_failure(&mut self, failure: &ConvergenceFailure) {
        self.failures.push(*failure);
    }

    fn on_run_complete(&mut self, report: &RunReport) {
        self.reports.push(report.clone());
    }
}

/// Simulated milliseconds per wall-clock millisecond.
///
/// Zero elapsed wall time reports zero rather than infinity.
pub fn realtime_factor(simulated_ms: f64, wall: Duration) -> f64 {
    let wall_ms = wall.as_secs_f64() * 1000.0;
    if wall_ms > 0.0 {
        simulated_ms / wall_ms
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use approx::assert_relative_eq;
    use tracing_test::traced_test;

    use super::*;

    fn sample() -> SliceSample {
        let now = Instant::now();
        SliceSample {
            run_id: RunId::new(),
            slice_index: 3,
            origin: Steps::new(30),
            steps: 10,
            wall: WallClockSample {
                slice_begin: now,
                slice_end: now,
            },
            cumulative: Duration::ZERO,
            percent_complete: 40.0,
            realtime_factor: 0.0,
        }
    }

    #[test]
    fn realtime_factor_divides_simulated_by_wall_time() {
        assert_relative_eq!(realtime_factor(10.0, Duration::from_millis(20)), 0.5);
        assert_relative_eq!(realtime_factor(10.0, Duration::ZERO), 0.0);
    }

    #[test]
    fn recording_sink_keeps_order() {
        let mut sink = RecordingSink::new();
        let first = sample();
        let mut second = sample();
        second.slice_index = 4;
        sink.on_slice(&first);
        sink.on_slice(&second);
        assert_eq!(sink.slices.len(), 2);
        assert_eq!(sink.slices.last().map(|s| s.slice_index), Some(4));
    }

    #[test]
    fn no_op_sink_accepts_everything() {
        let mut sink = NoOpSink;
        sink.on_slice(&sample());
        sink.on_convergence_failure(&ConvergenceFailure {
            run_id: RunId::new(),
            slice_index: 0,
            passes: 1,
            tolerance: 1e-4,
        });
    }

    #[test]
    #[traced_test]
    fn tracing_sink_logs_progress() {
        let mut sink = TracingSink;
        sink.on_slice(&sample());
        assert!(logs_contain("Slice complete"));
        assert!(logs_contain("percent_complete=40.0"));
    }
}
