//! Status snapshots and run reports.
//!
//! [`SimulationStatus`] is the read side of the simulation manager's
//! configuration surface; [`StatusUpdate`] is the writable subset. Fields
//! left as `None` in an update are not touched.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::EndReason;
use crate::ids::RunId;

/// Snapshot of the simulation manager's counters and options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationStatus {
    /// Precise simulated time in milliseconds (clock plus window start).
    pub time_ms: f64,
    /// Index of the current slice.
    pub slice: u64,
    /// Cycles still pending.
    pub to_do: u64,
    /// Cycles requested since the last reset.
    pub to_do_total: u64,
    /// Whether any whole step has been simulated since the last reset.
    pub has_run_before: bool,
    /// Whether per-slice progress is reported to the telemetry sink.
    pub print_progress: bool,
    /// Iteration budget of the preliminary solver.
    pub max_preliminary_iterations: u32,
    /// Waveform interpolation order (0, 1 or 3).
    pub preliminary_interpolation_order: u8,
    /// Local convergence tolerance of the preliminary solver.
    pub preliminary_tolerance: f64,
    /// Cumulative wall-clock time spent inside slices, in milliseconds.
    pub wall_clock_ms: f64,
}

/// Writable subset of [`SimulationStatus`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// New value for `print_progress`.
    #[serde(default)]
    pub print_progress: Option<bool>,
    /// New iteration budget.
    #[serde(default)]
    pub max_preliminary_iterations: Option<u32>,
    /// New interpolation order.
    #[serde(default)]
    pub preliminary_interpolation_order: Option<u8>,
    /// New tolerance.
    #[serde(default)]
    pub preliminary_tolerance: Option<f64>,
}

impl StatusUpdate {
    /// Whether the update touches any preliminary-solver option.
    pub const fn touches_preliminary(&self) -> bool {
        self.max_preliminary_iterations.is_some()
            || self.preliminary_interpolation_order.is_some()
            || self.preliminary_tolerance.is_some()
    }
}

/// Summary of one `simulate` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Identifier of the call.
    pub run_id: RunId,
    /// Wall-clock time at which the call started.
    pub started_at: DateTime<Utc>,
    /// Steps added to the pending work by this call.
    pub steps_requested: u64,
    /// Steps actually processed during this call.
    pub steps_processed: u64,
    /// Cycles left pending when the call returned.
    pub steps_remaining: u64,
    /// Number of full slices committed (clock advances).
    pub slices_completed: u64,
    /// Total preliminary passes over all slices of the call.
    pub preliminary_passes: u64,
    /// Slices whose preliminary solve exhausted its budget.
    pub convergence_failures: u64,
    /// Wall-clock time spent inside slices during this call.
    pub wall_clock: Duration,
    /// Why the call returned.
    pub end_reason: EndReason,
}
