//! The simulation manager: run-loop orchestration.
//!
//! [`SimulationManager::simulate`] is the only driver of simulated time.
//! A call goes through three phases:
//!
//! 1. **prepare** -- validate the request, add it to the pending work, call
//!    every node's `prepare` hook, count the coupled nodes.
//! 2. **resume** -- the slice loop. Each iteration opens a window, updates
//!    every node across it, relaxes the coupled nodes if there are any,
//!    commits the window to the clock, and records wall-clock cost.
//! 3. **finalize** -- call every node's `post_run` hook and report.
//!
//! The termination flag is read only at the top of each loop iteration, so
//! a slice that has started always commits. A node failure aborts the run
//! before the failing slice is committed. Nodes that already advanced in
//! that slice keep their state, so the manager refuses further runs until
//! [`SimulationManager::reset`].

use std::time::Duration;

use cadence_types::{
    EndReason, NodeId, RunId, RunReport, SimulationStatus, StatusUpdate, Steps,
};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::clock::{ClockError, SimulationClock, WindowCommit};
use crate::config::{ConfigError, KernelConfig, PreliminaryConfig, SimulationConfig};
use crate::kernel::ManagerInterface;
use crate::network::{Network, NetworkError};
use crate::node::{NodeError, SliceContext};
use crate::pending::PendingWork;
use crate::preliminary::PreliminarySolver;
use crate::telemetry::{SliceSample, TelemetrySink, realtime_factor};
use crate::termination::TerminationToken;
use crate::timing::WallClock;
use crate::waveform::InterpolationOrder;

/// Largest step count a duration may convert to. Beyond this, `f64`
/// millisecond values stop mapping to distinct step counts.
const MAX_DURATION_STEPS: f64 = 9_007_199_254_740_992.0;

/// Rounding slack, in units of `f64::EPSILON` relative to the step count,
/// allowed when checking that a duration is a whole number of steps.
const STEP_MULTIPLE_ULPS: f64 = 4.0;

/// Errors that can occur while driving a simulation.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    /// The requested duration cannot be simulated. Nothing was changed.
    #[error("invalid simulation duration: {reason}")]
    InvalidDuration {
        /// Why the duration was rejected.
        reason: String,
    },

    /// A clock operation failed.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },

    /// The configuration is invalid.
    #[error("configuration error: {source}")]
    Config {
        /// The underlying configuration error.
        #[from]
        source: ConfigError,
    },

    /// A node's `prepare` hook failed. No slice ran and nothing is pending.
    #[error("node {node} failed to prepare: {source}")]
    Prepare {
        /// The failing node.
        node: NodeId,
        /// The node's error.
        source: NodeError,
    },

    /// An earlier run aborted mid-slice; node state no longer matches the
    /// clock.
    #[error("a previous run aborted in slice {slice}; reset before simulating again")]
    Aborted {
        /// Slice in which the earlier run failed.
        slice: u64,
    },

    /// A node failed while processing a slice.
    #[error("node {node} failed in slice {slice}: {source}")]
    Node {
        /// The failing node.
        node: NodeId,
        /// Slice in which it failed.
        slice: u64,
        /// The node's error.
        source: NodeError,
    },

    /// The network could not dispatch a pass.
    #[error("network error: {source}")]
    Network {
        /// The underlying network error.
        #[from]
        source: NetworkError,
    },
}

impl SimulationError {
    fn in_slice(err: NetworkError, slice: u64) -> Self {
        match err {
            NetworkError::Node { node, source } => Self::Node {
                node,
                slice,
                source,
            },
            other => Self::Network { source: other },
        }
    }

    fn in_prepare(err: NetworkError) -> Self {
        match err {
            NetworkError::Node { node, source } => Self::Prepare { node, source },
            other => Self::Network { source: other },
        }
    }
}

/// Bookkeeping of one `simulate` call.
#[derive(Debug, Clone, Copy)]
struct RunTally {
    run_id: RunId,
    started_at: DateTime<Utc>,
    steps_requested: u64,
    steps_processed: u64,
    slices_completed: u64,
    preliminary_passes: u64,
    convergence_failures: u64,
    wall_clock_at_start: Duration,
}

impl RunTally {
    fn new(steps_requested: u64, wall_clock_at_start: Duration) -> Self {
        Self {
            run_id: RunId::new(),
            started_at: Utc::now(),
            steps_requested,
            steps_processed: 0,
            slices_completed: 0,
            preliminary_passes: 0,
            convergence_failures: 0,
            wall_clock_at_start,
        }
    }

    fn report(&self, end_reason: EndReason, steps_remaining: u64, cumulative: Duration) -> RunReport {
        RunReport {
            run_id: self.run_id,
            started_at: self.started_at,
            steps_requested: self.steps_requested,
            steps_processed: self.steps_processed,
            steps_remaining,
            slices_completed: self.slices_completed,
            preliminary_passes: self.preliminary_passes,
            convergence_failures: self.convergence_failures,
            wall_clock: cumulative.saturating_sub(self.wall_clock_at_start),
            end_reason,
        }
    }
}

/// Owns simulated time and drives the slice loop.
#[derive(Debug)]
pub struct SimulationManager {
    clock: SimulationClock,
    pending: PendingWork,
    termination: TerminationToken,
    wall_clock: WallClock,
    has_run_before: bool,
    print_progress: bool,
    aborted_in: Option<u64>,
    solver: PreliminarySolver,
}

impl SimulationManager {
    /// Create a manager at time zero.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::Config`] if the resolution or preliminary
    /// settings are invalid, [`SimulationError::Clock`] if the slice length
    /// is.
    pub fn new(kernel: &KernelConfig, simulation: &SimulationConfig) -> Result<Self, SimulationError> {
        let resolution = kernel.resolution()?;
        let clock = SimulationClock::new(resolution, kernel.slice_steps)?;
        simulation.preliminary.validate()?;
        Ok(Self {
            clock,
            pending: PendingWork::new(),
            termination: TerminationToken::new(),
            wall_clock: WallClock::new(),
            has_run_before: false,
            print_progress: simulation.print_progress,
            aborted_in: None,
            solver: PreliminarySolver::new(simulation.preliminary),
        })
    }

    /// Simulate `duration_ms` milliseconds of network time.
    ///
    /// Requests accumulate: work left over by a terminated run is processed
    /// before the new request. A zero duration is a no-op.
    ///
    /// # Errors
    ///
    /// - [`SimulationError::Aborted`] if an earlier run failed mid-slice and
    ///   the manager has not been reset since.
    /// - [`SimulationError::InvalidDuration`] if the duration is negative,
    ///   non-finite, not a whole number of steps, or too large. No state is
    ///   changed in that case.
    /// - [`SimulationError::Prepare`] if a `prepare` hook fails. The request
    ///   is dropped and the manager stays usable.
    /// - [`SimulationError::Node`] if a node fails during a slice. The
    ///   failing slice is not committed, its steps stay pending, and every
    ///   later call fails with [`SimulationError::Aborted`] until
    ///   [`reset`](Self::reset).
    pub fn simulate(
        &mut self,
        duration_ms: f64,
        network: &mut Network,
        sink: &mut dyn TelemetrySink,
    ) -> Result<RunReport, SimulationError> {
        if let Some(slice) = self.aborted_in {
            return Err(SimulationError::Aborted { slice });
        }
        let cycles = self.cycles_for(duration_ms)?;
        let mut tally = RunTally::new(cycles, self.wall_clock.cumulative());

        if cycles == 0 {
            debug!(run_id = %tally.run_id, "Zero-length simulation request, nothing to do");
            return Ok(tally.report(
                EndReason::Completed,
                self.pending.to_do(),
                self.wall_clock.cumulative(),
            ));
        }

        let coupled = match self.prepare(network, &tally) {
            Ok(coupled) => coupled,
            Err(err) => {
                self.abort(&tally, &err);
                return Err(err);
            }
        };

        match self.resume(coupled, network, &mut tally, sink) {
            Ok(end_reason) => Ok(self.finalize(network, &tally, end_reason, sink)),
            Err(err) => {
                self.aborted_in = Some(self.clock.slice_index());
                self.abort(&tally, &err);
                Err(err)
            }
        }
    }

    /// Phase one: call the node `prepare` hooks, add the request to the
    /// pending work and enter the run state.
    ///
    /// Returns the number of coupled nodes; the solver runs only if it is
    /// non-zero.
    fn prepare(&mut self, network: &mut Network, tally: &RunTally) -> Result<usize, SimulationError> {
        network
            .prepare_all(self.clock.resolution())
            .map_err(SimulationError::in_prepare)?;

        self.pending
            .request(tally.steps_requested)
            .ok_or_else(|| SimulationError::InvalidDuration {
                reason: "pending work would overflow".to_owned(),
            })?;

        let coupled = network.coupled_count();
        self.clock.begin_run();
        info!(
            run_id = %tally.run_id,
            steps = tally.steps_requested,
            pending = self.pending.to_do(),
            nodes = network.len(),
            coupled,
            slice = self.clock.slice_index(),
            "Simulation starting"
        );
        Ok(coupled)
    }

    /// Phase two: the slice loop.
    fn resume(
        &mut self,
        coupled: usize,
        network: &mut Network,
        tally: &mut RunTally,
        sink: &mut dyn TelemetrySink,
    ) -> Result<EndReason, SimulationError> {
        while !self.pending.is_done() {
            if self.termination.is_terminated() {
                info!(
                    run_id = %tally.run_id,
                    slice = self.clock.slice_index(),
                    remaining = self.pending.to_do(),
                    "Termination requested, stopping at slice boundary"
                );
                return Ok(EndReason::Terminated);
            }

            self.wall_clock.begin_slice();
            let window = self.clock.open_window(self.pending.to_do());
            let ctx = SliceContext::new(&self.clock, window);

            network
                .update_all(&ctx)
                .map_err(|e| SimulationError::in_slice(e, ctx.slice_index))?;

            if coupled > 0 {
                let report = self
                    .solver
                    .solve(network, &ctx, tally.run_id, sink)
                    .map_err(|e| SimulationError::in_slice(e, ctx.slice_index))?;
                tally.preliminary_passes = tally
                    .preliminary_passes
                    .saturating_add(u64::from(report.passes));
                if report.outcome.is_failure() {
                    tally.convergence_failures = tally.convergence_failures.saturating_add(1);
                }
            }

            let commit = self.clock.commit_window()?;
            let steps = commit.steps();
            self.pending.consume(steps);
            tally.steps_processed = tally.steps_processed.saturating_add(steps);
            if matches!(commit, WindowCommit::Advanced { .. }) {
                tally.slices_completed = tally.slices_completed.saturating_add(1);
            }

            let wall = self.wall_clock.end_slice();
            if self.print_progress {
                let simulated_ms = ctx.dt_ms() * steps_as_f64(steps);
                sink.on_slice(&SliceSample {
                    run_id: tally.run_id,
                    slice_index: ctx.slice_index,
                    origin: ctx.origin,
                    steps,
                    wall,
                    cumulative: self
                        .wall_clock
                        .cumulative()
                        .saturating_sub(tally.wall_clock_at_start),
                    percent_complete: self.pending.percent_complete(),
                    realtime_factor: realtime_factor(simulated_ms, wall.elapsed()),
                });
            }
        }
        Ok(EndReason::Completed)
    }

    /// Phase three: call the node `post_run` hooks and report.
    fn finalize(
        &mut self,
        network: &mut Network,
        tally: &RunTally,
        end_reason: EndReason,
        sink: &mut dyn TelemetrySink,
    ) -> RunReport {
        network.post_run_all();
        self.clock.end_run();
        if tally.steps_processed > 0 {
            self.has_run_before = true;
        }

        let report = tally.report(end_reason, self.pending.to_do(), self.wall_clock.cumulative());
        info!(
            run_id = %report.run_id,
            end_reason = ?report.end_reason,
            steps_processed = report.steps_processed,
            steps_remaining = report.steps_remaining,
            slices_completed = report.slices_completed,
            preliminary_passes = report.preliminary_passes,
            convergence_failures = report.convergence_failures,
            time_ms = self.time_ms(),
            "Simulation ended"
        );
        if report.convergence_failures > 0 {
            warn!(
                run_id = %report.run_id,
                convergence_failures = report.convergence_failures,
                "Some slices committed without preliminary convergence"
            );
        }
        sink.on_run_complete(&report);
        report
    }

    /// Leave the run state after a failure.
    fn abort(&mut self, tally: &RunTally, err: &SimulationError) {
        self.clock.end_run();
        if tally.steps_processed > 0 {
            self.has_run_before = true;
        }
        error!(
            run_id = %tally.run_id,
            slice = self.clock.slice_index(),
            steps_processed = tally.steps_processed,
            remaining = self.pending.to_do(),
            error = %err,
            "Simulation aborted"
        );
    }

    /// Convert a duration to whole steps without changing any state.
    fn cycles_for(&self, duration_ms: f64) -> Result<u64, SimulationError> {
        let invalid = |reason: String| SimulationError::InvalidDuration { reason };

        if !duration_ms.is_finite() {
            return Err(invalid(format!("duration must be finite, got {duration_ms}")));
        }
        if duration_ms < 0.0 {
            return Err(invalid(format!(
                "duration must not be negative, got {duration_ms} ms"
            )));
        }

        let resolution = self.clock.resolution().ms_per_step();
        let exact = duration_ms / resolution;
        let steps = exact.round();
        if (exact - steps).abs() > STEP_MULTIPLE_ULPS * f64::EPSILON * exact.max(1.0) {
            return Err(invalid(format!(
                "duration {duration_ms} ms is not a multiple of the resolution {resolution} ms"
            )));
        }
        if steps > MAX_DURATION_STEPS {
            return Err(invalid(format!(
                "duration {duration_ms} ms exceeds the maximum simulation time"
            )));
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let cycles = steps as u64;

        let end = self
            .clock
            .precise_time()?
            .checked_add_unsigned(self.pending.to_do())
            .and_then(|t| t.checked_add_unsigned(cycles));
        if end.is_none() || self.pending.to_do_total().checked_add(cycles).is_none() {
            return Err(invalid(format!(
                "duration {duration_ms} ms exceeds the maximum simulation time"
            )));
        }
        Ok(cycles)
    }

    /// Request termination at the next slice boundary.
    pub fn terminate(&self) {
        info!("Termination requested");
        self.termination.terminate();
    }

    /// A handle that can request termination from another thread.
    pub fn termination_token(&self) -> TerminationToken {
        self.termination.clone()
    }

    /// Restore the manager to time zero.
    ///
    /// Clears the clock, pending work, termination flag, run history, an
    /// aborted-run latch and the wall clock. Preliminary settings and `print_progress` are kept.
    pub fn reset(&mut self) {
        self.clock.reset();
        self.pending.reset();
        self.termination.clear();
        self.wall_clock.reset();
        self.has_run_before = false;
        self.aborted_in = None;
        info!("Simulation manager reset to time zero");
    }

    /// Precise simulated time, `clock + from_step`.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::QueriedWhileRunning`] during a run.
    pub fn precise_time(&self) -> Result<Steps, ClockError> {
        self.clock.precise_time()
    }

    /// The clock.
    pub const fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    /// Cycles still pending.
    pub const fn to_do(&self) -> u64 {
        self.pending.to_do()
    }

    /// Cycles requested since the last reset.
    pub const fn to_do_total(&self) -> u64 {
        self.pending.to_do_total()
    }

    /// Current slice index.
    pub const fn slice(&self) -> u64 {
        self.clock.slice_index()
    }

    /// Whether any step has ever been processed since the last reset.
    pub const fn has_run_before(&self) -> bool {
        self.has_run_before
    }

    /// Whether per-slice progress is reported.
    pub const fn print_progress(&self) -> bool {
        self.print_progress
    }

    /// Active preliminary solver settings.
    pub const fn preliminary(&self) -> &PreliminaryConfig {
        self.solver.config()
    }

    /// Slice in which the last run aborted, if the manager needs a reset.
    pub const fn aborted_in(&self) -> Option<u64> {
        self.aborted_in
    }

    /// Wall-clock time spent in slices since the last reset.
    pub const fn wall_clock(&self) -> Duration {
        self.wall_clock.cumulative()
    }

    fn time_ms(&self) -> f64 {
        self.clock
            .precise_time()
            .unwrap_or_else(|_| self.clock.current_slice_origin())
            .to_ms(self.clock.resolution())
    }

    /// Snapshot of all options and counters.
    pub fn status(&self) -> SimulationStatus {
        let preliminary = self.solver.config();
        SimulationStatus {
            time_ms: self.time_ms(),
            slice: self.clock.slice_index(),
            to_do: self.pending.to_do(),
            to_do_total: self.pending.to_do_total(),
            has_run_before: self.has_run_before,
            print_progress: self.print_progress,
            max_preliminary_iterations: preliminary.max_iterations,
            preliminary_interpolation_order: u8::from(preliminary.interpolation_order),
            preliminary_tolerance: preliminary.tolerance,
            wall_clock_ms: self.wall_clock.cumulative().as_secs_f64() * 1000.0,
        }
    }

    /// Apply the writable options in `update`.
    ///
    /// All fields are validated before any is applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unsupported interpolation
    /// order or an invalid tolerance.
    pub fn set_status(&mut self, update: &StatusUpdate) -> Result<(), ConfigError> {
        let mut preliminary = *self.solver.config();
        if let Some(max_iterations) = update.max_preliminary_iterations {
            preliminary.max_iterations = max_iterations;
        }
        if let Some(order) = update.preliminary_interpolation_order {
            preliminary.interpolation_order =
                InterpolationOrder::try_from(order).map_err(|e| ConfigError::Invalid {
                    reason: e.to_string(),
                })?;
        }
        if let Some(tolerance) = update.preliminary_tolerance {
            preliminary.tolerance = tolerance;
        }
        preliminary.validate()?;

        if update.touches_preliminary() {
            self.solver.set_config(preliminary);
            info!(
                max_iterations = preliminary.max_iterations,
                interpolation_order = %preliminary.interpolation_order,
                tolerance = preliminary.tolerance,
                "Preliminary iteration settings updated"
            );
        }
        if let Some(print_progress) = update.print_progress {
            self.print_progress = print_progress;
        }
        Ok(())
    }
}

impl ManagerInterface for SimulationManager {
    type Status = SimulationStatus;
    type StatusUpdate = StatusUpdate;
    type Error = ConfigError;

    fn initialize(&mut self) {
        self.reset();
        debug!(
            slice_steps = self.clock.slice_length(),
            resolution_ms = self.clock.resolution().ms_per_step(),
            "Simulation manager initialized"
        );
    }

    fn finalize(&mut self) {
        debug!(
            time_ms = self.time_ms(),
            slice = self.clock.slice_index(),
            to_do = self.pending.to_do(),
            "Simulation manager finalized"
        );
    }

    fn status(&self) -> SimulationStatus {
        Self::status(self)
    }

    fn set_status(&mut self, update: &StatusUpdate) -> Result<(), ConfigError> {
        Self::set_status(self, update)
    }
}

#[allow(clippy::cast_precision_loss)]
const fn steps_as_f64(steps: u64) -> f64 {
    steps as f64
}
