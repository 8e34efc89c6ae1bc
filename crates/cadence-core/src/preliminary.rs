//! Preliminary iteration (waveform relaxation) solver.
//!
//! Nodes with instantaneous coupling cannot simply be updated one after
//! another: each one's trajectory over the window depends on its partners'
//! trajectories over the same window. The solver resolves this with a
//! bounded fixed-point loop run once per slice, before the clock advances.
//!
//! Every pass hands all coupled nodes the same table of waveforms,
//! reconstructed from the previous pass (flat waveforms at the slice-initial
//! values for the first pass). No node sees another node's output from the
//! pass in progress, so a pass can be spread over workers and the result
//! does not depend on the execution mode.
//!
//! The loop stops when every node reports local convergence in the same
//! pass, or when `max_iterations` passes have run. Running out of passes is
//! not an error: the last iterate is kept and a diagnostic is emitted.

use cadence_types::{NodeId, RunId, SolveOutcome};
use tracing::{debug, warn};

use crate::config::PreliminaryConfig;
use crate::network::{Network, NetworkError};
use crate::node::{NodeError, PreliminaryPass, SliceContext};
use crate::telemetry::{ConvergenceFailure, TelemetrySink};
use crate::waveform::{Waveform, WaveformTable};

/// How one slice's relaxation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolveReport {
    /// Passes performed.
    pub passes: u32,
    /// Why the loop stopped.
    pub outcome: SolveOutcome,
}

/// Bounded fixed-point loop over the coupled nodes of a network.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreliminarySolver {
    config: PreliminaryConfig,
}

impl PreliminarySolver {
    /// A solver using `config`.
    pub const fn new(config: PreliminaryConfig) -> Self {
        Self { config }
    }

    /// The active settings.
    pub const fn config(&self) -> &PreliminaryConfig {
        &self.config
    }

    /// Replace the settings. Only possible between runs, since a run holds
    /// the manager mutably.
    pub(crate) const fn set_config(&mut self, config: PreliminaryConfig) {
        self.config = config;
    }

    /// Relax the coupled nodes of `network` over the window of `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Node`] if a node's pass fails or returns a
    /// sample count that does not match the window.
    pub fn solve(
        &self,
        network: &mut Network,
        ctx: &SliceContext,
        run_id: RunId,
        sink: &mut dyn TelemetrySink,
    ) -> Result<SolveReport, NetworkError> {
        let tolerance = self.config.tolerance;
        let mut inputs = network.initial_waveforms();

        if self.config.max_iterations == 0 {
            let passes = network.preliminary_pass(ctx, &inputs, tolerance)?;
            self.reconstruct(ctx, passes)?;
            return Ok(SolveReport {
                passes: 1,
                outcome: SolveOutcome::SinglePass,
            });
        }

        let mut pass_count: u32 = 0;
        loop {
            let passes = network.preliminary_pass(ctx, &inputs, tolerance)?;
            pass_count = pass_count.saturating_add(1);
            let all_converged = passes.iter().all(|(_, pass)| pass.converged);
            inputs = self.reconstruct(ctx, passes)?;

            if all_converged {
                debug!(
                    slice = ctx.slice_index,
                    passes = pass_count,
                    "Preliminary iteration converged"
                );
                return Ok(SolveReport {
                    passes: pass_count,
                    outcome: SolveOutcome::Converged,
                });
            }

            if pass_count >= self.config.max_iterations {
                warn!(
                    %run_id,
                    slice = ctx.slice_index,
                    passes = pass_count,
                    tolerance,
                    "Preliminary iteration budget exhausted, keeping last iterate"
                );
                sink.on_convergence_failure(&ConvergenceFailure {
                    run_id,
                    slice_index: ctx.slice_index,
                    passes: pass_count,
                    tolerance,
                });
                return Ok(SolveReport {
                    passes: pass_count,
                    outcome: SolveOutcome::BudgetExhausted,
                });
            }
        }
    }

    /// Turn one pass's samples into the next pass's inputs.
    fn reconstruct(
        &self,
        ctx: &SliceContext,
        passes: Vec<(NodeId, PreliminaryPass)>,
    ) -> Result<WaveformTable, NetworkError> {
        let expected = ctx.sample_count();
        let mut table = WaveformTable::new();
        for (node, pass) in passes {
            let actual = u64::try_from(pass.samples.len()).unwrap_or(u64::MAX);
            if actual != expected {
                return Err(NetworkError::Node {
                    node,
                    source: NodeError::SampleCount { expected, actual },
                });
            }
            let waveform = Waveform::from_samples(self.config.interpolation_order, pass.samples)
                .map_err(|e| NetworkError::Node {
                    node,
                    source: e.into(),
                })?;
            table.insert(node, waveform);
        }
        Ok(table)
    }
}

impl Default for PreliminarySolver {
    fn default() -> Self {
        Self::new(PreliminaryConfig::default())
    }
}
