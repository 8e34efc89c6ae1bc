//! Node capability interface.
//!
//! The kernel never knows what a node computes. It only consumes two
//! capabilities:
//!
//! - [`NodeDynamics`] -- advance the node across the active step window.
//!   Every node has it.
//! - [`CoupledDynamics`] -- additionally run one preliminary relaxation pass
//!   against the waveforms of the previous pass and report whether the node
//!   converged locally. Only nodes with instantaneous (non-delayed) coupling
//!   have it.
//!
//! [`NodeCapability`] is the variant stored per node in the network; the
//! kernel dispatches on it instead of on an inheritance chain.

use std::error::Error as StdError;

use cadence_types::{NodeId, NodeKind, Resolution, Steps};

use crate::clock::{SimulationClock, TimeSliceWindow};
use crate::waveform::{WaveformError, WaveformTable};

/// Failure raised by a node collaborator.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// The node's own dynamics failed.
    #[error("node dynamics failed: {0}")]
    Dynamics(#[source] Box<dyn StdError + Send + Sync>),

    /// A coupled node found no waveform for one of its partners.
    #[error("no waveform available for coupled partner {partner}")]
    MissingInput {
        /// The partner whose waveform was missing.
        partner: NodeId,
    },

    /// A preliminary pass produced the wrong number of samples.
    #[error("preliminary pass produced {actual} samples, expected {expected}")]
    SampleCount {
        /// Samples required for the window (`steps + 1`).
        expected: u64,
        /// Samples returned.
        actual: u64,
    },

    /// The returned samples could not be turned into a waveform.
    #[error("waveform reconstruction failed: {source}")]
    Waveform {
        /// The reconstruction error.
        #[from]
        source: WaveformError,
    },
}

impl NodeError {
    /// Wrap an arbitrary error raised by node dynamics.
    pub fn dynamics<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        Self::Dynamics(Box::new(err))
    }
}

/// What a node sees of the active slice.
///
/// Every node updated during a slice receives the same context; this is
/// what keeps parallel workers consistent with each other.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceContext {
    /// Clock value at the start of the slice.
    pub origin: Steps,
    /// First step of the window, relative to `origin`.
    pub from_step: u64,
    /// End of the window (exclusive), relative to `origin`.
    pub to_step: u64,
    /// Slice index, for double-buffer selection.
    pub slice_index: u64,
    /// Step resolution.
    pub resolution: Resolution,
}

impl SliceContext {
    /// Context for `window` of the slice the clock is in.
    pub const fn new(clock: &SimulationClock, window: TimeSliceWindow) -> Self {
        Self {
            origin: clock.current_slice_origin(),
            from_step: window.from_step(),
            to_step: window.to_step(),
            slice_index: window.slice_index(),
            resolution: clock.resolution(),
        }
    }

    /// Number of steps in the window.
    pub const fn steps(&self) -> u64 {
        self.to_step.saturating_sub(self.from_step)
    }

    /// Number of samples a preliminary pass must return (one per step
    /// boundary, both ends included).
    pub const fn sample_count(&self) -> u64 {
        self.steps().saturating_add(1)
    }

    /// Step duration in milliseconds.
    pub const fn dt_ms(&self) -> f64 {
        self.resolution.ms_per_step()
    }
}

/// Result of one preliminary pass on one node.
#[derive(Debug, Clone, PartialEq)]
pub struct PreliminaryPass {
    /// True if the new iterate differs from the previous one by less than
    /// the tolerance.
    pub converged: bool,
    /// The node's coupled quantity at every step boundary of the window.
    pub samples: Vec<f64>,
}

/// Capability shared by every node: advance across a window.
pub trait NodeDynamics: Send {
    /// Called once per `simulate` call before the first slice.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError`] if the node cannot run at this resolution.
    fn prepare(&mut self, resolution: Resolution) -> Result<(), NodeError> {
        let _ = resolution;
        Ok(())
    }

    /// Advance the node across `[ctx.from_step, ctx.to_step)`.
    ///
    /// May run concurrently with other nodes' updates for the same slice.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError`] if the dynamics fail; the run is aborted before
    /// the clock advances.
    fn update(&mut self, ctx: &SliceContext) -> Result<(), NodeError>;

    /// Called once per `simulate` call after the last slice.
    fn post_run(&mut self) {}
}

/// Capability of instantaneously coupled nodes.
pub trait CoupledDynamics: NodeDynamics {
    /// Value of the coupled quantity at the start of the active window.
    /// Partners see this as a flat waveform on the first pass.
    fn slice_initial_value(&self) -> f64;

    /// Run one relaxation pass over the active window.
    ///
    /// `inputs` holds the waveforms reconstructed from the previous pass
    /// for every coupled node. The call must be repeatable within one slice
    /// without breaking node invariants.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError`] if the pass fails.
    fn preliminary_update(
        &mut self,
        ctx: &SliceContext,
        inputs: &WaveformTable,
        tolerance: f64,
    ) -> Result<PreliminaryPass, NodeError>;
}

/// Capability variant of a registered node.
pub enum NodeCapability {
    /// Update only.
    Plain(Box<dyn NodeDynamics>),
    /// Update plus preliminary relaxation.
    Coupled(Box<dyn CoupledDynamics>),
}

impl NodeCapability {
    /// Which variant this is.
    pub const fn kind(&self) -> NodeKind {
        match self {
            Self::Plain(_) => NodeKind::Plain,
            Self::Coupled(_) => NodeKind::Coupled,
        }
    }

    /// Forward to [`NodeDynamics::prepare`].
    ///
    /// # Errors
    ///
    /// Propagates the node's error.
    pub fn prepare(&mut self, resolution: Resolution) -> Result<(), NodeError> {
        match self {
            Self::Plain(node) => node.prepare(resolution),
            Self::Coupled(node) => node.prepare(resolution),
        }
    }

    /// Forward to [`NodeDynamics::update`].
    ///
    /// # Errors
    ///
    /// Propagates the node's error.
    pub fn update(&mut self, ctx: &SliceContext) -> Result<(), NodeError> {
        match self {
            Self::Plain(node) => node.update(ctx),
            Self::Coupled(node) => node.update(ctx),
        }
    }

    /// Forward to [`NodeDynamics::post_run`].
    pub fn post_run(&mut self) {
        match self {
            Self::Plain(node) => node.post_run(),
            Self::Coupled(node) => node.post_run(),
        }
    }

    /// The coupled capability, if this node has it.
    pub fn as_coupled(&self) -> Option<&dyn CoupledDynamics> {
        match self {
            Self::Plain(_) => None,
            Self::Coupled(node) => Some(node.as_ref()),
        }
    }

    /// The coupled capability, mutably, if this node has it.
    pub fn as_coupled_mut(&mut self) -> Option<&mut (dyn CoupledDynamics + 'static)> {
        match self {
            Self::Plain(_) => None,
            Self::Coupled(node) => Some(node.as_mut()),
        }
    }
}

impl core::fmt::Debug for NodeCapability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("NodeCapability").field(&self.kind()).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct Counter {
        steps: u64,
    }

    impl NodeDynamics for Counter {
        fn update(&mut self, ctx: &SliceContext) -> Result<(), NodeError> {
            self.steps = self.steps.saturating_add(ctx.steps());
            Ok(())
        }
    }

    struct Echo {
        value: f64,
    }

    impl NodeDynamics for Echo {
        fn update(&mut self, _ctx: &SliceContext) -> Result<(), NodeError> {
            Ok(())
        }
    }

    impl CoupledDynamics for Echo {
        fn slice_initial_value(&self) -> f64 {
            self.value
        }

        fn preliminary_update(
            &mut self,
            ctx: &SliceContext,
            _inputs: &WaveformTable,
            _tolerance: f64,
        ) -> Result<PreliminaryPass, NodeError> {
            let n = usize::try_from(ctx.sample_count()).unwrap();
            Ok(PreliminaryPass {
                converged: true,
                samples: vec![self.value; n],
            })
        }
    }

    fn context(from_step: u64, to_step: u64) -> SliceContext {
        SliceContext {
            origin: Steps::new(20),
            from_step,
            to_step,
            slice_index: 2,
            resolution: Resolution::default(),
        }
    }

    #[test]
    fn context_counts_steps_and_samples() {
        let ctx = context(3, 10);
        assert_eq!(ctx.steps(), 7);
        assert_eq!(ctx.sample_count(), 8);
    }

    #[test]
    fn context_mirrors_the_clock() {
        let mut clock = SimulationClock::new(Resolution::default(), 10).unwrap();
        clock.advance().unwrap();
        let window = clock.open_window(4);
        let ctx = SliceContext::new(&clock, window);
        assert_eq!(ctx.origin, Steps::new(10));
        assert_eq!((ctx.from_step, ctx.to_step, ctx.slice_index), (0, 4, 1));
    }

    #[test]
    fn capability_dispatches_by_variant() {
        let mut plain = NodeCapability::Plain(Box::new(Counter { steps: 0 }));
        let mut coupled = NodeCapability::Coupled(Box::new(Echo { value: 2.5 }));
        assert_eq!(plain.kind(), NodeKind::Plain);
        assert_eq!(coupled.kind(), NodeKind::Coupled);
        assert!(plain.as_coupled().is_none());

        plain.update(&context(0, 10)).unwrap();
        let pass = coupled
            .as_coupled_mut()
            .unwrap()
            .preliminary_update(&context(0, 10), &WaveformTable::new(), 1e-3)
            .unwrap();
        assert!(pass.converged);
        assert_eq!(pass.samples.len(), 11);
    }

    #[test]
    fn dynamics_errors_keep_their_source() {
        let err = NodeError::dynamics(std::io::Error::other("diverged"));
        assert!(err.to_string().contains("diverged"));
        assert!(StdError::source(&err).is_some());
    }
}
