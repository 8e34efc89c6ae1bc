//! Demo network for the engine binary.
//!
//! Builds a small network of leaky integrators, some of them paired by
//! gap junctions (instantaneous electrical coupling), so that a run
//! exercises both plain updates and preliminary iteration. Parameters are
//! drawn from a seeded RNG so a given config always builds the same
//! network.

use std::path::Path;

use cadence_core::network::Network;
use cadence_core::node::{CoupledDynamics, NodeDynamics, NodeError, PreliminaryPass, SliceContext};
use cadence_core::waveform::WaveformTable;
use cadence_types::{NodeId, Resolution};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::info;

use crate::error::EngineError;

// -----------------------------------------------------------------------
// Configuration
// -----------------------------------------------------------------------

/// Demo sections of `cadence-config.yaml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DemoConfig {
    /// Shape of the demo network.
    #[serde(default)]
    pub network: DemoNetworkConfig,

    /// Simulated time to run, in milliseconds.
    #[serde(default = "default_simulate_ms")]
    pub simulate_ms: f64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            network: DemoNetworkConfig::default(),
            simulate_ms: default_simulate_ms(),
        }
    }
}

impl DemoConfig {
    /// Read the demo sections from `path`; defaults if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Demo`] if the file cannot be read or parsed,
    /// or a value is out of range.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| EngineError::Demo {
            message: format!("failed to read config file: {e}"),
        })?;
        Self::parse(&contents)
    }

    /// Parse the demo sections from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Demo`] if the YAML is invalid or a value is out
    /// of range.
    pub fn parse(yaml: &str) -> Result<Self, EngineError> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml).map_err(|e| EngineError::Demo {
                message: format!("failed to parse demo config: {e}"),
            })?
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), EngineError> {
        if !self.network.coupling.is_finite() || self.network.coupling < 0.0 {
            return Err(EngineError::Demo {
                message: format!(
                    "coupling must be finite and non-negative, got {}",
                    self.network.coupling
                ),
            });
        }
        if !self.simulate_ms.is_finite() || self.simulate_ms < 0.0 {
            return Err(EngineError::Demo {
                message: format!(
                    "simulate_ms must be finite and non-negative, got {}",
                    self.simulate_ms
                ),
            });
        }
        Ok(())
    }
}

/// Shape of the demo network.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DemoNetworkConfig {
    /// RNG seed for node parameters.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Number of uncoupled integrators.
    #[serde(default = "default_plain_nodes")]
    pub plain_nodes: u32,

    /// Number of gap-junction pairs.
    #[serde(default = "default_coupled_pairs")]
    pub coupled_pairs: u32,

    /// Gap-junction conductance, per millisecond.
    #[serde(default = "default_coupling")]
    pub coupling: f64,
}

impl Default for DemoNetworkConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            plain_nodes: default_plain_nodes(),
            coupled_pairs: default_coupled_pairs(),
            coupling: default_coupling(),
        }
    }
}

const fn default_seed() -> u64 {
    42
}

const fn default_plain_nodes() -> u32 {
    8
}

const fn default_coupled_pairs() -> u32 {
    2
}

const fn default_coupling() -> f64 {
    0.5
}

const fn default_simulate_ms() -> f64 {
    100.0
}

// -----------------------------------------------------------------------
// Nodes
// -----------------------------------------------------------------------

/// Membrane relaxing exponentially towards `rest + tau * drive`.
#[derive(Debug, Clone, PartialEq)]
pub struct LeakyIntegrator {
    v: f64,
    rest: f64,
    tau_ms: f64,
    drive: f64,
    /// Per-step decay factor, set by `prepare`.
    decay: f64,
}

impl LeakyIntegrator {
    /// An integrator at `v` mV.
    pub const fn new(v: f64, rest: f64, tau_ms: f64, drive: f64) -> Self {
        Self {
            v,
            rest,
            tau_ms,
            drive,
            decay: 1.0,
        }
    }

    fn target(&self) -> f64 {
        self.tau_ms.mul_add(self.drive, self.rest)
    }
}

impl NodeDynamics for LeakyIntegrator {
    fn prepare(&mut self, resolution: Resolution) -> Result<(), NodeError> {
        self.decay = (-resolution.ms_per_step() / self.tau_ms).exp();
        Ok(())
    }

    fn update(&mut self, ctx: &SliceContext) -> Result<(), NodeError> {
        let target = self.target();
        for _ in 0..ctx.steps() {
            self.v = (self.v - target).mul_add(self.decay, target);
        }
        if self.v.is_finite() {
            Ok(())
        } else {
            Err(NodeError::dynamics(NonFinite))
        }
    }
}

/// Integrator coupled to one partner through a gap junction.
///
/// `update` integrates the window with the partner held at its
/// slice-initial value. Every preliminary pass re-integrates the window
/// from the slice-initial state against the partner's waveform from the
/// previous pass, and reports convergence once two consecutive passes agree
/// to within the tolerance at every step.
#[derive(Debug, Clone, PartialEq)]
pub struct GapJunctionCell {
    partner: NodeId,
    v: f64,
    v_start: f64,
    partner_start: f64,
    rest: f64,
    tau_ms: f64,
    drive: f64,
    coupling: f64,
    dt_ms: f64,
    previous: Vec<f64>,
}

impl GapJunctionCell {
    /// A cell at `v` mV coupled to `partner`.
    pub const fn new(
        partner: NodeId,
        v: f64,
        rest: f64,
        tau_ms: f64,
        drive: f64,
        coupling: f64,
    ) -> Self {
        Self {
            partner,
            v,
            v_start: v,
            partner_start: v,
            rest,
            tau_ms,
            drive,
            coupling,
            dt_ms: Resolution::DEFAULT_MS,
            previous: Vec::new(),
        }
    }

    /// Forward Euler from the slice-initial state. `partner` gives the
    /// partner potential at a step offset; it is sampled at the midpoint of
    /// each step, so the waveform's interpolation order matters.
    fn integrate(&self, steps: u64, partner: impl Fn(f64) -> f64) -> Vec<f64> {
        let mut v = self.v_start;
        let mut samples = Vec::with_capacity(usize::try_from(steps).unwrap_or(0).saturating_add(1));
        samples.push(v);
        for k in 0..steps {
            #[allow(clippy::cast_precision_loss)]
            let other = partner(k as f64 + 0.5);
            let leak = (self.rest - v) / self.tau_ms;
            let gap = self.coupling * (other - v);
            v = self.dt_ms.mul_add(leak + self.drive + gap, v);
            samples.push(v);
        }
        samples
    }
}

impl NodeDynamics for GapJunctionCell {
    fn prepare(&mut self, resolution: Resolution) -> Result<(), NodeError> {
        self.dt_ms = resolution.ms_per_step();
        Ok(())
    }

    fn update(&mut self, ctx: &SliceContext) -> Result<(), NodeError> {
        self.v_start = self.v;
        self.previous.clear();
        let held = self.partner_start;
        let samples = self.integrate(ctx.steps(), |_| held);
        self.v = samples.last().copied().unwrap_or(self.v_start);
        if self.v.is_finite() {
            Ok(())
        } else {
            Err(NodeError::dynamics(NonFinite))
        }
    }
}

impl CoupledDynamics for GapJunctionCell {
    fn slice_initial_value(&self) -> f64 {
        self.v_start
    }

    fn preliminary_update(
        &mut self,
        ctx: &SliceContext,
        inputs: &WaveformTable,
        tolerance: f64,
    ) -> Result<PreliminaryPass, NodeError> {
        let waveform = inputs.get(self.partner).ok_or(NodeError::MissingInput {
            partner: self.partner,
        })?;
        let samples = self.integrate(ctx.steps(), |offset| waveform.evaluate(offset));
        let converged = self.previous.len() == samples.len()
            && self
                .previous
                .iter()
                .zip(&samples)
                .all(|(old, new)| (old - new).abs() < tolerance);

        self.v = samples.last().copied().unwrap_or(self.v_start);
        // The partner's end-of-window value seeds the next slice's update.
        self.partner_start = waveform.final_value();
        self.previous.clone_from(&samples);
        Ok(PreliminaryPass { converged, samples })
    }
}

/// A membrane potential left the representable range.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("membrane potential is not finite")]
pub struct NonFinite;

// -----------------------------------------------------------------------
// Network construction
// -----------------------------------------------------------------------

/// What [`build_network`] registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoSummary {
    /// Uncoupled integrators.
    pub plain_nodes: u32,
    /// Gap-junction cells (two per pair).
    pub coupled_nodes: u32,
}

/// Register the demo nodes described by `config` in `network`.
///
/// # Errors
///
/// Returns [`EngineError::Network`] if the network runs out of node ids.
pub fn build_network(
    config: &DemoNetworkConfig,
    network: &mut Network,
) -> Result<DemoSummary, EngineError> {
    let mut rng = StdRng::seed_from_u64(config.seed);

    for _ in 0..config.plain_nodes {
        let v = rng.random_range(-70.0..-55.0);
        let tau_ms = rng.random_range(5.0..20.0);
        let drive = rng.random_range(0.0..1.5);
        let _ = network.add_plain(LeakyIntegrator::new(v, -65.0, tau_ms, drive))?;
    }

    for _ in 0..config.coupled_pairs {
        let first = network.peek_next_id().ok_or(EngineError::Demo {
            message: "no node ids left for coupled pair".to_owned(),
        })?;
        let second = first.next().ok_or(EngineError::Demo {
            message: "no node ids left for coupled pair".to_owned(),
        })?;
        let v_first = rng.random_range(-70.0..-55.0);
        let v_second = rng.random_range(-70.0..-55.0);
        let drive = rng.random_range(0.0..1.5);
        let mut driven = GapJunctionCell::new(second, v_first, -65.0, 10.0, drive, config.coupling);
        let mut passive = GapJunctionCell::new(first, v_second, -65.0, 10.0, 0.0, config.coupling);
        driven.partner_start = v_second;
        passive.partner_start = v_first;
        let _ = network.add_coupled(driven)?;
        let _ = network.add_coupled(passive)?;
    }

    let summary = DemoSummary {
        plain_nodes: config.plain_nodes,
        coupled_nodes: config.coupled_pairs.saturating_mul(2),
    };
    info!(
        seed = config.seed,
        plain_nodes = summary.plain_nodes,
        coupled_nodes = summary.coupled_nodes,
        coupling = config.coupling,
        "Demo network built"
    );
    Ok(summary)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use approx::assert_relative_eq;
    use cadence_core::config::CadenceConfig;
    use cadence_core::kernel::KernelContext;
    use cadence_core::telemetry::NoOpSink;
    use cadence_types::NodeKind;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = DemoConfig::default();
        assert_eq!(config.network.seed, 42);
        assert_eq!(config.network.plain_nodes, 8);
        assert_eq!(config.network.coupled_pairs, 2);
        assert_relative_eq!(config.network.coupling, 0.5);
        assert_relative_eq!(config.simulate_ms, 100.0);
    }

    #[test]
    fn parse_ignores_kernel_sections() {
        let yaml = "kernel:\n  slice_steps: 5\nnetwork:\n  plain_nodes: 3\nsimulate_ms: 12.5\n";
        let config = DemoConfig::parse(yaml).unwrap();
        assert_eq!(config.network.plain_nodes, 3);
        assert_eq!(config.network.coupled_pairs, 2);
        assert_relative_eq!(config.simulate_ms, 12.5);
    }

    #[test]
    fn negative_coupling_rejected() {
        let err = DemoConfig::parse("network:\n  coupling: -1.0\n").unwrap_err();
        assert!(matches!(err, EngineError::Demo { .. }));
    }

    #[test]
    fn build_registers_plain_then_coupled_nodes() {
        let mut network = Network::serial();
        let summary = build_network(&DemoNetworkConfig::default(), &mut network).unwrap();
        assert_eq!(summary.plain_nodes, 8);
        assert_eq!(summary.coupled_nodes, 4);
        assert_eq!(network.len(), 12);
        assert_eq!(network.coupled_count(), 4);
        assert_eq!(network.kind(NodeId::new(8)), Some(NodeKind::Plain));
        assert_eq!(network.kind(NodeId::new(9)), Some(NodeKind::Coupled));
    }

    #[test]
    fn integrator_relaxes_to_target() {
        let mut node = LeakyIntegrator::new(-70.0, -65.0, 10.0, 0.0);
        node.prepare(Resolution::default()).unwrap();
        let ctx = SliceContext {
            origin: cadence_types::Steps::ZERO,
            from_step: 0,
            to_step: 10_000,
            slice_index: 0,
            resolution: Resolution::default(),
        };
        node.update(&ctx).unwrap();
        assert_relative_eq!(node.v, -65.0, epsilon = 1e-3);
    }

    #[test]
    fn demo_run_converges_every_slice() {
        let mut kernel = KernelContext::new(CadenceConfig::default()).unwrap();
        let _ = build_network(&DemoNetworkConfig::default(), kernel.network_mut()).unwrap();
        let report = kernel.simulate(20.0, &mut NoOpSink).unwrap();
        assert_eq!(report.slices_completed, 20);
        assert_eq!(report.convergence_failures, 0);
    }
}
