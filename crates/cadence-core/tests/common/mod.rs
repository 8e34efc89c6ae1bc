//! Test nodes shared by the integration tests.

#![allow(dead_code, missing_docs, clippy::unwrap_used)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadence_core::node::{CoupledDynamics, NodeDynamics, NodeError, PreliminaryPass, SliceContext};
use cadence_core::waveform::WaveformTable;
use cadence_types::NodeId;

/// Counts steps and optionally sleeps per window.
pub struct Ticker {
    pub steps: Arc<AtomicU64>,
    pub pause: Duration,
}

impl Ticker {
    pub fn new(steps: &Arc<AtomicU64>) -> Self {
        Self {
            steps: Arc::clone(steps),
            pause: Duration::ZERO,
        }
    }
}

impl NodeDynamics for Ticker {
    fn update(&mut self, ctx: &SliceContext) -> Result<(), NodeError> {
        self.steps.fetch_add(ctx.steps(), Ordering::SeqCst);
        if !self.pause.is_zero() {
            std::thread::sleep(self.pause);
        }
        Ok(())
    }
}

/// Leaky integrator electrically coupled to one partner.
///
/// `update` integrates the window with the partner held at its
/// slice-initial value; each preliminary pass re-integrates from the
/// slice-initial state against the partner's waveform, sampled at step
/// midpoints.
pub struct GapNode {
    pub partner: NodeId,
    pub v: f64,
    pub v_start: f64,
    pub tau_ms: f64,
    pub drive: f64,
    pub coupling: f64,
    pub previous: Vec<f64>,
    pub trace: Arc<Mutex<Vec<f64>>>,
}

impl GapNode {
    pub fn new(partner: NodeId, v: f64, drive: f64, coupling: f64) -> Self {
        Self {
            partner,
            v,
            v_start: v,
            tau_ms: 10.0,
            drive,
            coupling,
            previous: Vec::new(),
            trace: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn integrate(&self, ctx: &SliceContext, partner: impl Fn(f64) -> f64) -> Vec<f64> {
        let dt = ctx.dt_ms();
        let mut v = self.v_start;
        let mut samples = Vec::with_capacity(usize::try_from(ctx.sample_count()).unwrap());
        samples.push(v);
        for k in 0..ctx.steps() {
            #[allow(clippy::cast_precision_loss)]
            let other = partner(k as f64 + 0.5);
            let dv = -v / self.tau_ms + self.drive + self.coupling * (other - v);
            v += dt * dv;
            samples.push(v);
        }
        samples
    }
}

impl NodeDynamics for GapNode {
    fn update(&mut self, ctx: &SliceContext) -> Result<(), NodeError> {
        self.v_start = self.v;
        self.previous.clear();
        let held = self.v_start;
        let samples = self.integrate(ctx, |_| held);
        self.v = samples.last().copied().unwrap_or(self.v_start);
        Ok(())
    }

    fn post_run(&mut self) {
        self.trace.lock().unwrap().push(self.v);
    }
}

impl CoupledDynamics for GapNode {
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
        let samples = self.integrate(ctx, |offset| waveform.evaluate(offset));
        let converged = self.previous.len() == samples.len()
            && self
                .previous
                .iter()
                .zip(&samples)
                .all(|(a, b)| (a - b).abs() < tolerance);
        self.v = samples.last().copied().unwrap_or(self.v_start);
        self.trace.lock().unwrap().extend_from_slice(&samples);
        self.previous.clone_from(&samples);
        Ok(PreliminaryPass { converged, samples })
    }
}
