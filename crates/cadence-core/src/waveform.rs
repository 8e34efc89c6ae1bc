//! Continuous-time waveform reconstruction from per-step samples.
//!
//! During a preliminary pass each coupled node produces one sample per step
//! boundary of the active window. Before the next pass those samples are
//! turned into a [`Waveform`] that partner nodes can evaluate at any
//! fractional offset inside the window. The [`InterpolationOrder`] picks the
//! polynomial degree of the reconstruction:
//!
//! - `0` -- piecewise constant (sample-and-hold)
//! - `1` -- piecewise linear
//! - `3` -- cubic Hermite, slopes estimated by finite differences
//!
//! The order affects accuracy of what partners see between step
//! boundaries. It never affects how the solver decides to stop.

use std::collections::BTreeMap;

use cadence_types::NodeId;
use serde::{Deserialize, Serialize};

/// Errors raised while building waveforms.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaveformError {
    /// Only orders 0, 1 and 3 are supported.
    #[error("unsupported interpolation order {order} (expected 0, 1 or 3)")]
    UnsupportedOrder {
        /// The rejected order.
        order: u8,
    },

    /// A waveform needs at least one sample.
    #[error("waveform requires at least one sample")]
    Empty,
}

/// Polynomial degree used to reconstruct a waveform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum InterpolationOrder {
    /// Sample-and-hold.
    Constant,
    /// Straight lines between samples.
    Linear,
    /// Cubic Hermite segments.
    #[default]
    Cubic,
}

impl TryFrom<u8> for InterpolationOrder {
    type Error = WaveformError;

    fn try_from(order: u8) -> Result<Self, Self::Error> {
        match order {
            0 => Ok(Self::Constant),
            1 => Ok(Self::Linear),
            3 => Ok(Self::Cubic),
            other => Err(WaveformError::UnsupportedOrder { order: other }),
        }
    }
}

impl From<InterpolationOrder> for u8 {
    fn from(order: InterpolationOrder) -> Self {
        match order {
            InterpolationOrder::Constant => 0,
            InterpolationOrder::Linear => 1,
            InterpolationOrder::Cubic => 3,
        }
    }
}

impl core::fmt::Display for InterpolationOrder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// A waveform over one slice window, sampled at every step boundary.
///
/// Sample `k` is the value at offset `k` steps from the window start.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    order: InterpolationOrder,
    samples: Vec<f64>,
    /// Per-step slopes, only populated for cubic reconstruction.
    slopes: Vec<f64>,
}

impl Waveform {
    /// A flat waveform holding `value` across the whole window.
    pub fn constant(value: f64) -> Self {
        Self {
            order: InterpolationOrder::Constant,
            samples: vec![value],
            slopes: Vec::new(),
        }
    }

    /// Reconstruct a waveform from step-boundary samples.
    ///
    /// # Errors
    ///
    /// Returns [`WaveformError::Empty`] if `samples` is empty.
    pub fn from_samples(order: InterpolationOrder, samples: Vec<f64>) -> Result<Self, WaveformError> {
        if samples.is_empty() {
            return Err(WaveformError::Empty);
        }
        let slopes = if order == InterpolationOrder::Cubic {
            finite_difference_slopes(&samples)
        } else {
            Vec::new()
        };
        Ok(Self {
            order,
            samples,
            slopes,
        })
    }

    /// The reconstruction order.
    pub const fn order(&self) -> InterpolationOrder {
        self.order
    }

    /// The raw samples.
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Value at the last sample.
    pub fn final_value(&self) -> f64 {
        self.samples.last().copied().unwrap_or_default()
    }

    /// Evaluate at `offset` steps from the window start.
    ///
    /// Offsets outside `[0, samples - 1]` are clamped to the nearest end.
    pub fn evaluate(&self, offset: f64) -> f64 {
        let last_index = self.samples.len().saturating_sub(1);
        #[allow(clippy::cast_precision_loss)]
        let span = last_index as f64;
        let offset = if offset.is_nan() { 0.0 } else { offset.clamp(0.0, span) };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let left = (offset.floor() as usize).min(last_index);
        if left == last_index {
            return self.sample(last_index);
        }
        let right = left.saturating_add(1);
        #[allow(clippy::cast_precision_loss)]
        let frac = offset - left as f64;

        let y0 = self.sample(left);
        let y1 = self.sample(right);
        match self.order {
            InterpolationOrder::Constant => y0,
            InterpolationOrder::Linear => (y1 - y0).mul_add(frac, y0),
            InterpolationOrder::Cubic => {
                let m0 = self.slope(left);
                let m1 = self.slope(right);
                hermite(y0, y1, m0, m1, frac)
            }
        }
    }

    fn sample(&self, index: usize) -> f64 {
        self.samples
            .get(index)
            .copied()
            .unwrap_or_else(|| self.final_value())
    }

    fn slope(&self, index: usize) -> f64 {
        self.slopes.get(index).copied().unwrap_or_default()
    }
}

/// Cubic Hermite basis on the unit interval.
fn hermite(y0: f64, y1: f64, m0: f64, m1: f64, t: f64) -> f64 {
    let t2 = t * t;
    let t3 = t2 * t;
    let h00 = 2.0f64.mul_add(t3, -3.0 * t2) + 1.0;
    let h10 = (-2.0f64).mul_add(t2, t3) + t;
    let h01 = (-2.0f64).mul_add(t3, 3.0 * t2);
    let h11 = t3 - t2;
    h00.mul_add(y0, h10.mul_add(m0, h01.mul_add(y1, h11 * m1)))
}

/// Central differences inside, one-sided differences at both ends.
fn finite_difference_slopes(samples: &[f64]) -> Vec<f64> {
    let n = samples.len();
    (0..n)
        .map(|i| {
            let prev = i.checked_sub(1).and_then(|p| samples.get(p)).copied();
            let next = i.checked_add(1).and_then(|q| samples.get(q)).copied();
            let here = samples.get(i).copied().unwrap_or_default();
            match (prev, next) {
                (Some(p), Some(q)) => (q - p) / 2.0,
                (None, Some(q)) => q - here,
                (Some(p), None) => here - p,
                (None, None) => 0.0,
            }
        })
        .collect()
}

/// Waveforms of every coupled node, keyed by node.
///
/// This is the input a coupled node receives on each preliminary pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WaveformTable {
    waveforms: BTreeMap<NodeId, Waveform>,
}

impl WaveformTable {
    /// Create an empty table.
    pub const fn new() -> Self {
        Self {
            waveforms: BTreeMap::new(),
        }
    }

    /// Insert or replace the waveform of `node`.
    pub fn insert(&mut self, node: NodeId, waveform: Waveform) {
        self.waveforms.insert(node, waveform);
    }

    /// Waveform of `node`, if present.
    pub fn get(&self, node: NodeId) -> Option<&Waveform> {
        self.waveforms.get(&node)
    }

    /// Evaluate the waveform of `node` at `offset` steps into the window.
    pub fn value_at(&self, node: NodeId, offset: f64) -> Option<f64> {
        self.waveforms.get(&node).map(|w| w.evaluate(offset))
    }

    /// Number of waveforms in the table.
    pub fn len(&self) -> usize {
        self.waveforms.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.waveforms.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn line(n: usize) -> Vec<f64> {
        (0..n)
            .map(|k| 2.0f64.mul_add(f64::from(u32::try_from(k).unwrap()), 1.0))
            .collect()
    }

    #[test]
    fn order_round_trips_through_u8() {
        for order in [0u8, 1, 3] {
            let parsed = InterpolationOrder::try_from(order).unwrap();
            assert_eq!(u8::from(parsed), order);
        }
        assert_eq!(
            InterpolationOrder::try_from(2),
            Err(WaveformError::UnsupportedOrder { order: 2 })
        );
    }

    #[test]
    fn order_deserializes_from_integer() {
        let order: InterpolationOrder = serde_json::from_str("1").unwrap();
        assert_eq!(order, InterpolationOrder::Linear);
        assert!(serde_json::from_str::<InterpolationOrder>("2").is_err());
    }

    #[test]
    fn empty_samples_rejected() {
        assert_eq!(
            Waveform::from_samples(InterpolationOrder::Linear, Vec::new()),
            Err(WaveformError::Empty)
        );
    }

    #[test]
    fn constant_waveform_is_flat() {
        let w = Waveform::constant(-65.0);
        assert_abs_diff_eq!(w.evaluate(0.0), -65.0);
        assert_abs_diff_eq!(w.evaluate(7.3), -65.0);
        assert_abs_diff_eq!(w.final_value(), -65.0);
    }

    #[test]
    fn sample_and_hold_uses_left_sample() {
        let w = Waveform::from_samples(InterpolationOrder::Constant, line(4)).unwrap();
        assert_abs_diff_eq!(w.evaluate(1.9), 3.0);
        assert_abs_diff_eq!(w.evaluate(3.0), 7.0);
    }

    #[test]
    fn linear_and_cubic_reproduce_a_line() {
        for order in [InterpolationOrder::Linear, InterpolationOrder::Cubic] {
            let w = Waveform::from_samples(order, line(6)).unwrap();
            for tenth in 0..50u32 {
                let x = f64::from(tenth) / 10.0;
                assert_abs_diff_eq!(w.evaluate(x), 2.0f64.mul_add(x, 1.0), epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn cubic_is_exact_for_quadratics_between_interior_samples() {
        let samples: Vec<f64> = (0..6u32).map(|k| f64::from(k * k)).collect();
        let w = Waveform::from_samples(InterpolationOrder::Cubic, samples).unwrap();
        // Interval [2, 3] has both slopes from central differences.
        assert_abs_diff_eq!(w.evaluate(2.5), 6.25, epsilon = 1e-12);
        // Linear would give the chord midpoint instead.
        let lin = Waveform::from_samples(
            InterpolationOrder::Linear,
            (0..6u32).map(|k| f64::from(k * k)).collect(),
        )
        .unwrap();
        assert_abs_diff_eq!(lin.evaluate(2.5), 6.5, epsilon = 1e-12);
    }

    #[test]
    fn evaluation_clamps_out_of_range_offsets() {
        let w = Waveform::from_samples(InterpolationOrder::Linear, line(3)).unwrap();
        assert_abs_diff_eq!(w.evaluate(-4.0), 1.0);
        assert_abs_diff_eq!(w.evaluate(99.0), 5.0);
        assert_abs_diff_eq!(w.evaluate(f64::NAN), 1.0);
    }

    #[test]
    fn table_looks_up_by_node() {
        let mut table = WaveformTable::new();
        assert!(table.is_empty());
        table.insert(NodeId::new(4), Waveform::constant(1.5));
        assert_eq!(table.len(), 1);
        assert_abs_diff_eq!(table.value_at(NodeId::new(4), 0.3).unwrap(), 1.5);
        assert!(table.value_at(NodeId::new(5), 0.3).is_none());
    }
}
