//! Discrete simulated time.
//!
//! Simulated time is counted in whole steps. A [`Resolution`] maps one step
//! to a duration in milliseconds and is fixed for the lifetime of a kernel.
//! Step counts are signed so that "one slice before time zero" is still a
//! representable value.

use serde::{Deserialize, Serialize};

/// A signed number of simulation steps.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Steps(i64);

impl Steps {
    /// Time zero.
    pub const ZERO: Self = Self(0);

    /// Create a step count.
    pub const fn new(steps: i64) -> Self {
        Self(steps)
    }

    /// Return the raw step count.
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Add another step count, returning `None` on overflow.
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(sum) => Some(Self(sum)),
            None => None,
        }
    }

    /// Subtract another step count, returning `None` on overflow.
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(diff) => Some(Self(diff)),
            None => None,
        }
    }

    /// Add an unsigned number of steps, returning `None` if the result is
    /// not representable.
    pub fn checked_add_unsigned(self, steps: u64) -> Option<Self> {
        let steps = i64::try_from(steps).ok()?;
        self.checked_add(Self(steps))
    }

    /// Convert to milliseconds at the given resolution.
    #[allow(clippy::cast_precision_loss)]
    pub fn to_ms(self, resolution: Resolution) -> f64 {
        self.0 as f64 * resolution.ms_per_step()
    }
}

impl core::fmt::Display for Steps {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} steps", self.0)
    }
}

impl From<i64> for Steps {
    fn from(steps: i64) -> Self {
        Self(steps)
    }
}

/// Duration of a single step, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    ms_per_step: f64,
}

impl Resolution {
    /// Default resolution of 0.1 ms per step.
    pub const DEFAULT_MS: f64 = 0.1;

    /// Create a resolution. Returns `None` unless `ms_per_step` is finite
    /// and strictly positive.
    pub fn try_new(ms_per_step: f64) -> Option<Self> {
        (ms_per_step.is_finite() && ms_per_step > 0.0).then_some(Self { ms_per_step })
    }

    /// Milliseconds represented by one step.
    pub const fn ms_per_step(self) -> f64 {
        self.ms_per_step
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            ms_per_step: Self::DEFAULT_MS,
        }
    }
}
