//! Wall-clock instrumentation of slices.
//!
//! Every slice is bracketed by a [`WallClockSample`]. The samples are summed
//! into a cumulative cost that is independent of simulated time. Whether
//! progress is reported is a telemetry concern; this bookkeeping always runs.

use std::time::{Duration, Instant};

/// Begin and end of one slice's combined update and preliminary work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallClockSample {
    /// When the slice's work started.
    pub slice_begin: Instant,
    /// When the slice's work finished.
    pub slice_end: Instant,
}

impl WallClockSample {
    /// Wall-clock time covered by the sample.
    pub fn elapsed(&self) -> Duration {
        self.slice_end.saturating_duration_since(self.slice_begin)
    }
}

/// Running sum of slice wall-clock costs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WallClock {
    cumulative: Duration,
    slice_begin: Option<Instant>,
}

impl WallClock {
    /// Nothing measured yet.
    pub const fn new() -> Self {
        Self {
            cumulative: Duration::ZERO,
            slice_begin: None,
        }
    }

    /// Mark the start of a slice.
    pub fn begin_slice(&mut self) {
        self.slice_begin = Some(Instant::now());
    }

    /// Mark the end of the slice started by [`begin_slice`](Self::begin_slice)
    /// and add its cost to the running sum.
    ///
    /// Without a matching begin the sample is empty.
    pub fn end_slice(&mut self) -> WallClockSample {
        let slice_end = Instant::now();
        let slice_begin = self.slice_begin.take().unwrap_or(slice_end);
        let sample = WallClockSample {
            slice_begin,
            slice_end,
        };
        self.cumulative = self.cumulative.saturating_add(sample.elapsed());
        sample
    }

    /// Total wall-clock time measured since the last reset.
    pub const fn cumulative(&self) -> Duration {
        self.cumulative
    }

    /// Forget everything measured.
    pub const fn reset(&mut self) {
        *self = Self::new();
    }
}
