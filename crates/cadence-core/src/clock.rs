//! Simulation clock and time-slice window.
//!
//! The clock is the single source of truth for simulated time. It counts
//! whole steps at a fixed [`Resolution`] and only ever moves by one full
//! slice at a time. Progress inside a slice is tracked by the
//! [`TimeSliceWindow`]: update operations must respect the half-open
//! interval `[from_step, to_step)` relative to the clock.
//!
//! # Design Principles
//!
//! - All step arithmetic is checked; overflow is an error, never a wrap.
//! - The clock advances exactly once per completed slice, after all node
//!   and preliminary work for that slice has been committed.
//! - A slice cut short by the end of a run is held open: the clock stays
//!   put and `from_step` records how far the slice got, so the precise
//!   time `clock + from_step` is always exact.

use cadence_types::{Resolution, Steps};

/// Errors that can occur during clock operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// The precise time is only defined between slices.
    #[error("precise time queried while a run is in progress")]
    QueriedWhileRunning,

    /// A step counter would overflow.
    #[error("step counter overflow: cannot advance beyond the representable range")]
    Overflow,

    /// Invalid slice configuration.
    #[error("invalid clock configuration: {reason}")]
    InvalidConfig {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

/// The step interval of the current slice that updates must respect.
///
/// Offsets are relative to the clock (the slice origin).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeSliceWindow {
    /// First step of the window, inclusive.
    from_step: u64,
    /// Last step of the window, exclusive.
    to_step: u64,
    /// Number of slice transitions since time zero.
    slice_index: u64,
}

impl TimeSliceWindow {
    /// First step of the window (inclusive).
    pub const fn from_step(&self) -> u64 {
        self.from_step
    }

    /// End of the window (exclusive).
    pub const fn to_step(&self) -> u64 {
        self.to_step
    }

    /// Index of the slice this window belongs to. Alternates parity between
    /// consecutive slices, which collaborators use to pick double buffers.
    pub const fn slice_index(&self) -> u64 {
        self.slice_index
    }

    /// Number of steps covered.
    pub const fn len(&self) -> u64 {
        self.to_step.saturating_sub(self.from_step)
    }

    /// Whether the window covers no steps.
    pub const fn is_empty(&self) -> bool {
        self.to_step <= self.from_step
    }
}

/// How a window was committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowCommit {
    /// The slice reached its end and the clock advanced.
    Advanced {
        /// Steps processed by the window.
        steps: u64,
    },
    /// The window stopped short of the slice end; the slice stays open.
    Held {
        /// Steps processed by the window.
        steps: u64,
    },
}

impl WindowCommit {
    /// Steps processed by the committed window.
    pub const fn steps(self) -> u64 {
        match self {
            Self::Advanced { steps } | Self::Held { steps } => steps,
        }
    }
}

/// The simulation clock.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationClock {
    /// Start of the active or most recent slice.
    current: Steps,
    /// Slice length in steps.
    slice_length: u64,
    /// Step duration, fixed for the lifetime of the clock.
    resolution: Resolution,
    /// Window of the active slice.
    window: TimeSliceWindow,
    /// True only inside the active-slice region of a run.
    running: bool,
}

impl SimulationClock {
    /// Create a clock at time zero.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] if `slice_length` is zero or
    /// does not fit the signed step range.
    pub fn new(resolution: Resolution, slice_length: u64) -> Result<Self, ClockError> {
        if slice_length == 0 {
            return Err(ClockError::InvalidConfig {
                reason: "slice length must be at least 1 step".to_owned(),
            });
        }
        if i64::try_from(slice_length).is_err() {
            return Err(ClockError::InvalidConfig {
                reason: format!("slice length {slice_length} exceeds the step range"),
            });
        }
        Ok(Self {
            current: Steps::ZERO,
            slice_length,
            resolution,
            window: TimeSliceWindow::default(),
            running: false,
        })
    }

    /// Clock value at the start of the active or most recent slice.
    pub const fn current_slice_origin(&self) -> Steps {
        self.current
    }

    /// Clock value one slice earlier. Negative before the first slice ends.
    pub fn previous_slice_origin(&self) -> Steps {
        // slice_length fits i64 by construction and current is never
        // negative, so the difference is representable.
        self.current
            .checked_sub(self.slice_steps())
            .unwrap_or(Steps::new(i64::MIN))
    }

    /// Precise simulated time, `clock + from_step`.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::QueriedWhileRunning`] inside a run, where a live
    /// slice has partially applied state.
    pub fn precise_time(&self) -> Result<Steps, ClockError> {
        if self.running {
            return Err(ClockError::QueriedWhileRunning);
        }
        self.current
            .checked_add_unsigned(self.window.from_step)
            .ok_or(ClockError::Overflow)
    }

    /// Open the window for the next slice iteration.
    ///
    /// The window starts where the slice was left and ends at the slice
    /// boundary or after `pending` steps, whichever comes first.
    pub fn open_window(&mut self, pending: u64) -> TimeSliceWindow {
        let end = self.window.from_step.saturating_add(pending);
        self.window.to_step = end.min(self.slice_length);
        self.window
    }

    /// Commit the open window: advance the clock if the slice is complete,
    /// otherwise hold the slice open at `to_step`.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::Overflow`] if advancing would overflow.
    pub fn commit_window(&mut self) -> Result<WindowCommit, ClockError> {
        let steps = self.window.len();
        if self.window.to_step >= self.slice_length {
            self.advance()?;
            Ok(WindowCommit::Advanced { steps })
        } else {
            self.window.from_step = self.window.to_step;
            Ok(WindowCommit::Held { steps })
        }
    }

    /// Advance by exactly one slice and open a fresh window at step zero.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::Overflow`] if the clock or slice index would
    /// overflow. The clock is left untouched in that case.
    pub fn advance(&mut self) -> Result<(), ClockError> {
        let next = self
            .current
            .checked_add(self.slice_steps())
            .ok_or(ClockError::Overflow)?;
        let next_index = self
            .window
            .slice_index
            .checked_add(1)
            .ok_or(ClockError::Overflow)?;
        self.current = next;
        self.window = TimeSliceWindow {
            from_step: 0,
            to_step: 0,
            slice_index: next_index,
        };
        Ok(())
    }

    /// Restore time zero.
    pub fn reset(&mut self) {
        self.current = Steps::ZERO;
        self.window = TimeSliceWindow::default();
        self.running = false;
    }

    /// Mark the start of the active-slice region.
    pub(crate) const fn begin_run(&mut self) {
        self.running = true;
    }

    /// Mark the end of the active-slice region.
    pub(crate) const fn end_run(&mut self) {
        self.running = false;
    }

    /// Whether a run is in progress.
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// The current window.
    pub const fn window(&self) -> TimeSliceWindow {
        self.window
    }

    /// Current slice index.
    pub const fn slice_index(&self) -> u64 {
        self.window.slice_index
    }

    /// Start of the current window.
    pub const fn from_step(&self) -> u64 {
        self.window.from_step
    }

    /// End of the current window.
    pub const fn to_step(&self) -> u64 {
        self.window.to_step
    }

    /// Slice length in steps.
    pub const fn slice_length(&self) -> u64 {
        self.slice_length
    }

    /// Step resolution.
    pub const fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Slice length as a signed step count.
    fn slice_steps(&self) -> Steps {
        Steps::new(i64::try_from(self.slice_length).unwrap_or(i64::MAX))
    }
}
