//! Pending-work tracking across accumulated `simulate` calls.

/// Cycles remaining and cycles requested.
///
/// `to_do` only decreases while a run is active. Requests accumulate: a
/// second `simulate` call issued after a terminated run adds to whatever
/// was left over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingWork {
    to_do: u64,
    to_do_total: u64,
}

impl PendingWork {
    /// Nothing pending.
    pub const fn new() -> Self {
        Self {
            to_do: 0,
            to_do_total: 0,
        }
    }

    /// Add `cycles` to both counters. Returns `None` and leaves the counters
    /// untouched if either would overflow.
    pub const fn request(&mut self, cycles: u64) -> Option<()> {
        let Some(to_do) = self.to_do.checked_add(cycles) else {
            return None;
        };
        let Some(total) = self.to_do_total.checked_add(cycles) else {
            return None;
        };
        self.to_do = to_do;
        self.to_do_total = total;
        Some(())
    }

    /// Record `cycles` as processed.
    pub const fn consume(&mut self, cycles: u64) {
        self.to_do = self.to_do.saturating_sub(cycles);
    }

    /// Cycles still pending.
    pub const fn to_do(&self) -> u64 {
        self.to_do
    }

    /// Cycles requested since the last reset.
    pub const fn to_do_total(&self) -> u64 {
        self.to_do_total
    }

    /// Whether all requested cycles are processed.
    pub const fn is_done(&self) -> bool {
        self.to_do == 0
    }

    /// Fraction of requested work already processed, in percent.
    #[allow(clippy::cast_precision_loss)]
    pub fn percent_complete(&self) -> f64 {
        if self.to_do_total == 0 {
            return 100.0;
        }
        let done = self.to_do_total.saturating_sub(self.to_do);
        100.0 * done as f64 / self.to_do_total as f64
    }

    /// Back to nothing pending.
    pub const fn reset(&mut self) {
        *self = Self::new();
    }
}
