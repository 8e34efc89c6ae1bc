//! Enumeration types shared between the kernel and its collaborators.

use serde::{Deserialize, Serialize};

/// Capability variant of a registered node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Updated once per slice, no instantaneous coupling.
    Plain,
    /// Updated once per slice and relaxed by the preliminary solver.
    Coupled,
}

/// How a `simulate` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// All requested steps were processed.
    Completed,
    /// The termination flag was observed at a slice boundary.
    Terminated,
}

/// How the preliminary solver finished a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveOutcome {
    /// Every coupled node reported local convergence in the same pass.
    Converged,
    /// The iteration budget ran out; the last iterate was kept.
    BudgetExhausted,
    /// Budget of zero: one pass, verdicts ignored.
    SinglePass,
}

impl SolveOutcome {
    /// Whether the outcome should be surfaced as a convergence failure.
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::BudgetExhausted)
    }
}
