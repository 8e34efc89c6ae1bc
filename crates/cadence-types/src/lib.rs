//! Shared value types for the Cadence simulation kernel.
//!
//! Types defined here are used by the kernel library, the engine binary and
//! any node implementation plugged into the kernel.
//!
//! # Modules
//!
//! - [`ids`] -- Identifiers for nodes and simulation runs
//! - [`time`] -- Step counts and the step resolution
//! - [`enums`] -- Outcome and classification enumerations
//! - [`status`] -- Serializable status snapshots and run reports

pub mod enums;
pub mod ids;
pub mod status;
pub mod time;

pub use enums::{EndReason, NodeKind, SolveOutcome};
pub use ids::{NodeId, RunId};
pub use status::{RunReport, SimulationStatus, StatusUpdate};
pub use time::{Resolution, Steps};
