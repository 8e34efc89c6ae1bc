//! Simulation clock, slice loop, and preliminary iteration for the Cadence
//! kernel.
//!
//! Simulated time advances in fixed-length slices. Within a slice every
//! node is advanced across the active step window; nodes with
//! instantaneous coupling are then relaxed against each other by a bounded
//! fixed-point loop; only then does the clock move on.
//!
//! # Modules
//!
//! - [`clock`] -- Simulation clock and the time-slice window.
//! - [`config`] -- Configuration loading from `cadence-config.yaml` into
//!   strongly-typed structs.
//! - [`kernel`] -- [`KernelContext`] and the [`ManagerInterface`] contract.
//! - [`manager`] -- The run loop: `simulate`, termination, reset, status.
//! - [`network`] -- Node registry and serial or parallel pass dispatch.
//! - [`node`] -- Node capability traits.
//! - [`pending`] -- Pending-work counters.
//! - [`preliminary`] -- Waveform relaxation solver.
//! - [`telemetry`] -- Progress sinks.
//! - [`termination`] -- Cooperative termination token.
//! - [`timing`] -- Wall-clock slice instrumentation.
//! - [`waveform`] -- Waveform reconstruction from per-step samples.
//!
//! [`KernelContext`]: kernel::KernelContext
//! [`ManagerInterface`]: kernel::ManagerInterface

pub mod clock;
pub mod config;
pub mod kernel;
pub mod manager;
pub mod network;
pub mod node;
pub mod pending;
pub mod preliminary;
pub mod telemetry;
pub mod termination;
pub mod timing;
pub mod waveform;
