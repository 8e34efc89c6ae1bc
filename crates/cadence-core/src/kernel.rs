//! The kernel context.
//!
//! There is no process-wide kernel state. A [`KernelContext`] owns every
//! manager and is passed by reference to whatever needs it. Managers share
//! a small lifecycle contract, [`ManagerInterface`], so the context can
//! initialize, query and tear them down uniformly.

use std::path::Path;

use cadence_types::{RunReport, SimulationStatus, StatusUpdate};
use serde::Serialize;
use tracing::info;

use crate::config::{CadenceConfig, ConfigError};
use crate::manager::{SimulationError, SimulationManager};
use crate::network::{Network, NetworkError, NetworkStatus, NetworkUpdate};
use crate::telemetry::TelemetrySink;
use crate::termination::TerminationToken;

/// Lifecycle contract shared by the kernel's managers.
pub trait ManagerInterface {
    /// Read-only snapshot type.
    type Status;
    /// Writable subset of the options.
    type StatusUpdate;
    /// Error raised by a rejected update.
    type Error;

    /// Bring the manager to its initial state.
    fn initialize(&mut self);

    /// Release whatever the manager holds.
    fn finalize(&mut self);

    /// Snapshot of options and counters.
    fn status(&self) -> Self::Status;

    /// Apply an update. A rejected update changes nothing.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` if any field of the update is invalid.
    fn set_status(&mut self, update: &Self::StatusUpdate) -> Result<(), Self::Error>;
}

/// Errors raised while building or configuring a kernel.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {source}")]
    Config {
        /// The underlying configuration error.
        #[from]
        source: ConfigError,
    },

    /// The simulation manager rejected the configuration.
    #[error("simulation error: {source}")]
    Simulation {
        /// The underlying simulation error.
        #[from]
        source: SimulationError,
    },

    /// The network could not be built or reconfigured.
    #[error("network error: {source}")]
    Network {
        /// The underlying network error.
        #[from]
        source: NetworkError,
    },
}

/// Combined status of every manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KernelStatus {
    /// Simulation manager status.
    pub simulation: SimulationStatus,
    /// Network status.
    pub network: NetworkStatus,
}

/// The one owned kernel value.
#[derive(Debug)]
pub struct KernelContext {
    config: CadenceConfig,
    simulation: SimulationManager,
    network: Network,
}

impl KernelContext {
    /// Build and initialize every manager from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError`] if the configuration is invalid or the worker
    /// pool cannot be created.
    pub fn new(config: CadenceConfig) -> Result<Self, KernelError> {
        config.validate()?;
        let mut simulation = SimulationManager::new(&config.kernel, &config.simulation)?;
        let mut network = Network::new(config.kernel.execution, config.kernel.worker_threads)?;
        simulation.initialize();
        network.initialize();
        info!(
            resolution_ms = config.kernel.resolution_ms,
            slice_steps = config.kernel.slice_steps,
            execution = ?config.kernel.execution,
            "Kernel initialized"
        );
        Ok(Self {
            config,
            simulation,
            network,
        })
    }

    /// Load the configuration at `path` and build a kernel from it.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, KernelError> {
        Self::new(CadenceConfig::from_file(path)?)
    }

    /// Simulate `duration_ms` milliseconds over the kernel's network.
    ///
    /// # Errors
    ///
    /// See [`SimulationManager::simulate`].
    pub fn simulate(
        &mut self,
        duration_ms: f64,
        sink: &mut dyn TelemetrySink,
    ) -> Result<RunReport, SimulationError> {
        self.simulation.simulate(duration_ms, &mut self.network, sink)
    }

    /// A handle that can stop the current or next run.
    pub fn terminate_token(&self) -> TerminationToken {
        self.simulation.termination_token()
    }

    /// Return the simulation manager to time zero, keeping the network.
    pub fn reset(&mut self) {
        self.simulation.reset();
    }

    /// Drop every node and return to time zero.
    ///
    /// [`reset`](Self::reset) returns to time zero and keeps the network.
    pub fn reset_kernel(&mut self) {
        self.network.finalize();
        self.network.initialize();
        self.simulation.initialize();
    }

    /// Combined status snapshot.
    pub fn status(&self) -> KernelStatus {
        KernelStatus {
            simulation: self.simulation.status(),
            network: self.network.status(),
        }
    }

    /// Apply a simulation status update.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the update is rejected.
    pub fn set_status(&mut self, update: &StatusUpdate) -> Result<(), ConfigError> {
        self.simulation.set_status(update)
    }

    /// Apply a network status update.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Pool`] if a new worker pool cannot be built.
    pub fn set_network_status(&mut self, update: &NetworkUpdate) -> Result<(), NetworkError> {
        self.network.set_status(update)
    }

    /// Tear down every manager and return the final status.
    pub fn finalize(mut self) -> KernelStatus {
        let status = self.status();
        self.network.finalize();
        self.simulation.finalize();
        info!(time_ms = status.simulation.time_ms, "Kernel finalized");
        status
    }

    /// The configuration the kernel was built from.
    pub const fn config(&self) -> &CadenceConfig {
        &self.config
    }

    /// The simulation manager.
    pub const fn simulation(&self) -> &SimulationManager {
        &self.simulation
    }

    /// The network.
    pub const fn network(&self) -> &Network {
        &self.network
    }

    /// The network, mutably, for adding nodes between runs.
    pub const fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cadence_types::{EndReason, NodeKind};

    use super::*;
    use crate::node::{NodeDynamics, NodeError, SliceContext};
    use crate::telemetry::NoOpSink;

    struct Idle;

    impl NodeDynamics for Idle {
        fn update(&mut self, _ctx: &SliceContext) -> Result<(), NodeError> {
            Ok(())
        }
    }

    #[test]
    fn kernel_runs_from_default_config() {
        let mut kernel = KernelContext::new(CadenceConfig::default()).unwrap();
        let id = kernel.network_mut().add_plain(Idle).unwrap();
        assert_eq!(kernel.network().kind(id), Some(NodeKind::Plain));

        let report = kernel.simulate(5.0, &mut NoOpSink).unwrap();
        assert_eq!(report.end_reason, EndReason::Completed);
        assert_eq!(report.steps_processed, 50);

        let status = kernel.status();
        assert_eq!(status.network.nodes, 1);
        assert_eq!(status.simulation.slice, 5);
    }

    #[test]
    fn reset_kernel_drops_nodes_and_time() {
        let mut kernel = KernelContext::new(CadenceConfig::default()).unwrap();
        let _ = kernel.network_mut().add_plain(Idle).unwrap();
        let _ = kernel.simulate(1.0, &mut NoOpSink).unwrap();

        kernel.reset_kernel();

        assert!(kernel.network().is_empty());
        assert!(!kernel.simulation().has_run_before());
        assert_eq!(kernel.status().simulation.slice, 0);
    }

    #[test]
    fn reset_keeps_the_network() {
        let mut kernel = KernelContext::new(CadenceConfig::default()).unwrap();
        let id = kernel.network_mut().add_plain(Idle).unwrap();
        let _ = kernel.simulate(1.0, &mut NoOpSink).unwrap();

        kernel.reset();

        assert_eq!(kernel.network().len(), 1);
        assert_eq!(kernel.network().kind(id), Some(NodeKind::Plain));
        assert_eq!(kernel.status().simulation.slice, 0);
        assert!(!kernel.simulation().has_run_before());
    }

    #[test]
    fn token_terminates_the_next_run() {
        let mut kernel = KernelContext::new(CadenceConfig::default()).unwrap();
        kernel.terminate_token().terminate();
        let report = kernel.simulate(1.0, &mut NoOpSink).unwrap();
        assert_eq!(report.end_reason, EndReason::Terminated);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = CadenceConfig::default();
        config.simulation.preliminary.tolerance = -1.0;
        let err = KernelContext::new(config).unwrap_err();
        assert!(matches!(err, KernelError::Config { .. }));
    }

    #[test]
    fn finalize_reports_final_status() {
        let mut kernel = KernelContext::new(CadenceConfig::default()).unwrap();
        let _ = kernel.simulate(2.0, &mut NoOpSink).unwrap();
        let status = kernel.finalize();
        assert_eq!(status.simulation.to_do, 0);
        assert_eq!(status.network.nodes, 0);
        assert!(serde_json::to_string(&status).is_ok());
    }
}
