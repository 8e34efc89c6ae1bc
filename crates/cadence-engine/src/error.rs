//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure mode of engine startup. Failures of
//! the run itself are reported as [`SimulationError`] and surface through
//! `anyhow` in `main`.
//!
//! [`SimulationError`]: cadence_core::manager::SimulationError

/// Top-level error for engine startup.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Kernel configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: cadence_core::config::ConfigError,
    },

    /// The kernel could not be built.
    #[error("kernel error: {source}")]
    Kernel {
        /// The underlying kernel error.
        #[from]
        source: cadence_core::kernel::KernelError,
    },

    /// A node could not be registered.
    #[error("network error: {source}")]
    Network {
        /// The underlying network error.
        #[from]
        source: cadence_core::network::NetworkError,
    },

    /// The demo section of the configuration is invalid.
    #[error("demo config error: {message}")]
    Demo {
        /// Description of the problem.
        message: String,
    },
}
