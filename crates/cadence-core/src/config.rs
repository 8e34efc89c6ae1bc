//! Configuration loading and typed config structures for the Cadence kernel.
//!
//! The canonical configuration lives in `cadence-config.yaml`. This module
//! defines strongly-typed structs that mirror the YAML structure, a loader
//! that reads the file, and validation of every value the kernel depends
//! on. Sections the kernel does not know about (for example the demo
//! engine's `network` section) are ignored.

use std::path::Path;

use cadence_types::Resolution;
use serde::Deserialize;

use crate::waveform::InterpolationOrder;

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is outside its permitted range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CadenceConfig {
    /// Time base and execution settings.
    #[serde(default)]
    pub kernel: KernelConfig,

    /// Simulation manager options.
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CadenceConfig {
    /// Load and validate configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if it is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every value the kernel depends on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.kernel.validate()?;
        self.simulation.preliminary.validate()
    }
}

/// How node passes are dispatched within a slice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One node after another on the calling thread.
    #[default]
    Serial,
    /// Nodes spread over a `rayon` worker pool.
    Parallel,
}

/// Time base and execution settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KernelConfig {
    /// Milliseconds represented by one step.
    #[serde(default = "default_resolution_ms")]
    pub resolution_ms: f64,

    /// Slice length in steps (the minimum inter-node delay).
    #[serde(default = "default_slice_steps")]
    pub slice_steps: u64,

    /// Serial or parallel dispatch of node passes.
    #[serde(default)]
    pub execution: ExecutionMode,

    /// Size of the worker pool in parallel mode (0 = one per core).
    #[serde(default)]
    pub worker_threads: usize,
}

impl KernelConfig {
    /// The validated step resolution.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] unless `resolution_ms` is finite and
    /// strictly positive.
    pub fn resolution(&self) -> Result<Resolution, ConfigError> {
        Resolution::try_new(self.resolution_ms).ok_or_else(|| ConfigError::Invalid {
            reason: format!(
                "resolution_ms must be finite and positive, got {}",
                self.resolution_ms
            ),
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.resolution()?;
        if self.slice_steps == 0 {
            return Err(ConfigError::Invalid {
                reason: "slice_steps must be at least 1".to_owned(),
            });
        }
        if i64::try_from(self.slice_steps).is_err() {
            return Err(ConfigError::Invalid {
                reason: format!("slice_steps {} exceeds the step range", self.slice_steps),
            });
        }
        Ok(())
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            resolution_ms: default_resolution_ms(),
            slice_steps: default_slice_steps(),
            execution: ExecutionMode::default(),
            worker_threads: 0,
        }
    }
}

/// Simulation manager options.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Whether per-slice progress is sent to the telemetry sink.
    #[serde(default)]
    pub print_progress: bool,

    /// Preliminary iteration solver settings.
    #[serde(default)]
    pub preliminary: PreliminaryConfig,
}

/// Settings of the preliminary iteration solver.
///
/// Read-only while a run is in progress; changed between runs through the
/// simulation manager's status update.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PreliminaryConfig {
    /// Maximum passes per slice. Zero means exactly one unchecked pass.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Degree of waveform reconstruction between passes.
    #[serde(default)]
    pub interpolation_order: InterpolationOrder,

    /// Local convergence threshold.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

impl PreliminaryConfig {
    /// Create a validated config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `tolerance` is negative or
    /// non-finite.
    pub fn new(
        max_iterations: u32,
        interpolation_order: InterpolationOrder,
        tolerance: f64,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            max_iterations,
            interpolation_order,
            tolerance,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the tolerance.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `tolerance` is negative or
    /// non-finite.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "preliminary tolerance must be finite and non-negative, got {}",
                    self.tolerance
                ),
            });
        }
        Ok(())
    }
}

impl Default for PreliminaryConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            interpolation_order: InterpolationOrder::default(),
            tolerance: default_tolerance(),
        }
    }
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins if set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

const fn default_resolution_ms() -> f64 {
    Resolution::DEFAULT_MS
}

const fn default_slice_steps() -> u64 {
    10
}

const fn default_max_iterations() -> u32 {
    15
}

const fn default_tolerance() -> f64 {
    0.0001
}

fn default_log_level() -> String {
    "info".to_owned()
}
