//! Engine binary for the Cadence simulation kernel.
//!
//! Loads configuration, builds the demo network, and runs it until the
//! requested simulated time is reached or the process is asked to stop.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `cadence-config.yaml` (or the path given as
//!    the first argument)
//! 2. Initialize structured logging (tracing)
//! 3. Build the kernel context and the demo network
//! 4. Install the Ctrl+C / SIGTERM handler
//! 5. Run the simulation on a blocking worker thread
//! 6. Print the final kernel status as JSON

mod demo;
mod error;

use std::path::{Path, PathBuf};

use cadence_core::config::{CadenceConfig, LogFormat, LoggingConfig};
use cadence_core::kernel::KernelContext;
use cadence_core::telemetry::TracingSink;
use cadence_core::termination::TerminationToken;
use cadence_types::RunReport;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::demo::DemoConfig;
use crate::error::EngineError;

const DEFAULT_CONFIG_PATH: &str = "cadence-config.yaml";

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if configuration, kernel construction, or the run
/// itself fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);

    // 1. Load configuration.
    let (config, demo) = load_config(&config_path)?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(
        path = %config_path.display(),
        resolution_ms = config.kernel.resolution_ms,
        slice_steps = config.kernel.slice_steps,
        execution = ?config.kernel.execution,
        simulate_ms = demo.simulate_ms,
        "cadence-engine starting"
    );

    // 3. Build the kernel and the demo network.
    let mut kernel = KernelContext::new(config).map_err(EngineError::from)?;
    let _summary = demo::build_network(&demo.network, kernel.network_mut())?;

    // 4. Stop at the next slice boundary on Ctrl+C or SIGTERM.
    let token = kernel.terminate_token();
    let _signals = tokio::spawn(wait_for_shutdown(token));

    // 5. Run.
    let (kernel, report) = run_blocking(kernel, demo.simulate_ms).await?;
    info!(
        end_reason = ?report.end_reason,
        steps_processed = report.steps_processed,
        slices_completed = report.slices_completed,
        "cadence-engine run finished"
    );

    // 6. Report.
    let status = kernel.finalize();
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

/// Load the kernel and demo configuration from `path`.
///
/// A missing file means defaults for everything.
fn load_config(path: &Path) -> Result<(CadenceConfig, DemoConfig), EngineError> {
    if path.exists() {
        Ok((CadenceConfig::from_file(path)?, DemoConfig::load(path)?))
    } else {
        Ok((CadenceConfig::default(), DemoConfig::default()))
    }
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    match logging.format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
    }
}

/// Run the simulation on the blocking pool so the signal task stays
/// responsive, and hand the kernel back.
async fn run_blocking(
    mut kernel: KernelContext,
    duration_ms: f64,
) -> anyhow::Result<(KernelContext, RunReport)> {
    let (kernel, result) = tokio::task::spawn_blocking(move || {
        let result = kernel.simulate(duration_ms, &mut TracingSink);
        (kernel, result)
    })
    .await?;
    Ok((kernel, result?))
}

/// Wait for Ctrl+C or SIGTERM, then request termination.
async fn wait_for_shutdown(token: TerminationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }

    info!("Stopping at the next slice boundary");
    token.terminate();
}
