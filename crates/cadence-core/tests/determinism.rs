//! Serial and parallel execution must produce identical results.
//!
//! Every pass reads only the previous pass's waveforms, so spreading the
//! nodes of a pass over workers may change the order of evaluation but never
//! what any node computes.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cadence_core::config::{CadenceConfig, ExecutionMode};
use cadence_core::kernel::KernelContext;
use cadence_core::telemetry::NoOpSink;
use cadence_types::{EndReason, RunReport};
use common::{GapNode, Ticker};

struct Outcome {
    report: RunReport,
    time_ms: f64,
    steps: u64,
    traces: Vec<Vec<f64>>,
}

fn run(mode: ExecutionMode, pairs: u32) -> Outcome {
    let mut config = CadenceConfig::default();
    config.kernel.execution = mode;
    config.kernel.worker_threads = 4;
    let mut kernel = KernelContext::new(config).unwrap();

    let steps = Arc::new(AtomicU64::new(0));
    let mut traces: Vec<Arc<Mutex<Vec<f64>>>> = Vec::new();
    let network = kernel.network_mut();
    for _ in 0..3 {
        let _ = network.add_plain(Ticker::new(&steps)).unwrap();
    }
    for pair in 0..pairs {
        let a = network.peek_next_id().unwrap();
        let b = a.next().unwrap();
        let offset = f64::from(pair);
        let left = GapNode::new(b, -65.0 + offset, 1.5, 0.4);
        let right = GapNode::new(a, -55.0 - offset, 0.5, 0.4);
        traces.push(Arc::clone(&left.trace));
        traces.push(Arc::clone(&right.trace));
        let _ = network.add_coupled(left).unwrap();
        let _ = network.add_coupled(right).unwrap();
    }

    let report = kernel.simulate(25.3, &mut NoOpSink).unwrap();
    let time_ms = kernel.status().simulation.time_ms;
    let traces = traces
        .iter()
        .map(|trace| trace.lock().unwrap().clone())
        .collect();
    Outcome {
        report,
        time_ms,
        steps: steps.load(Ordering::SeqCst),
        traces,
    }
}

#[test]
fn serial_and_parallel_runs_are_bit_identical() {
    let serial = run(ExecutionMode::Serial, 4);
    let parallel = run(ExecutionMode::Parallel, 4);

    assert_eq!(serial.report.end_reason, EndReason::Completed);
    assert_eq!(serial.report.steps_processed, parallel.report.steps_processed);
    assert_eq!(serial.report.slices_completed, parallel.report.slices_completed);
    assert_eq!(serial.report.preliminary_passes, parallel.report.preliminary_passes);
    assert_eq!(serial.time_ms.to_bits(), parallel.time_ms.to_bits());
    assert_eq!(serial.steps, parallel.steps);

    assert_eq!(serial.traces.len(), parallel.traces.len());
    for (s, p) in serial.traces.iter().zip(&parallel.traces) {
        let s_bits: Vec<u64> = s.iter().map(|v| v.to_bits()).collect();
        let p_bits: Vec<u64> = p.iter().map(|v| v.to_bits()).collect();
        assert_eq!(s_bits, p_bits);
    }
}

#[test]
fn repeated_runs_are_identical() {
    let first = run(ExecutionMode::Parallel, 2);
    let second = run(ExecutionMode::Parallel, 2);
    assert_eq!(first.traces, second.traces);
    assert_eq!(first.report.preliminary_passes, second.report.preliminary_passes);
}

#[test]
fn coupled_pairs_converge_towards_each_other() {
    let outcome = run(ExecutionMode::Serial, 1);
    assert_eq!(outcome.report.convergence_failures, 0);
    assert!(outcome.report.preliminary_passes >= outcome.report.slices_completed);

    let final_left = outcome.traces.first().and_then(|t| t.last()).copied().unwrap();
    let final_right = outcome.traces.get(1).and_then(|t| t.last()).copied().unwrap();
    // Started 10 mV apart; coupling pulls them together.
    assert!((final_left - final_right).abs() < 10.0);
}
