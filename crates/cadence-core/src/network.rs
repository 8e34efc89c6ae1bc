//! The node registry and per-pass dispatch.
//!
//! [`Network`] maps node identity to capability variant and runs one pass
//! (update or preliminary) over every node. In
//! [`ExecutionMode::Parallel`] the nodes of a pass are spread across a
//! `rayon` pool; the call still returns only once every node is done, so
//! the end of a pass is a barrier for the caller.
//!
//! Results are gathered in node order regardless of mode. Together with the
//! fact that every node of a pass reads the same inputs, this makes serial
//! and parallel runs produce identical state.

use cadence_types::{NodeId, NodeKind, Resolution};
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::config::ExecutionMode;
use crate::kernel::ManagerInterface;
use crate::node::{
    CoupledDynamics, NodeCapability, NodeDynamics, NodeError, PreliminaryPass, SliceContext,
};
use crate::waveform::{Waveform, WaveformTable};

/// Errors raised by the network.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// A node collaborator failed.
    #[error("node {node} failed: {source}")]
    Node {
        /// The failing node.
        node: NodeId,
        /// The node's error.
        source: NodeError,
    },

    /// The worker pool could not be created.
    #[error("failed to build worker pool: {message}")]
    Pool {
        /// Description of the pool failure.
        message: String,
    },

    /// No more node identifiers are available.
    #[error("node identifier space exhausted")]
    IdsExhausted,
}

/// Counts reported by [`Network::status`](ManagerInterface::status).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NetworkStatus {
    /// Registered nodes.
    pub nodes: usize,
    /// Registered coupled nodes.
    pub coupled_nodes: usize,
    /// Whether passes run on a worker pool.
    pub parallel: bool,
    /// Worker threads in parallel mode (0 = global pool).
    pub worker_threads: usize,
}

/// Writable network options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkUpdate {
    /// Switch execution mode.
    pub execution: Option<ExecutionMode>,
    /// Resize the worker pool.
    pub worker_threads: Option<usize>,
}

struct NodeEntry {
    id: NodeId,
    capability: NodeCapability,
}

/// Registered nodes plus the execution mode used to dispatch passes.
pub struct Network {
    nodes: Vec<NodeEntry>,
    next_id: Option<NodeId>,
    mode: ExecutionMode,
    worker_threads: usize,
    pool: Option<rayon::ThreadPool>,
}

impl Network {
    /// An empty network.
    ///
    /// With `ExecutionMode::Parallel` and a non-zero `worker_threads` a
    /// dedicated pool is built; zero uses the global `rayon` pool.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Pool`] if the worker pool cannot be built.
    pub fn new(mode: ExecutionMode, worker_threads: usize) -> Result<Self, NetworkError> {
        Ok(Self {
            nodes: Vec::new(),
            next_id: Some(NodeId::new(1)),
            mode,
            worker_threads,
            pool: build_pool(mode, worker_threads)?,
        })
    }

    /// An empty network dispatching on the calling thread.
    pub const fn serial() -> Self {
        Self {
            nodes: Vec::new(),
            next_id: Some(NodeId::new(1)),
            mode: ExecutionMode::Serial,
            worker_threads: 0,
            pool: None,
        }
    }

    /// Register a node without instantaneous coupling.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::IdsExhausted`] if no identifier is left.
    pub fn add_plain(&mut self, node: impl NodeDynamics + 'static) -> Result<NodeId, NetworkError> {
        self.add(NodeCapability::Plain(Box::new(node)))
    }

    /// Register an instantaneously coupled node.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::IdsExhausted`] if no identifier is left.
    pub fn add_coupled(
        &mut self,
        node: impl CoupledDynamics + 'static,
    ) -> Result<NodeId, NetworkError> {
        self.add(NodeCapability::Coupled(Box::new(node)))
    }

    /// Register a node of either variant. Identifiers are sequential.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::IdsExhausted`] if no identifier is left.
    pub fn add(&mut self, capability: NodeCapability) -> Result<NodeId, NetworkError> {
        let id = self.next_id.ok_or(NetworkError::IdsExhausted)?;
        self.next_id = id.next();
        self.nodes.push(NodeEntry { id, capability });
        Ok(id)
    }

    /// The identifier the next registered node will get.
    pub const fn peek_next_id(&self) -> Option<NodeId> {
        self.next_id
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node is registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of coupled nodes.
    pub fn coupled_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|entry| entry.capability.kind() == NodeKind::Coupled)
            .count()
    }

    /// Identifiers of all nodes, in registration order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().map(|entry| entry.id)
    }

    /// Capability variant of `id`.
    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.get(id).map(NodeCapability::kind)
    }

    /// The node registered as `id`.
    pub fn get(&self, id: NodeId) -> Option<&NodeCapability> {
        self.position(id)
            .and_then(|index| self.nodes.get(index))
            .map(|entry| &entry.capability)
    }

    /// The node registered as `id`, mutably.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut NodeCapability> {
        self.position(id)
            .and_then(|index| self.nodes.get_mut(index))
            .map(|entry| &mut entry.capability)
    }

    /// Current execution mode.
    pub const fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }

    fn position(&self, id: NodeId) -> Option<usize> {
        // Entries are pushed with increasing ids, so the vector is sorted.
        self.nodes.binary_search_by_key(&id, |entry| entry.id).ok()
    }

    /// Call every node's `prepare` hook.
    pub(crate) fn prepare_all(&mut self, resolution: Resolution) -> Result<(), NetworkError> {
        for entry in &mut self.nodes {
            entry
                .capability
                .prepare(resolution)
                .map_err(|source| NetworkError::Node {
                    node: entry.id,
                    source,
                })?;
        }
        Ok(())
    }

    /// Advance every node across the window of `ctx`.
    pub(crate) fn update_all(&mut self, ctx: &SliceContext) -> Result<(), NetworkError> {
        let results = self.dispatch(|entry| {
            entry
                .capability
                .update(ctx)
                .map_err(|source| NetworkError::Node {
                    node: entry.id,
                    source,
                })
        });
        first_error(results).map(|_| ())
    }

    /// Flat waveforms at every coupled node's slice-initial value.
    pub(crate) fn initial_waveforms(&self) -> WaveformTable {
        let mut table = WaveformTable::new();
        for entry in &self.nodes {
            if let Some(node) = entry.capability.as_coupled() {
                table.insert(entry.id, Waveform::constant(node.slice_initial_value()));
            }
        }
        table
    }

    /// One preliminary pass over every coupled node, in node order.
    pub(crate) fn preliminary_pass(
        &mut self,
        ctx: &SliceContext,
        inputs: &WaveformTable,
        tolerance: f64,
    ) -> Result<Vec<(NodeId, PreliminaryPass)>, NetworkError> {
        let results = self.dispatch(|entry| {
            let id = entry.id;
            entry
                .capability
                .as_coupled_mut()
                .map(|node| {
                    node.preliminary_update(ctx, inputs, tolerance)
                        .map(|pass| (id, pass))
                        .map_err(|source| NetworkError::Node { node: id, source })
                })
                .transpose()
        });
        first_error(results).map(|passes| passes.into_iter().flatten().collect())
    }

    /// Call every node's `post_run` hook.
    pub(crate) fn post_run_all(&mut self) {
        for entry in &mut self.nodes {
            entry.capability.post_run();
        }
    }

    /// Run `op` on every node according to the execution mode and return
    /// the per-node results in node order.
    fn dispatch<T, F>(&mut self, op: F) -> Vec<Result<T, NetworkError>>
    where
        T: Send,
        F: Fn(&mut NodeEntry) -> Result<T, NetworkError> + Sync,
    {
        match (self.mode, &self.pool) {
            (ExecutionMode::Serial, _) => {
                let mut results = Vec::with_capacity(self.nodes.len());
                for entry in &mut self.nodes {
                    let result = op(entry);
                    let failed = result.is_err();
                    results.push(result);
                    if failed {
                        break;
                    }
                }
                results
            }
            (ExecutionMode::Parallel, Some(pool)) => {
                let nodes = &mut self.nodes;
                pool.install(|| nodes.par_iter_mut().map(&op).collect())
            }
            (ExecutionMode::Parallel, None) => self.nodes.par_iter_mut().map(&op).collect(),
        }
    }
}

impl core::fmt::Debug for Network {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Network")
            .field("nodes", &self.nodes.len())
            .field("coupled", &self.coupled_count())
            .field("mode", &self.mode)
            .field("worker_threads", &self.worker_threads)
            .finish_non_exhaustive()
    }
}

impl ManagerInterface for Network {
    type Status = NetworkStatus;
    type StatusUpdate = NetworkUpdate;
    type Error = NetworkError;

    fn initialize(&mut self) {
        debug!(
            nodes = self.nodes.len(),
            mode = ?self.mode,
            worker_threads = self.worker_threads,
            "Network initialized"
        );
    }

    fn finalize(&mut self) {
        debug!(nodes = self.nodes.len(), "Network finalized, dropping nodes");
        self.nodes.clear();
        self.next_id = Some(NodeId::new(1));
    }

    fn status(&self) -> NetworkStatus {
        NetworkStatus {
            nodes: self.nodes.len(),
            coupled_nodes: self.coupled_count(),
            parallel: self.mode == ExecutionMode::Parallel,
            worker_threads: self.worker_threads,
        }
    }

    fn set_status(&mut self, update: &NetworkUpdate) -> Result<(), NetworkError> {
        let mode = update.execution.unwrap_or(self.mode);
        let worker_threads = update.worker_threads.unwrap_or(self.worker_threads);
        if mode == self.mode && worker_threads == self.worker_threads {
            return Ok(());
        }
        let pool = build_pool(mode, worker_threads)?;
        self.mode = mode;
        self.worker_threads = worker_threads;
        self.pool = pool;
        Ok(())
    }
}

fn build_pool(
    mode: ExecutionMode,
    worker_threads: usize,
) -> Result<Option<rayon::ThreadPool>, NetworkError> {
    if mode == ExecutionMode::Serial || worker_threads == 0 {
        return Ok(None);
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(worker_threads)
        .thread_name(|index| format!("cadence-worker-{index}"))
        .build()
        .map(Some)
        .map_err(|e| NetworkError::Pool {
            message: e.to_string(),
        })
}

/// Collect per-node results, surfacing the error of the lowest node.
fn first_error<T>(results: Vec<Result<T, NetworkError>>) -> Result<Vec<T>, NetworkError> {
    results.into_iter().collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cadence_types::Steps;

    use super::*;

    struct Accumulator {
        total: u64,
    }

    impl NodeDynamics for Accumulator {
        fn update(&mut self, ctx: &SliceContext) -> Result<(), NodeError> {
            self.total = self.total.saturating_add(ctx.steps());
            Ok(())
        }
    }

    struct Failing;

    impl NodeDynamics for Failing {
        fn update(&mut self, _ctx: &SliceContext) -> Result<(), NodeError> {
            Err(NodeError::dynamics(std::io::Error::other("boom")))
        }
    }

    struct Flat(f64);

    impl NodeDynamics for Flat {
        fn update(&mut self, _ctx: &SliceContext) -> Result<(), NodeError> {
            Ok(())
        }
    }

    impl CoupledDynamics for Flat {
        fn slice_initial_value(&self) -> f64 {
            self.0
        }

        fn preliminary_update(
            &mut self,
            ctx: &SliceContext,
            _inputs: &WaveformTable,
            _tolerance: f64,
        ) -> Result<PreliminaryPass, NodeError> {
            Ok(PreliminaryPass {
                converged: true,
                samples: vec![self.0; usize::try_from(ctx.sample_count()).unwrap()],
            })
        }
    }

    fn ctx() -> SliceContext {
        SliceContext {
            origin: Steps::ZERO,
            from_step: 0,
            to_step: 5,
            slice_index: 0,
            resolution: Resolution::default(),
        }
    }

    #[test]
    fn ids_are_sequential_from_one() {
        let mut network = Network::serial();
        let a = network.add_plain(Accumulator { total: 0 }).unwrap();
        let b = network.add_coupled(Flat(1.0)).unwrap();
        assert_eq!(a, NodeId::new(1));
        assert_eq!(b, NodeId::new(2));
        assert_eq!(network.ids().collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(network.kind(b), Some(NodeKind::Coupled));
        assert_eq!(network.coupled_count(), 1);
        assert!(network.get(NodeId::new(9)).is_none());
    }

    #[test]
    fn update_error_names_the_node() {
        let mut network = Network::serial();
        let _ = network.add_plain(Accumulator { total: 0 }).unwrap();
        let bad = network.add_plain(Failing).unwrap();
        let err = network.update_all(&ctx()).unwrap_err();
        assert!(matches!(err, NetworkError::Node { node, .. } if node == bad));
    }

    #[test]
    fn parallel_update_reports_lowest_failing_node() {
        let mut network = Network::new(ExecutionMode::Parallel, 2).unwrap();
        let first = network.add_plain(Failing).unwrap();
        let _ = network.add_plain(Failing).unwrap();
        let err = network.update_all(&ctx()).unwrap_err();
        assert!(matches!(err, NetworkError::Node { node, .. } if node == first));
    }

    #[test]
    fn preliminary_pass_only_touches_coupled_nodes() {
        let mut network = Network::serial();
        let _ = network.add_plain(Accumulator { total: 0 }).unwrap();
        let coupled = network.add_coupled(Flat(-2.0)).unwrap();
        let inputs = network.initial_waveforms();
        assert_eq!(inputs.len(), 1);
        let passes = network.preliminary_pass(&ctx(), &inputs, 1e-6).unwrap();
        assert_eq!(passes.len(), 1);
        let (id, pass) = passes.first().unwrap();
        assert_eq!(*id, coupled);
        assert_eq!(pass.samples.len(), 6);
    }

    #[test]
    fn finalize_drops_nodes() {
        let mut network = Network::serial();
        let _ = network.add_plain(Accumulator { total: 0 }).unwrap();
        network.finalize();
        assert!(network.is_empty());
        assert_eq!(network.peek_next_id(), Some(NodeId::new(1)));
    }

    #[test]
    fn set_status_switches_execution_mode() {
        let mut network = Network::serial();
        network
            .set_status(&NetworkUpdate {
                execution: Some(ExecutionMode::Parallel),
                worker_threads: Some(2),
            })
            .unwrap();
        let status = network.status();
        assert!(status.parallel);
        assert_eq!(status.worker_threads, 2);
        assert_eq!(network.execution_mode(), ExecutionMode::Parallel);
    }
}
