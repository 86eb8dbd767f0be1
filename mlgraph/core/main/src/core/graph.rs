//! Forward graph construction.
//!
//! A [`Graph`] lists every tensor reachable from its roots exactly once:
//! leafs (no op and no gradient slot) and nodes (everything else). Nodes are
//! stored in post-order, so operands always precede the nodes consuming them.

use crate::api::error::{TensorError, TensorResult};
use crate::api::types::{Op, TensorId};
use crate::core::context::Context;
use crate::core::runtime::RuntimeConfig;
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Graph {
    pub(crate) nodes: Vec<TensorId>,
    pub(crate) grads: Vec<Option<TensorId>>,
    pub(crate) leafs: Vec<TensorId>,
    pub(crate) n_threads: usize,
    pub(crate) capacity: usize,
    pub(crate) work: Option<TensorId>,
    pub(crate) work_size: usize,
    pub(crate) timeout: Option<Duration>,
    visited: HashSet<TensorId>,
}

impl Graph {
    /// Empty graph sized and threaded according to `config`.
    pub fn new(config: &RuntimeConfig) -> Self {
        let mut graph = Self::with_capacity(config.max_nodes, config.resolved_threads());
        graph.timeout = config.compute_timeout;
        graph
    }

    pub fn with_capacity(capacity: usize, n_threads: usize) -> Self {
        Self {
            nodes: Vec::new(),
            grads: Vec::new(),
            leafs: Vec::new(),
            n_threads: n_threads.max(1),
            capacity,
            work: None,
            work_size: 0,
            timeout: None,
            visited: HashSet::new(),
        }
    }

    pub fn nodes(&self) -> &[TensorId] {
        &self.nodes
    }

    /// Gradient slot of each node at the time it was added (parallel to `nodes`).
    pub fn grads(&self) -> &[Option<TensorId>] {
        &self.grads
    }

    pub fn leafs(&self) -> &[TensorId] {
        &self.leafs
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_leafs(&self) -> usize {
        self.leafs.len()
    }

    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    pub fn set_n_threads(&mut self, n_threads: usize) {
        self.n_threads = n_threads.max(1);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Scratch tensor reserved by the last `compute` run, if any.
    pub fn work(&self) -> Option<TensorId> {
        self.work
    }

    /// Size in f32 elements of the scratch space needed by the last run.
    pub fn work_size(&self) -> usize {
        self.work_size
    }

    pub fn contains(&self, id: TensorId) -> bool {
        self.visited.contains(&id)
    }

    /// The last node added, which is the root of the most recent expansion.
    pub fn root(&self) -> Option<TensorId> {
        self.nodes.last().copied()
    }

    /// Append everything reachable from `root` that is not already present.
    ///
    /// Operands are visited before the tensors that use them (src0, src1,
    /// then the auxiliary slots), with an explicit stack so deep chains do
    /// not exhaust the call stack.
    pub fn build_forward_expand(&mut self, ctx: &Context, root: TensorId) -> TensorResult<()> {
        let n0 = self.nodes.len();
        let mut stack = vec![(root, false)];

        while let Some((id, expanded)) = stack.pop() {
            if self.contains(id) {
                continue;
            }
            let tensor = ctx.tensor(id)?;
            if expanded {
                self.append(id, tensor.op, tensor.grad)?;
                continue;
            }
            stack.push((id, true));
            for operand in tensor.operands().into_iter().rev() {
                if !self.contains(operand) {
                    stack.push((operand, false));
                }
            }
        }

        let added = self.nodes.len() - n0;
        debug_assert!(added == 0 || self.nodes.last() == Some(&root));
        log::debug!(
            "build_forward_expand: {} new nodes (nodes={}, leafs={})",
            added,
            self.nodes.len(),
            self.leafs.len()
        );
        Ok(())
    }

    fn append(&mut self, id: TensorId, op: Op, grad: Option<TensorId>) -> TensorResult<()> {
        if op == Op::None && grad.is_none() {
            if self.leafs.len() >= self.capacity {
                return Err(TensorError::GraphCapacityExceeded { capacity: self.capacity });
            }
            self.leafs.push(id);
        } else {
            if self.nodes.len() >= self.capacity {
                return Err(TensorError::GraphCapacityExceeded { capacity: self.capacity });
            }
            self.nodes.push(id);
            self.grads.push(grad);
        }
        self.visited.insert(id);
        Ok(())
    }

    /// Zero the gradient slot of every node, ready for a fresh backward run.
    pub fn reset(&self, ctx: &mut Context) -> TensorResult<()> {
        for &node in &self.nodes {
            if let Some(grad) = ctx.tensor(node)?.grad {
                ctx.set_f32(grad, 0.0)?;
            }
        }
        Ok(())
    }

    /// Log every node and leaf at debug level.
    pub fn dump(&self, ctx: &Context) -> TensorResult<()> {
        log::debug!("graph: {} nodes, {} leafs", self.nodes.len(), self.leafs.len());
        for (i, &id) in self.nodes.iter().enumerate() {
            let t = ctx.tensor(id)?;
            log::debug!(
                "  node {:3}: {} {:>12} {:?} tasks={}{}",
                i,
                id,
                t.op.name(),
                t.ne,
                t.n_tasks,
                if t.is_param { " param" } else if t.grad.is_some() { " grad" } else { "" }
            );
        }
        for (i, &id) in self.leafs.iter().enumerate() {
            let t = ctx.tensor(id)?;
            log::debug!("  leaf {:3}: {} {:?} {}", i, id, t.ne, t.name);
        }
        Ok(())
    }
}

/// Graph of everything `root` depends on, configured from the context.
pub fn build_forward(ctx: &Context, root: TensorId) -> TensorResult<Graph> {
    let mut graph = Graph::new(ctx.config());
    graph.build_forward_expand(ctx, root)?;
    Ok(graph)
}

/// Merge the dependencies of `root` into an existing graph.
pub fn build_forward_expand(graph: &mut Graph, ctx: &Context, root: TensorId) -> TensorResult<()> {
    graph.build_forward_expand(ctx, root)
}
