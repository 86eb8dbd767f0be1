use crate::api::error::{TensorError, TensorResult};
use crate::api::types::{DEFAULT_MAX_CONTEXTS, DEFAULT_MAX_NODES};
use std::time::Duration;

/// Runtime configuration shared by a [`ContextPool`](crate::ContextPool) and
/// every graph built from its contexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of worker threads used by `compute`.
    /// 0 means auto-detect (use all available cores).
    pub num_threads: usize,
    /// Maximum number of nodes (and, separately, leafs) per graph (default 4096).
    pub max_nodes: usize,
    /// Number of contexts the pool can hand out at once (default 64).
    pub max_contexts: usize,
    /// Number of released f32 buffers the pool keeps for reuse (default 64).
    pub buffer_cache: usize,
    /// Wall-clock budget for one graph computation, checked between phases.
    pub compute_timeout: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            max_nodes: DEFAULT_MAX_NODES,
            max_contexts: DEFAULT_MAX_CONTEXTS,
            buffer_cache: 64,
            compute_timeout: None,
        }
    }
}

impl RuntimeConfig {
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads,
            ..Self::default()
        }
    }

    /// Thread count with 0 mapped to the machine's available parallelism.
    pub fn resolved_threads(&self) -> usize {
        if self.num_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.num_threads
        }
    }

    /// Reject configurations that could never produce a usable pool or graph.
    pub fn validate(&self) -> TensorResult<()> {
        if self.max_contexts == 0 {
            return Err(TensorError::InvalidOperation(
                "max_contexts must be at least 1".into(),
            ));
        }
        if self.max_nodes == 0 {
            return Err(TensorError::InvalidOperation(
                "max_nodes must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Build the worker pool for one graph run.
    pub(crate) fn build_pool(n_threads: usize) -> TensorResult<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .thread_name(|i| format!("mlgraph-worker-{}", i))
            .build()
            .map_err(|e| TensorError::ThreadPool(format!("Failed to build rayon thread pool: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let config = RuntimeConfig::default();
        assert_eq!(config.num_threads, 0);
        assert_eq!(config.max_nodes, 4096);
        assert_eq!(config.max_contexts, 64);
        assert!(config.compute_timeout.is_none());
    }

    #[test]
    fn test_resolved_threads() {
        assert_eq!(RuntimeConfig::with_threads(3).resolved_threads(), 3);
        assert!(RuntimeConfig::default().resolved_threads() >= 1);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = RuntimeConfig {
            max_contexts: 0,
            ..RuntimeConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(RuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_build_pool() {
        let pool = RuntimeConfig::build_pool(2).unwrap();
        assert_eq!(pool.current_num_threads(), 2);
    }
}
