//! Context slots and buffer recycling.
//!
//! A [`ContextPool`] owns a fixed table of context slots. Acquiring marks the
//! first free slot in use; dropping (or explicitly releasing) the returned
//! [`Context`] frees it and hands its f32 buffers back to a shared
//! [`BufferPool`] so the next context can reuse them.

use crate::api::error::{TensorError, TensorResult};
use crate::api::types::ContextParams;
use crate::core::context::Context;
use crate::core::runtime::RuntimeConfig;
use std::sync::{Arc, Mutex, MutexGuard};

/// A pool of reusable f32 buffers for tensor storage.
pub(crate) struct BufferPool {
    buffers: Vec<Vec<f32>>,
    capacity: usize,
}

impl BufferPool {
    /// Create a new pool with the given maximum number of cached buffers.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            buffers: Vec::new(),
            capacity,
        }
    }

    /// Get a zeroed buffer of exactly `size` elements.
    ///
    /// Reuses the smallest cached buffer whose capacity fits, otherwise allocates.
    pub(crate) fn get(&mut self, size: usize) -> Vec<f32> {
        let best = self
            .buffers
            .iter()
            .enumerate()
            .filter(|(_, buf)| buf.capacity() >= size)
            .min_by_key(|(_, buf)| buf.capacity())
            .map(|(i, _)| i);

        match best {
            Some(idx) => {
                let mut buf = self.buffers.swap_remove(idx);
                buf.clear();
                buf.resize(size, 0.0);
                buf
            }
            None => vec![0.0; size],
        }
    }

    /// Return a buffer for future reuse. Dropped when the pool is full.
    pub(crate) fn put(&mut self, buf: Vec<f32>) {
        if self.buffers.len() < self.capacity && buf.capacity() > 0 {
            self.buffers.push(buf);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.buffers.len()
    }
}

pub(crate) struct PoolState {
    in_use: Vec<bool>,
    buffers: BufferPool,
}

fn lock(state: &Mutex<PoolState>) -> TensorResult<MutexGuard<'_, PoolState>> {
    state
        .lock()
        .map_err(|_| TensorError::InvalidOperation("context pool lock poisoned".into()))
}

/// Bounded table of reusable contexts.
///
/// Cloning yields another handle to the same table.
#[derive(Clone)]
pub struct ContextPool {
    state: Arc<Mutex<PoolState>>,
    config: Arc<RuntimeConfig>,
}

impl ContextPool {
    pub fn new(config: RuntimeConfig) -> TensorResult<Self> {
        config.validate()?;
        let state = PoolState {
            in_use: vec![false; config.max_contexts],
            buffers: BufferPool::new(config.buffer_cache),
        };
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            config: Arc::new(config),
        })
    }

    /// Claim the first free slot.
    ///
    /// Fails with [`TensorError::ArenaExhausted`] when every slot is taken.
    pub fn acquire(&self, params: ContextParams) -> TensorResult<Context> {
        let slot = {
            let mut state = lock(&self.state)?;
            let slot = state
                .in_use
                .iter()
                .position(|used| !used)
                .ok_or(TensorError::ArenaExhausted {
                    capacity: self.config.max_contexts,
                })?;
            state.in_use[slot] = true;
            slot
        };
        log::debug!("context {} acquired (mem_size={})", slot, params.mem_size);

        let lease = Lease {
            state: Arc::clone(&self.state),
            slot,
        };
        Ok(Context::new(lease, (*self.config).clone(), params))
    }

    /// Number of slots currently held.
    pub fn in_use(&self) -> usize {
        lock(&self.state)
            .map(|state| state.in_use.iter().filter(|&&used| used).count())
            .unwrap_or(0)
    }

    pub fn capacity(&self) -> usize {
        self.config.max_contexts
    }

    /// Number of released buffers waiting for reuse.
    pub fn cached_buffers(&self) -> usize {
        lock(&self.state).map(|state| state.buffers.len()).unwrap_or(0)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

impl Default for ContextPool {
    fn default() -> Self {
        let config = RuntimeConfig::default();
        let state = PoolState {
            in_use: vec![false; config.max_contexts],
            buffers: BufferPool::new(config.buffer_cache),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            config: Arc::new(config),
        }
    }
}

/// A held slot in a [`ContextPool`].
pub(crate) struct Lease {
    state: Arc<Mutex<PoolState>>,
    slot: usize,
}

impl Lease {
    pub(crate) fn slot(&self) -> usize {
        self.slot
    }

    /// Allocate a zeroed f32 buffer, reusing a released one when possible.
    pub(crate) fn alloc_f32(&self, size: usize) -> Vec<f32> {
        match self.state.lock() {
            Ok(mut state) => state.buffers.get(size),
            Err(_) => vec![0.0; size],
        }
    }

    /// Free the slot and recycle buffers.
    pub(crate) fn release(&self, buffers: impl IntoIterator<Item = Vec<f32>>) {
        if let Ok(mut state) = self.state.lock() {
            for buf in buffers {
                state.buffers.put(buf);
            }
            if let Some(used) = state.in_use.get_mut(self.slot) {
                *used = false;
            }
            log::debug!("context {} released", self.slot);
        }
    }
}
