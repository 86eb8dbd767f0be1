//! # mlgraph-core
//!
//! A small tensor graph engine in the style of a ggml runtime.
//!
//! Tensors live inside a [`Context`] acquired from a [`ContextPool`] and are
//! addressed by [`TensorId`]. Calling an op only records it; evaluation
//! happens when a [`Graph`] built from the result is passed to [`compute`].
//!
//! ## Features
//!
//! - Up to 4-D tensors in f32, i32 and 4-bit block-quantized storage
//! - Zero-copy views: reshape, permute, transpose and windows
//! - Element-wise math, normalization, matmul, softmax, rope, 1-D convolution
//!   and fused attention/feed-forward kernels
//! - Reverse-mode gradients for the arithmetic core
//! - Three-phase (init/compute/finalize) multi-threaded execution on rayon
//!
//! ## Example
//!
//! ```rust
//! use mlgraph_core::{build_forward, compute, ContextParams, ContextPool};
//!
//! let pool = ContextPool::default();
//! let mut ctx = pool.acquire(ContextParams::default()).unwrap();
//! let a = ctx.from_f32(&[4], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
//! let b = ctx.new_f32(2.0).unwrap();
//! let y = ctx.scale(a, b).unwrap();
//!
//! let mut graph = build_forward(&ctx, y).unwrap();
//! compute(&mut ctx, &mut graph).unwrap();
//! assert_eq!(ctx.data_f32(y).unwrap(), vec![2.0, 4.0, 6.0, 8.0]);
//! ```

pub mod api;
mod core;
mod saf;

pub use saf::*;
