//! # mlgraph-quant
//!
//! 4-bit block quantization used by mlgraph tensors.
//!
//! Two formats are supported, both grouping 32 elements per block:
//!
//! - `Q4_0`: one f16 scale, values reconstructed as `d * (q - 8)`
//! - `Q4_1`: an f16 scale and an f16 minimum, values reconstructed as `d * q + m`
//!
//! ## Example
//!
//! ```rust
//! use mlgraph_quant::{quantize_q4_0, dequantize_q4_0};
//!
//! let data: Vec<f32> = (0..32).map(|i| i as f32 / 4.0).collect();
//! let packed = quantize_q4_0(&data).unwrap();
//! let restored = dequantize_q4_0(&packed, 32).unwrap();
//! assert_eq!(restored.len(), 32);
//! ```

pub mod api;
mod core;
mod saf;

pub use saf::*;
