//! Facade re-exports for mlgraph-quant

pub use crate::api::error::*;
pub use crate::api::types::*;
pub use crate::core::quantize::{
    dequantize_q4_0, dequantize_q4_1, quantize_q4_0, quantize_q4_1,
};
