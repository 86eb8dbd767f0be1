//! Error types for graph construction and execution

use crate::api::types::DType;
use mlgraph_quant::QuantError;
use thiserror::Error;

/// Result type for tensor operations
pub type TensorResult<T> = Result<T, TensorError>;

/// Errors that can occur while building or computing a tensor graph
#[derive(Error, Debug)]
pub enum TensorError {
    #[error("Shape mismatch in {op}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        op: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Cannot multiply {a:?} by {b:?}: shared axis and batch axes must match")]
    MatmulShapeMismatch { a: [usize; 4], b: [usize; 4] },

    #[error("Unsupported element type {dtype:?} for {op}")]
    UnsupportedType { op: &'static str, dtype: DType },

    #[error("All {capacity} contexts are in use")]
    ArenaExhausted { capacity: usize },

    #[error("Context out of memory: needed {needed} bytes, {available} available")]
    OutOfMemory { needed: usize, available: usize },

    #[error("Graph capacity of {capacity} tensors exceeded")]
    GraphCapacityExceeded { capacity: usize },

    #[error("No gradient rule for {op}")]
    UnimplementedGradient { op: &'static str },

    #[error("In-place {op} on a tensor that carries a gradient")]
    InplaceOnGradient { op: &'static str },

    #[error("Invalid permutation {0:?}")]
    InvalidPermutation([usize; 4]),

    #[error("Index out of bounds: {index} >= {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("{0} requires a contiguous tensor")]
    NotContiguous(&'static str),

    #[error("Graph computation exceeded its {0:?} budget")]
    Timeout(std::time::Duration),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    #[error("Quantization error: {0}")]
    Quant(#[from] QuantError),
}
