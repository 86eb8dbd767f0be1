use thiserror::Error;

pub type QuantResult<T> = Result<T, QuantError>;

#[derive(Debug, Error)]
pub enum QuantError {
    #[error("Block alignment error: {0}")]
    BlockAlignment(String),

    #[error("Shape mismatch: expected {expected} bytes, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
}
