pub type TokenizerResult<T> = Result<T, TokenizerError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenizerError {
    #[error("No segmentation: no vocabulary token continues from byte offset {offset}")]
    NoSegmentation { offset: usize },

    #[error("Unknown token id: {0}")]
    UnknownId(u32),

    #[error("Duplicate token in vocabulary: {0:?}")]
    DuplicateToken(String),

    #[error("Duplicate token id in vocabulary: {0}")]
    DuplicateId(u32),
}
