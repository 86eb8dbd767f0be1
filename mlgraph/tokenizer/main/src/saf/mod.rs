//! Facade re-exports for mlgraph-tokenizer

pub use crate::api::error::{TokenizerError, TokenizerResult};
pub use crate::api::types::*;
pub use crate::core::sentencepiece::SentencePieceTokenizer;
pub use crate::core::viterbi::{detokenize, token_to_str, tokenize, tokenize_with};
pub use crate::core::vocab::Vocab;
pub use crate::spi::contract::Tokenizer;
