//! Vocabulary-backed tokenizer

use std::sync::Arc;

use crate::api::error::TokenizerResult;
use crate::api::types::TokenizerConfig;
use crate::core::viterbi::{detokenize, tokenize_with};
use crate::core::vocab::Vocab;
use crate::spi::contract::Tokenizer;

/// Best-segmentation tokenizer over a shared [`Vocab`].
#[derive(Debug, Clone)]
pub struct SentencePieceTokenizer {
    vocab: Arc<Vocab>,
    config: TokenizerConfig,
}

impl SentencePieceTokenizer {
    pub fn new(vocab: Arc<Vocab>) -> Self {
        Self::with_config(vocab, TokenizerConfig::default())
    }

    pub fn with_config(vocab: Arc<Vocab>, config: TokenizerConfig) -> Self {
        Self { vocab, config }
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    pub fn config(&self) -> &TokenizerConfig {
        &self.config
    }
}

impl Tokenizer for SentencePieceTokenizer {
    fn encode(&self, text: &str) -> TokenizerResult<Vec<u32>> {
        let max_len = self.config.max_token_len.unwrap_or_else(|| self.vocab.max_token_len());
        tokenize_with(&self.vocab, text, self.config.add_bos, max_len)
    }

    /// Drops the leading BOS that `encode` adds and a trailing end marker
    /// declared with [`Vocab::with_eos_id`]. Any other id decodes to its
    /// vocabulary string, even when it equals a conventional special id.
    fn decode(&self, tokens: &[u32]) -> TokenizerResult<String> {
        let mut ids = tokens;
        if self.config.add_bos {
            if let Some((&first, rest)) = ids.split_first() {
                if first == self.vocab.bos_id() {
                    ids = rest;
                }
            }
        }
        if let Some(eos) = self.vocab.eos_id() {
            if let Some((&last, rest)) = ids.split_last() {
                if last == eos {
                    ids = rest;
                }
            }
        }
        detokenize(&self.vocab, ids)
    }

    fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.vocab.token_to_id(token)
    }
}
