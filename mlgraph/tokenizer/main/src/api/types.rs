/// Beginning-of-sequence id used when a vocabulary does not override it.
pub const BOS_ID: u32 = 1;
/// Conventional end-of-sequence id, for [`Vocab::with_eos_id`](crate::Vocab::with_eos_id).
pub const EOS_ID: u32 = 2;
/// Longest candidate match, in bytes, used by LLaMA-style vocabularies.
pub const DEFAULT_MAX_TOKEN_LEN: usize = 18;

/// Options for [`SentencePieceTokenizer`](crate::SentencePieceTokenizer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizerConfig {
    /// Prepend the vocabulary's BOS id to every encoded sequence.
    pub add_bos: bool,
    /// Longest candidate match in bytes. `None` uses the longest vocabulary entry.
    pub max_token_len: Option<usize>,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            add_bos: true,
            max_token_len: None,
        }
    }
}
