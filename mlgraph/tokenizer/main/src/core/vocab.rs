//! Bidirectional token ↔ id map

use std::collections::HashMap;

use crate::api::error::{TokenizerError, TokenizerResult};
use crate::api::types::BOS_ID;

/// A vocabulary with unique tokens and unique ids.
///
/// Built once, then only read. All lookups take `&self`, so a `Vocab` can be
/// shared across threads behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Vocab {
    token_to_id: HashMap<String, u32>,
    id_to_token: HashMap<u32, String>,
    max_token_len: usize,
    bos_id: u32,
    eos_id: Option<u32>,
}

impl Vocab {
    pub fn new() -> Self {
        Self {
            token_to_id: HashMap::new(),
            id_to_token: HashMap::new(),
            max_token_len: 0,
            bos_id: BOS_ID,
            eos_id: None,
        }
    }

    /// Override the id prepended when tokenizing with BOS.
    pub fn with_bos_id(mut self, bos_id: u32) -> Self {
        self.bos_id = bos_id;
        self
    }

    /// Declare the end-of-sequence id that decoding drops from the tail.
    pub fn with_eos_id(mut self, eos_id: u32) -> Self {
        self.eos_id = Some(eos_id);
        self
    }

    /// Add one entry. Fails if either the token or the id is already present.
    pub fn insert(&mut self, token: impl Into<String>, id: u32) -> TokenizerResult<()> {
        let token = token.into();
        if self.token_to_id.contains_key(&token) {
            return Err(TokenizerError::DuplicateToken(token));
        }
        if self.id_to_token.contains_key(&id) {
            return Err(TokenizerError::DuplicateId(id));
        }
        self.max_token_len = self.max_token_len.max(token.len());
        self.token_to_id.insert(token.clone(), id);
        self.id_to_token.insert(id, token);
        Ok(())
    }

    /// Build from explicit `(token, id)` pairs.
    pub fn from_tokens<I, S>(entries: I) -> TokenizerResult<Self>
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut vocab = Self::new();
        for (token, id) in entries {
            vocab.insert(token, id)?;
        }
        log::debug!("vocab built: {} tokens, longest {} bytes", vocab.len(), vocab.max_token_len);
        Ok(vocab)
    }

    /// Build from a word list where each word's id is its position.
    pub fn from_word_list<I, S>(words: I) -> TokenizerResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_tokens(words.into_iter().zip(0u32..))
    }

    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }

    pub fn id_to_token(&self, id: u32) -> Option<&str> {
        self.id_to_token.get(&id).map(String::as_str)
    }

    /// Byte length of the longest token.
    pub fn max_token_len(&self) -> usize {
        self.max_token_len
    }

    pub fn bos_id(&self) -> u32 {
        self.bos_id
    }

    pub fn eos_id(&self) -> Option<u32> {
        self.eos_id
    }

    pub fn len(&self) -> usize {
        self.token_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_to_id.is_empty()
    }
}

impl Default for Vocab {
    fn default() -> Self {
        Self::new()
    }
}
