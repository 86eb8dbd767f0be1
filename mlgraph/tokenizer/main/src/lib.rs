//! # mlgraph-tokenizer
//!
//! Text to token-id conversion over a fixed vocabulary.
//!
//! Segmentation is a dynamic program over byte offsets: every vocabulary
//! token matching at an offset scores the square of its byte length, and the
//! segmentation with the highest total wins. Long matches are therefore
//! preferred over runs of short ones.
//!
//! ## Example
//!
//! ```rust
//! use mlgraph_tokenizer::{tokenize, detokenize, Vocab};
//!
//! let vocab = Vocab::from_tokens([("a", 2), ("ab", 3), ("b", 4)]).unwrap();
//! let ids = tokenize(&vocab, "ab", false).unwrap();
//! assert_eq!(ids, vec![3]);
//! assert_eq!(detokenize(&vocab, &ids).unwrap(), "ab");
//! ```

pub mod api;
mod core;
mod saf;
pub mod spi;

pub use saf::*;
