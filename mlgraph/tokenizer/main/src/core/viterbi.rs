//! Best-segmentation tokenization
//!
//! Forward pass: `score[j]` is the best total reaching byte offset `j`, where
//! a token of `n` bytes contributes `n²`. Backward pass: follow the recorded
//! `(id, start)` links from the end of the text back to offset 0.

use std::time::Instant;

use crate::api::error::{TokenizerError, TokenizerResult};
use crate::core::vocab::Vocab;

/// Tokenize `text`, considering candidates up to the vocabulary's longest token.
pub fn tokenize(vocab: &Vocab, text: &str, bos: bool) -> TokenizerResult<Vec<u32>> {
    tokenize_with(vocab, text, bos, vocab.max_token_len())
}

/// Tokenize `text`, considering candidates of at most `max_token_len` bytes.
///
/// Equal scores keep the candidate found first, so results are reproducible
/// for a given vocabulary. Fails with [`TokenizerError::NoSegmentation`] when
/// some part of the text is not covered by any vocabulary token.
pub fn tokenize_with(
    vocab: &Vocab,
    text: &str,
    bos: bool,
    max_token_len: usize,
) -> TokenizerResult<Vec<u32>> {
    let _t = if log::log_enabled!(log::Level::Trace) { Some(Instant::now()) } else { None };
    let len = text.len();

    let mut score: Vec<Option<u64>> = vec![None; len + 1];
    let mut prev: Vec<Option<(u32, usize)>> = vec![None; len + 1];
    score[0] = Some(0);

    for start in 0..len {
        let Some(base) = score[start] else { continue };
        for sub_len in 1..=max_token_len.min(len - start) {
            let end = start + sub_len;
            // candidates that split a multi-byte char never match
            let Some(id) = text.get(start..end).and_then(|piece| vocab.token_to_id(piece)) else {
                continue;
            };
            let candidate = base + (sub_len * sub_len) as u64;
            if score[end].map_or(true, |best| candidate > best) {
                score[end] = Some(candidate);
                prev[end] = Some((id, start));
            }
        }
    }

    if score[len].is_none() {
        let offset = score.iter().rposition(Option::is_some).unwrap_or(0);
        return Err(TokenizerError::NoSegmentation { offset });
    }

    let mut tokens = Vec::new();
    let mut end = len;
    while end > 0 {
        let (id, start) = prev[end].ok_or(TokenizerError::NoSegmentation { offset: end })?;
        tokens.push(id);
        end = start;
    }
    if bos {
        tokens.push(vocab.bos_id());
    }
    tokens.reverse();

    if let Some(t) = _t {
        log::trace!(
            "[perf] tokenize {} bytes -> {} tokens {:.3}ms",
            len,
            tokens.len(),
            t.elapsed().as_secs_f64() * 1000.0
        );
    }
    Ok(tokens)
}

/// The vocabulary string for one id.
pub fn token_to_str(vocab: &Vocab, id: u32) -> TokenizerResult<&str> {
    vocab.id_to_token(id).ok_or(TokenizerError::UnknownId(id))
}

/// Concatenate the strings of `ids`.
pub fn detokenize(vocab: &Vocab, ids: &[u32]) -> TokenizerResult<String> {
    ids.iter().try_fold(String::new(), |mut out, &id| {
        out.push_str(token_to_str(vocab, id)?);
        Ok(out)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vocab {
        Vocab::from_tokens([("a", 2), ("ab", 3), ("b", 4), ("abc", 5), ("c", 6)]).unwrap()
    }

    #[test]
    fn test_longest_match_preferred() {
        assert_eq!(tokenize(&vocab(), "ab", false).unwrap(), vec![3]);
        assert_eq!(tokenize(&vocab(), "abcab", false).unwrap(), vec![5, 3]);
    }

    #[test]
    fn test_squared_score_beats_greedy() {
        // "aaaa": "a"+"aaa" scores 10, "aa"+"aa" only 8
        let vocab = Vocab::from_tokens([("a", 1), ("aa", 2), ("aaa", 3)]).unwrap();
        assert_eq!(tokenize(&vocab, "aaaa", false).unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_ties_keep_first_found() {
        // "xyz": "x"+"yz" and "xy"+"z" both score 5; "x"+"yz" reaches offset 3 first
        let vocab = Vocab::from_tokens([("x", 10), ("y", 11), ("z", 12), ("xy", 13), ("yz", 14)])
            .unwrap();
        assert_eq!(tokenize(&vocab, "xyz", false).unwrap(), vec![10, 14]);
    }

    #[test]
    fn test_pinned_max_len_limits_candidates() {
        assert_eq!(tokenize_with(&vocab(), "abc", false, 1).unwrap(), vec![2, 4, 6]);
        assert_eq!(tokenize_with(&vocab(), "abc", false, 2).unwrap(), vec![3, 6]);
    }

    #[test]
    fn test_bos_prepended() {
        assert_eq!(tokenize(&vocab(), "ab", true).unwrap(), vec![1, 3]);
        let custom = vocab().with_bos_id(99);
        assert_eq!(tokenize(&custom, "", true).unwrap(), vec![99]);
    }

    #[test]
    fn test_dead_end_reports_offset() {
        assert_eq!(
            tokenize(&vocab(), "abzc", false),
            Err(TokenizerError::NoSegmentation { offset: 2 })
        );
        assert_eq!(
            tokenize(&Vocab::new(), "q", false),
            Err(TokenizerError::NoSegmentation { offset: 0 })
        );
    }

    #[test]
    fn test_multibyte_tokens() {
        let vocab = Vocab::from_tokens([("é", 1), ("t", 2), ("été", 3)]).unwrap();
        assert_eq!(tokenize(&vocab, "étét", false).unwrap(), vec![3, 2]);
    }

    #[test]
    fn test_unknown_id() {
        assert_eq!(token_to_str(&vocab(), 3).unwrap(), "ab");
        assert_eq!(detokenize(&vocab(), &[3, 42]), Err(TokenizerError::UnknownId(42)));
    }
}
