pub mod sentencepiece;
pub mod viterbi;
pub mod vocab;
