//! Text primitives - tokenization, vector similarity, token estimation
//!
//! Everything here is pure and deterministic; the engine's keyword path,
//! inverted index, and budget packing are all built on these functions.

mod similarity;
mod tokenize;

pub use similarity::cosine_similarity;
pub use tokenize::{estimate_tokens, tokenize, STOP_WORDS};
