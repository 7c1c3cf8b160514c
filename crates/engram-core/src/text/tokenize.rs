//! Deterministic tokenizer and token estimator
//!
//! The tokenizer feeds the inverted index and the keyword search fallback,
//! so both sides must agree on its output exactly.

use std::collections::HashSet;

// ============================================================================
// STOP WORDS
// ============================================================================

/// English stop words excluded from the token index.
///
/// Articles, common auxiliaries, pronouns, and a few high-frequency
/// prepositions. Single-character tokens are dropped separately.
pub const STOP_WORDS: &[&str] = &[
    "the", "is", "at", "which", "on", "and", "an", "as", "are", "was", "were", "been", "be",
    "have", "has", "had", "do", "does", "did", "will", "would", "could", "should", "may",
    "might", "must", "shall", "can", "this", "that", "these", "those", "it", "its", "to",
    "of", "in", "for", "with", "by", "from", "about", "into", "through", "during", "before",
    "after", "above", "below", "up", "down", "out", "off", "over", "under", "again", "then",
    "once", "here", "there", "all", "any", "both", "each",
];

fn stop_word_set() -> &'static HashSet<&'static str> {
    use std::sync::OnceLock;
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOP_WORDS.iter().copied().collect())
}

// ============================================================================
// TOKENIZER
// ============================================================================

/// Tokenize text for indexing and keyword scoring.
///
/// Lowercases, maps every character outside `[a-z0-9 ]` to a space, splits
/// on whitespace runs, drops tokens of length <= 1 and stop words, and
/// deduplicates preserving first-occurrence order.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                ' '
            }
        })
        .collect();

    let stops = stop_word_set();
    let mut seen = HashSet::new();
    let mut tokens = Vec::new();
    for tok in cleaned.split_whitespace() {
        if tok.len() <= 1 || stops.contains(tok) {
            continue;
        }
        if seen.insert(tok.to_string()) {
            tokens.push(tok.to_string());
        }
    }
    tokens
}

// ============================================================================
// TOKEN ESTIMATION
// ============================================================================

/// Rough LLM token estimate: one token per 4 characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

// ============================================================================
// TESTS
// ============================================================================
