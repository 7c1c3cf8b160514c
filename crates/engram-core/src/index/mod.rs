//! In-memory indexes over the canonical memory list
//!
//! Three indexes kept in lockstep with every mutation:
//! - id -> position in the memory list
//! - token -> set of memory ids (inverted index over tokenized text)
//! - (subject, predicate) -> set of memory ids carrying that claim key
//!
//! All three rebuild from the memory list on load.

use std::collections::{HashMap, HashSet};

use crate::memory::{Claim, Memory};
use crate::text::tokenize;

/// Claim index key: `(subject, predicate)`
pub type ClaimKey = (String, String);

/// The engine's secondary indexes
#[derive(Debug, Default)]
pub struct GraphIndexes {
    by_id: HashMap<String, usize>,
    by_token: HashMap<String, HashSet<String>>,
    by_claim: HashMap<ClaimKey, HashSet<String>>,
}

impl GraphIndexes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything and rebuild from the memory list.
    pub fn rebuild(&mut self, memories: &[Memory]) {
        self.by_id.clear();
        self.by_token.clear();
        self.by_claim.clear();
        for (pos, memory) in memories.iter().enumerate() {
            self.by_id.insert(memory.id.clone(), pos);
            self.index_tokens(&memory.id, &memory.text);
            if let Some(claim) = &memory.claim {
                self.index_claim(&memory.id, claim);
            }
        }
    }

    /// Index a newly appended memory at `pos`.
    pub fn insert(&mut self, memory: &Memory, pos: usize) {
        self.by_id.insert(memory.id.clone(), pos);
        self.index_tokens(&memory.id, &memory.text);
        if let Some(claim) = &memory.claim {
            self.index_claim(&memory.id, claim);
        }
    }

    /// Position of a memory in the canonical list.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Ids whose text contains any of the given tokens.
    pub fn token_candidates(&self, tokens: &[String]) -> HashSet<String> {
        let mut out = HashSet::new();
        for token in tokens {
            if let Some(ids) = self.by_token.get(token) {
                out.extend(ids.iter().cloned());
            }
        }
        out
    }

    /// Ids carrying a claim with this `(subject, predicate)` key.
    pub fn claim_ids(&self, subject: &str, predicate: &str) -> Option<&HashSet<String>> {
        self.by_claim
            .get(&(subject.to_string(), predicate.to_string()))
    }

    /// All distinct claim keys currently indexed.
    pub fn claim_keys(&self) -> Vec<ClaimKey> {
        self.by_claim.keys().cloned().collect()
    }

    /// Re-point the token index after an in-place text edit.
    pub fn reindex_text(&mut self, id: &str, old_text: &str, new_text: &str) {
        self.deindex_tokens(id, old_text);
        self.index_tokens(id, new_text);
    }

    /// Register a claim for `id`; no entry for empty subject or predicate.
    pub fn index_claim(&mut self, id: &str, claim: &Claim) {
        if claim.subject.is_empty() || claim.predicate.is_empty() {
            return;
        }
        self.by_claim
            .entry((claim.subject.clone(), claim.predicate.clone()))
            .or_default()
            .insert(id.to_string());
    }

    /// Remove the claim entry for `id`.
    pub fn deindex_claim(&mut self, id: &str, claim: &Claim) {
        let key = (claim.subject.clone(), claim.predicate.clone());
        if let Some(ids) = self.by_claim.get_mut(&key) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_claim.remove(&key);
            }
        }
    }

    fn index_tokens(&mut self, id: &str, text: &str) {
        for token in tokenize(text) {
            self.by_token.entry(token).or_default().insert(id.to_string());
        }
    }

    fn deindex_tokens(&mut self, id: &str, text: &str) {
        for token in tokenize(text) {
            if let Some(ids) = self.by_token.get_mut(&token) {
                ids.remove(id);
                if ids.is_empty() {
                    self.by_token.remove(&token);
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
