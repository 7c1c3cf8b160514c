//! Deterministic mock providers

use std::collections::HashMap;
use std::sync::Mutex;

use engram_core::{ChatProvider, EmbeddingProvider, EngineError};

/// Embedding dimensions for the hash embedder
pub const MOCK_DIMENSIONS: usize = 32;

/// Deterministic embedder.
///
/// Two modes that compose: explicit per-text vectors for tests that need
/// exact similarities, and an FNV-1a token-bucket fallback where texts
/// sharing tokens land near each other.
pub struct MockEmbedding {
    fixed: HashMap<String, Vec<f64>>,
    hashed_fallback: bool,
}

impl MockEmbedding {
    /// Token-bucket embeddings for every text.
    pub fn hashed() -> Self {
        Self {
            fixed: HashMap::new(),
            hashed_fallback: true,
        }
    }

    /// Explicit vectors only; unknown texts embed as None (keyword path).
    pub fn fixed(vectors: HashMap<String, Vec<f64>>) -> Self {
        Self {
            fixed: vectors,
            hashed_fallback: false,
        }
    }

    fn vector_for(&self, text: &str) -> Option<Vec<f64>> {
        if let Some(vector) = self.fixed.get(text) {
            return Some(vector.clone());
        }
        if !self.hashed_fallback {
            return None;
        }
        let mut vector = vec![0.0; MOCK_DIMENSIONS];
        for token in engram_core::tokenize(text) {
            vector[fnv1a(&token) as usize % MOCK_DIMENSIONS] += 1.0;
        }
        Some(vector)
    }
}

impl EmbeddingProvider for MockEmbedding {
    fn embed(&self, texts: &[String]) -> Result<Vec<Option<Vec<f64>>>, EngineError> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

/// Stable 64-bit FNV-1a; std's hasher is not stable across releases.
fn fnv1a(input: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Scripted chat provider: answers pop off a queue, prompts are recorded.
#[derive(Default)]
pub struct MockChat {
    responses: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl MockChat {
    pub fn scripted(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().rev().map(str::to_string).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ChatProvider for MockChat {
    fn chat(&self, prompt: &str) -> Result<String, EngineError> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .ok_or_else(|| EngineError::LlmParse("mock chat ran out of responses".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_embeddings_are_deterministic() {
        let embedder = MockEmbedding::hashed();
        let a = embedder.embed(&["database security".to_string()]).unwrap();
        let b = embedder.embed(&["database security".to_string()]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn shared_tokens_raise_similarity() {
        let embedder = MockEmbedding::hashed();
        let vectors = embedder
            .embed(&[
                "database security vulnerability".to_string(),
                "database security hardening".to_string(),
                "sourdough starter feeding".to_string(),
            ])
            .unwrap();
        let near = engram_core::cosine_similarity(
            vectors[0].as_ref().unwrap(),
            vectors[1].as_ref().unwrap(),
        )
        .unwrap();
        let far = engram_core::cosine_similarity(
            vectors[0].as_ref().unwrap(),
            vectors[2].as_ref().unwrap(),
        )
        .unwrap();
        assert!(near > far);
    }

    #[test]
    fn scripted_chat_pops_in_order() {
        let chat = MockChat::scripted(vec!["first", "second"]);
        assert_eq!(chat.chat("a").unwrap(), "first");
        assert_eq!(chat.chat("b").unwrap(), "second");
        assert!(chat.chat("c").is_err());
        assert_eq!(chat.prompts().len(), 3);
    }
}
