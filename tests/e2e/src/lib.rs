//! Shared harness for the end-to-end tests
//!
//! Engines over volatile storage plus deterministic mock providers, so
//! every journey runs without a network or a model download.

pub mod mocks;

use engram_core::{
    ClaimInput, EngineConfig, MemoryGraph, MemoryStorage, ProvenanceInput, StoreOptions,
    StoreOutcome,
};

/// Engine over in-memory storage with default config, keyword mode.
pub fn engine() -> MemoryGraph {
    MemoryGraph::open(EngineConfig::default(), Box::new(MemoryStorage::new()))
        .expect("engine open")
}

/// Engine with a custom config, keyword mode.
pub fn engine_with_config(config: EngineConfig) -> MemoryGraph {
    MemoryGraph::open(config, Box::new(MemoryStorage::new())).expect("engine open")
}

/// Engine with the deterministic hash embedder attached.
pub fn embedded_engine() -> MemoryGraph {
    MemoryGraph::open(EngineConfig::default(), Box::new(MemoryStorage::new()))
        .expect("engine open")
        .with_embedder(Box::new(mocks::MockEmbedding::hashed()))
}

/// Store a plain text memory and return its outcome.
pub fn store_text(graph: &mut MemoryGraph, agent: &str, text: &str) -> StoreOutcome {
    graph
        .store(agent, text, StoreOptions::default())
        .expect("store")
}

/// Store a memory carrying a global claim with an explicit source.
pub fn store_claim(
    graph: &mut MemoryGraph,
    agent: &str,
    text: &str,
    subject: &str,
    predicate: &str,
    value: &str,
    source: &str,
) -> StoreOutcome {
    graph
        .store(
            agent,
            text,
            StoreOptions {
                claim: Some(ClaimInput {
                    subject: subject.to_string(),
                    predicate: predicate.to_string(),
                    value: value.to_string(),
                    ..Default::default()
                }),
                provenance: Some(ProvenanceInput {
                    source: Some(source.to_string()),
                    source_id: None,
                }),
                ..Default::default()
            },
        )
        .expect("store claim")
}
