//! # Engram Core
//!
//! Graph-native memory engine for AI agents. Turns a stream of short
//! textual memories into a typed, weighted graph with:
//!
//! - **A-MEM linking**: every new memory auto-links to its semantic
//!   neighbors, bidirectionally, capped per memory
//! - **Provenance trust**: source-weighted trust with corroboration,
//!   reinforcement/dispute feedback, and age discount
//! - **Structural conflict detection**: exclusive `(subject, predicate,
//!   value)` claims are checked against the claim index and resolved by
//!   per-predicate policy (supersede / require review / keep both)
//! - **Biological decay**: SM-2 stability/retrievability when reinforced,
//!   legacy half-life curve otherwise
//! - **Budget-aware retrieval**: composite rerank over relevance,
//!   confidence, recency, and importance; token-budgeted context assembly
//! - **Episodes, clusters, compression, consolidation**: named groupings,
//!   connected-component detection, digest memories, and a five-phase
//!   maintenance pass
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use engram_core::{EngineConfig, FileStorage, MemoryGraph, StoreOptions};
//!
//! let storage = FileStorage::new("./data")?;
//! let mut graph = MemoryGraph::open(EngineConfig::default(), Box::new(storage))?;
//!
//! let outcome = graph.store("assistant", "Deploys go out on Tuesdays", StoreOptions::default())?;
//! let results = graph.search(Some("assistant"), "deploy schedule", &Default::default())?;
//! ```
//!
//! ## Adapters
//!
//! Storage, embeddings, and chat are capability sets behind narrow traits;
//! the engine runs fully without embeddings (keyword retrieval) and without
//! chat (no summarization or LLM conflict classification).

// ============================================================================
// MODULES
// ============================================================================

pub mod adapters;
pub mod engine;
pub mod error;
pub mod events;
pub mod index;
pub mod memory;
pub mod schema;
pub mod scoring;
pub mod text;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Errors
pub use error::{EngineError, Result, StorageError};

// Memory types
pub use memory::{
    Category, Claim, ClaimScope, Compressed, CompressionMethod, Episode, EvolutionStep,
    LabeledCluster, Link, LinkType, Memory, PendingConflict, Provenance, Quarantine,
    QuarantineReason, Source, Status, TimeRange,
};

// Engine
pub use engine::{
    AutoCompressOptions, ClaimInput, ClusterLabelReport, ClusterView, CompressOptions,
    CompressOutcome, ConflictFilter, ConflictResolution, ConsolidateOptions, ConsolidationReport,
    ContextMemory, ContextOptions, ContextResult, DecayReport, EngineConfig, EpisodeFilter,
    EpisodeHit, EvolveOutcome, ExcludedBreakdown, ExcludedMemory, HealthReport, HitExplain,
    LinkView, LinksView, MemoryGraph, OnConflict, OrphanView, PathResult, ProvenanceInput,
    Rerank, RerankWeights, ReviewAction, SearchHit, SearchMeta, SearchOptions, SearchResponse,
    StoreManyItem, StoreOptions, StoreOutcome, StrengthBuckets, TimeField, TimelineDay,
    TimelineEntry, TraverseNode, Weights,
};

// Events
pub use events::{EngineEvent, EventBus};

// Adapters
pub use adapters::{
    ChatProvider, EmbeddingProvider, FileStorage, MemoryStorage, StorageAdapter,
    StorageCapabilities, VectorSearchRequest, VectorSearchRow,
};
#[cfg(feature = "sqlite")]
pub use adapters::SqliteStorage;

// Predicate schemas
pub use schema::{
    Cardinality, ConflictPolicy, DedupPolicy, Normalize, PredicateSchema, SchemaRegistry,
};

// Primitives
pub use scoring::{compute_trust, confidence, decay_strength, source_weight};
pub use text::{cosine_similarity, estimate_tokens, tokenize};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Category, Claim, ClaimInput, EngineConfig, EngineError, EngineEvent, FileStorage,
        LinkType, Memory, MemoryGraph, MemoryStorage, Result, SearchOptions, Source, Status,
        StoreOptions, StoreOutcome,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::SqliteStorage;
}
