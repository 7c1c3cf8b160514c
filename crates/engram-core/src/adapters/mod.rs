//! External adapter interfaces
//!
//! The engine talks to the outside world through three narrow traits:
//! durable storage, embedding providers, and chat providers. Adapters are
//! capability sets; optional operations have default implementations that
//! report themselves unsupported, and the engine checks [`StorageAdapter::capabilities`]
//! before using the incremental path.

mod file;
mod memory_store;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use file::FileStorage;
pub use memory_store::MemoryStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

use crate::error::{EngineError, StorageError};
use crate::memory::{Episode, LabeledCluster, Link, Memory, PendingConflict, Status};

// ============================================================================
// STORAGE
// ============================================================================

/// What a storage adapter can do beyond the required full-save contract
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageCapabilities {
    /// Per-memory upsert/remove and link ops; the engine persists only the
    /// records an operation touched instead of the whole list
    pub incremental: bool,
    /// Server-side vector search; `vector_search` may return rows
    pub vector_search: bool,
}

/// A row returned by server-side vector search
#[derive(Debug, Clone)]
pub struct VectorSearchRow {
    pub id: String,
    pub similarity: f64,
}

/// Parameters for server-side vector search
#[derive(Debug, Clone)]
pub struct VectorSearchRequest<'a> {
    pub embedding: &'a [f64],
    pub agent: Option<&'a str>,
    pub limit: usize,
    pub min_similarity: f64,
    pub statuses: &'a [Status],
}

/// Durable persistence contract.
///
/// Methods take `&self`; adapters use interior mutability where needed so
/// the engine can hold them behind a plain `Box<dyn StorageAdapter>`.
pub trait StorageAdapter {
    fn load(&self) -> Result<Vec<Memory>, StorageError>;
    fn save(&self, memories: &[Memory]) -> Result<(), StorageError>;

    fn load_archive(&self) -> Result<Vec<Memory>, StorageError>;
    fn save_archive(&self, memories: &[Memory]) -> Result<(), StorageError>;

    fn load_episodes(&self) -> Result<Vec<Episode>, StorageError>;
    fn save_episodes(&self, episodes: &[Episode]) -> Result<(), StorageError>;

    fn load_clusters(&self) -> Result<Vec<LabeledCluster>, StorageError>;
    fn save_clusters(&self, clusters: &[LabeledCluster]) -> Result<(), StorageError>;

    fn load_pending_conflicts(&self) -> Result<Vec<PendingConflict>, StorageError>;
    fn save_pending_conflicts(&self, conflicts: &[PendingConflict]) -> Result<(), StorageError>;

    fn gen_id(&self) -> String;
    fn gen_episode_id(&self) -> String;
    fn gen_cluster_id(&self) -> String;
    fn gen_conflict_id(&self) -> String;

    fn capabilities(&self) -> StorageCapabilities {
        StorageCapabilities::default()
    }

    /// Incremental: write or replace a single memory.
    fn upsert(&self, _memory: &Memory) -> Result<(), StorageError> {
        Err(StorageError::Unsupported("upsert".into()))
    }

    /// Incremental: delete a single memory.
    fn remove(&self, _id: &str) -> Result<(), StorageError> {
        Err(StorageError::Unsupported("remove".into()))
    }

    /// Incremental: replace the outgoing links of `source_id`.
    fn upsert_links(&self, _source_id: &str, _links: &[Link]) -> Result<(), StorageError> {
        Err(StorageError::Unsupported("upsert_links".into()))
    }

    /// Incremental: drop every link row touching `id`.
    fn remove_links(&self, _id: &str) -> Result<(), StorageError> {
        Err(StorageError::Unsupported("remove_links".into()))
    }

    /// Server-side vector search. `Ok(None)` tells the engine to fall back
    /// to client-side search.
    fn vector_search(
        &self,
        _request: &VectorSearchRequest<'_>,
    ) -> Result<Option<Vec<VectorSearchRow>>, StorageError> {
        Ok(None)
    }
}

/// Shared handles delegate, so a caller can keep a reference to the
/// adapter it hands the engine.
impl<T: StorageAdapter + ?Sized> StorageAdapter for std::sync::Arc<T> {
    fn load(&self) -> Result<Vec<Memory>, StorageError> {
        (**self).load()
    }
    fn save(&self, memories: &[Memory]) -> Result<(), StorageError> {
        (**self).save(memories)
    }
    fn load_archive(&self) -> Result<Vec<Memory>, StorageError> {
        (**self).load_archive()
    }
    fn save_archive(&self, memories: &[Memory]) -> Result<(), StorageError> {
        (**self).save_archive(memories)
    }
    fn load_episodes(&self) -> Result<Vec<Episode>, StorageError> {
        (**self).load_episodes()
    }
    fn save_episodes(&self, episodes: &[Episode]) -> Result<(), StorageError> {
        (**self).save_episodes(episodes)
    }
    fn load_clusters(&self) -> Result<Vec<LabeledCluster>, StorageError> {
        (**self).load_clusters()
    }
    fn save_clusters(&self, clusters: &[LabeledCluster]) -> Result<(), StorageError> {
        (**self).save_clusters(clusters)
    }
    fn load_pending_conflicts(&self) -> Result<Vec<PendingConflict>, StorageError> {
        (**self).load_pending_conflicts()
    }
    fn save_pending_conflicts(&self, conflicts: &[PendingConflict]) -> Result<(), StorageError> {
        (**self).save_pending_conflicts(conflicts)
    }
    fn gen_id(&self) -> String {
        (**self).gen_id()
    }
    fn gen_episode_id(&self) -> String {
        (**self).gen_episode_id()
    }
    fn gen_cluster_id(&self) -> String {
        (**self).gen_cluster_id()
    }
    fn gen_conflict_id(&self) -> String {
        (**self).gen_conflict_id()
    }
    fn capabilities(&self) -> StorageCapabilities {
        (**self).capabilities()
    }
    fn upsert(&self, memory: &Memory) -> Result<(), StorageError> {
        (**self).upsert(memory)
    }
    fn remove(&self, id: &str) -> Result<(), StorageError> {
        (**self).remove(id)
    }
    fn upsert_links(&self, source_id: &str, links: &[Link]) -> Result<(), StorageError> {
        (**self).upsert_links(source_id, links)
    }
    fn remove_links(&self, id: &str) -> Result<(), StorageError> {
        (**self).remove_links(id)
    }
    fn vector_search(
        &self,
        request: &VectorSearchRequest<'_>,
    ) -> Result<Option<Vec<VectorSearchRow>>, StorageError> {
        (**self).vector_search(request)
    }
}

// ============================================================================
// EMBEDDINGS
// ============================================================================

/// Produces one vector (or None) per input text.
///
/// A `None` vector signals the engine to take the keyword path for that
/// text; adapters doing remote calls return `Err` only for transport-level
/// failures.
pub trait EmbeddingProvider {
    fn embed(&self, texts: &[String]) -> Result<Vec<Option<Vec<f64>>>, EngineError>;

    /// Query-side embedding; defaults to [`EmbeddingProvider::embed`] for
    /// providers without an asymmetric query model.
    fn embed_query(&self, texts: &[String]) -> Result<Vec<Option<Vec<f64>>>, EngineError> {
        self.embed(texts)
    }
}

// ============================================================================
// CHAT
// ============================================================================

/// LLM chat completion, used for conflict classification, summarization,
/// and cluster auto-labeling.
pub trait ChatProvider {
    fn chat(&self, prompt: &str) -> Result<String, EngineError>;
}
