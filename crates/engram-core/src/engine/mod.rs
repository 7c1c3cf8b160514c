//! The memory graph engine
//!
//! Owns the canonical ordered memory list, episodes, labeled clusters, and
//! pending conflicts; keeps the secondary indexes in lockstep with every
//! mutation; talks to storage, embedding, and chat adapters through their
//! narrow traits; and announces changes on the event bus.
//!
//! Single-threaded cooperative: mutations serialize through `&mut self`,
//! and callers receive cloned projections.

mod clusters;
mod compress;
mod conflict;
mod consolidate;
mod context;
mod episodes;
mod evolve;
mod graph;
mod maintenance;
mod search;
mod stats;
mod store;

pub use clusters::ClusterLabelReport;
pub use compress::{AutoCompressOptions, CompressMethod, CompressOptions, CompressOutcome};
pub use conflict::{ConflictFilter, ConflictResolution, ReviewAction};
pub use consolidate::{ConsolidateOptions, ConsolidationReport};
pub use context::{
    ContextExplain, ContextMemory, ContextOptions, ContextResult, ExcludedMemory,
};
pub use episodes::{EpisodeFilter, EpisodeHit};
pub use evolve::EvolveOutcome;
pub use graph::{ClusterView, LinkView, LinksView, OrphanView, PathResult, TraverseNode};
pub use maintenance::DecayReport;
pub use search::{
    ExcludedBreakdown, HitExplain, Rerank, RerankExplain, RerankWeights, RetrievedExplain,
    SearchHit, SearchMeta, SearchOptions, SearchResponse, SignalsExplain, StatusExplain,
    WeightsExplain,
};
pub use stats::{HealthReport, StrengthBuckets, TimeField, TimelineDay, TimelineEntry};
pub use store::{
    ClaimInput, OnConflict, ProvenanceInput, StoreManyItem, StoreOptions, StoreOutcome,
};

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::time::Instant;

use chrono::{DateTime, Utc};
use lru::LruCache;

use crate::adapters::{ChatProvider, EmbeddingProvider, StorageAdapter};
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::index::GraphIndexes;
use crate::memory::{Episode, LabeledCluster, Memory, PendingConflict};
use crate::schema::SchemaRegistry;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Composite rerank weights
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub relevance: f64,
    pub confidence: f64,
    pub recency: f64,
    pub importance: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            relevance: 0.40,
            confidence: 0.25,
            recency: 0.20,
            importance: 0.15,
        }
    }
}

/// Engine tuning knobs; every field has a sensible default
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard cap on active memories
    pub max_memories: usize,
    /// Minimum cosine similarity for auto-linking at store time
    pub link_threshold: f64,
    /// Cap on auto-links attached to a new memory
    pub max_links_per_memory: usize,
    /// Half-life in days for the legacy decay curve
    pub half_life_days: f64,
    /// Decay bucket bounds
    pub archive_threshold: f64,
    pub delete_threshold: f64,
    /// Consolidation thresholds
    pub dedup_threshold: f64,
    pub corroborate_threshold: f64,
    pub compress_age_days: f64,
    pub prune_age_days: f64,
    pub quarantine_max_age_days: f64,
    pub prune_quarantined: bool,
    /// SM-2 state
    pub initial_stability: f64,
    pub stability_growth: f64,
    /// Minimum interval between evolve calls
    pub evolve_min_interval: std::time::Duration,
    /// Batch caps
    pub max_batch_store: usize,
    pub max_batch_queries: usize,
    /// Input bounds
    pub max_text_length: usize,
    pub max_agent_length: usize,
    /// Default rerank weights
    pub rerank_weights: Weights,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_memories: 10_000,
            link_threshold: 0.7,
            max_links_per_memory: 5,
            half_life_days: 30.0,
            archive_threshold: 0.15,
            delete_threshold: 0.05,
            dedup_threshold: 0.95,
            corroborate_threshold: 0.9,
            compress_age_days: 30.0,
            prune_age_days: 30.0,
            quarantine_max_age_days: 14.0,
            prune_quarantined: false,
            initial_stability: 1.0,
            stability_growth: 2.5,
            evolve_min_interval: std::time::Duration::from_secs(1),
            max_batch_store: 100,
            max_batch_queries: 20,
            max_text_length: 10_000,
            max_agent_length: 64,
            rerank_weights: Weights::default(),
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

const QUERY_CACHE_CAPACITY: usize = 100;

/// The in-process memory graph engine
pub struct MemoryGraph {
    pub(crate) config: EngineConfig,
    pub(crate) storage: Box<dyn StorageAdapter>,
    pub(crate) embedder: Option<Box<dyn EmbeddingProvider>>,
    pub(crate) chat: Option<Box<dyn ChatProvider>>,
    pub(crate) schemas: SchemaRegistry,
    pub(crate) memories: Vec<Memory>,
    pub(crate) episodes: Vec<Episode>,
    pub(crate) clusters: Vec<LabeledCluster>,
    pub(crate) conflicts: Vec<PendingConflict>,
    pub(crate) indexes: GraphIndexes,
    pub(crate) events: EventBus,
    /// Query text -> embedding, so repeated searches skip the provider
    pub(crate) query_cache: LruCache<String, Option<Vec<f64>>>,
    pub(crate) last_evolve_at: Option<Instant>,
}

impl MemoryGraph {
    /// Open the engine over a storage adapter: load all persisted state and
    /// rebuild the indexes.
    pub fn open(config: EngineConfig, storage: Box<dyn StorageAdapter>) -> Result<Self> {
        let memories = storage.load().map_err(EngineError::from)?;
        let episodes = storage.load_episodes().map_err(EngineError::from)?;
        let clusters = storage.load_clusters().map_err(EngineError::from)?;
        let conflicts = storage.load_pending_conflicts().map_err(EngineError::from)?;

        let mut indexes = GraphIndexes::new();
        indexes.rebuild(&memories);

        tracing::info!(
            memories = memories.len(),
            episodes = episodes.len(),
            clusters = clusters.len(),
            conflicts = conflicts.len(),
            "memory graph loaded"
        );

        Ok(Self {
            config,
            storage,
            embedder: None,
            chat: None,
            schemas: SchemaRegistry::new(),
            memories,
            episodes,
            clusters,
            conflicts,
            indexes,
            events: EventBus::new(),
            query_cache: LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            ),
            last_evolve_at: None,
        })
    }

    /// Attach an embedding provider.
    pub fn with_embedder(mut self, embedder: Box<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Attach a chat provider.
    pub fn with_chat(mut self, chat: Box<dyn ChatProvider>) -> Self {
        self.chat = Some(chat);
        self
    }

    /// Mutable access to the predicate schema registry.
    pub fn schemas_mut(&mut self) -> &mut SchemaRegistry {
        &mut self.schemas
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // EVENTS
    // ========================================================================

    /// Subscribe to one event name.
    pub fn on<F>(&mut self, event_name: &str, callback: F)
    where
        F: Fn(&EngineEvent) + 'static,
    {
        self.events.on(event_name, callback);
    }

    /// Subscribe to every event.
    pub fn on_any<F>(&mut self, callback: F)
    where
        F: Fn(&EngineEvent) + 'static,
    {
        self.events.on_any(callback);
    }

    pub(crate) fn emit(&self, event: &EngineEvent) {
        self.events.emit(event);
    }

    // ========================================================================
    // LOOKUPS
    // ========================================================================

    /// Number of memories in the active list (all statuses).
    pub fn len(&self) -> usize {
        self.memories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }

    /// Cloned projection of one memory.
    pub fn get(&self, id: &str) -> Result<Memory> {
        Ok(self.require(id)?.clone())
    }

    /// Cloned projection of the full list, optionally filtered by agent.
    pub fn list(&self, agent: Option<&str>) -> Vec<Memory> {
        self.memories
            .iter()
            .filter(|m| agent.is_none_or(|a| m.agent == a))
            .cloned()
            .collect()
    }

    pub(crate) fn position(&self, id: &str) -> Result<usize> {
        self.indexes
            .position(id)
            .ok_or_else(|| EngineError::NotFound(format!("memory {id}")))
    }

    pub(crate) fn require(&self, id: &str) -> Result<&Memory> {
        let pos = self.position(id)?;
        Ok(&self.memories[pos])
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    // ========================================================================
    // VALIDATION
    // ========================================================================

    pub(crate) fn validate_agent(&self, agent: &str) -> Result<()> {
        if agent.is_empty() {
            return Err(EngineError::Invalid("agent must not be empty".into()));
        }
        if agent.len() > self.config.max_agent_length {
            return Err(EngineError::Invalid(format!(
                "agent exceeds {} characters",
                self.config.max_agent_length
            )));
        }
        if !agent
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(EngineError::Invalid(format!(
                "agent contains characters outside [A-Za-z0-9._-]: {agent}"
            )));
        }
        Ok(())
    }

    pub(crate) fn validate_text(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(EngineError::Invalid("text must not be empty".into()));
        }
        if text.chars().count() > self.config.max_text_length {
            return Err(EngineError::Invalid(format!(
                "text exceeds {} characters",
                self.config.max_text_length
            )));
        }
        Ok(())
    }

    pub(crate) fn parse_iso(&self, field: &str, value: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| EngineError::Invalid(format!("{field} is not a valid ISO-8601 time: {e}")))
    }

    // ========================================================================
    // PERSISTENCE
    // ========================================================================

    /// Persist the memories an operation touched: per-record upserts when
    /// the adapter is incremental, otherwise a full save.
    pub(crate) fn persist_memories(&self, touched: &HashSet<String>) -> Result<()> {
        if self.storage.capabilities().incremental {
            for id in touched {
                if let Some(pos) = self.indexes.position(id) {
                    self.storage.upsert(&self.memories[pos])?;
                }
            }
            Ok(())
        } else {
            self.persist_all_memories()
        }
    }

    /// Persist the full memory list.
    pub(crate) fn persist_all_memories(&self) -> Result<()> {
        self.storage.save(&self.memories)?;
        Ok(())
    }

    /// Persist removals plus the survivors whose links were cleaned.
    pub(crate) fn persist_removals(
        &self,
        removed: &[String],
        touched: &HashSet<String>,
    ) -> Result<()> {
        if self.storage.capabilities().incremental {
            for id in removed {
                self.storage.remove(id)?;
                self.storage.remove_links(id)?;
            }
            for id in touched {
                if let Some(pos) = self.indexes.position(id) {
                    self.storage.upsert(&self.memories[pos])?;
                }
            }
            Ok(())
        } else {
            self.persist_all_memories()
        }
    }

    pub(crate) fn persist_conflicts(&self) -> Result<()> {
        self.storage.save_pending_conflicts(&self.conflicts)?;
        Ok(())
    }

    pub(crate) fn persist_episodes(&self) -> Result<()> {
        self.storage.save_episodes(&self.episodes)?;
        Ok(())
    }

    pub(crate) fn persist_clusters(&self) -> Result<()> {
        self.storage.save_clusters(&self.clusters)?;
        Ok(())
    }

    /// Append archive copies to the durable archive.
    pub(crate) fn append_archive(&self, copies: Vec<Memory>) -> Result<()> {
        if copies.is_empty() {
            return Ok(());
        }
        let mut archive = self.storage.load_archive()?;
        archive.extend(copies);
        self.storage.save_archive(&archive)?;
        Ok(())
    }

    // ========================================================================
    // EMBEDDING HELPERS
    // ========================================================================

    /// Embed a batch of texts; None provider yields all-None vectors.
    pub(crate) fn embed_texts(&self, texts: &[String]) -> Result<Vec<Option<Vec<f64>>>> {
        match &self.embedder {
            Some(embedder) => embedder.embed(texts),
            None => Ok(vec![None; texts.len()]),
        }
    }

    /// Embed query strings through the LRU cache, preferring the provider's
    /// query-side model.
    pub(crate) fn embed_queries(&mut self, queries: &[String]) -> Result<Vec<Option<Vec<f64>>>> {
        let mut out: Vec<Option<Option<Vec<f64>>>> = vec![None; queries.len()];
        let mut misses: Vec<usize> = Vec::new();
        for (i, query) in queries.iter().enumerate() {
            if let Some(cached) = self.query_cache.get(query) {
                out[i] = Some(cached.clone());
            } else {
                misses.push(i);
            }
        }

        if !misses.is_empty() {
            if let Some(embedder) = &self.embedder {
                let texts: Vec<String> = misses.iter().map(|&i| queries[i].clone()).collect();
                let vectors = embedder.embed_query(&texts)?;
                for (slot, vector) in misses.iter().zip(vectors.into_iter()) {
                    self.query_cache.put(queries[*slot].clone(), vector.clone());
                    out[*slot] = Some(vector);
                }
            } else {
                for &i in &misses {
                    out[i] = Some(None);
                }
            }
        }

        Ok(out.into_iter().map(|v| v.unwrap_or(None)).collect())
    }
}

impl std::fmt::Debug for MemoryGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGraph")
            .field("memories", &self.memories.len())
            .field("episodes", &self.episodes.len())
            .field("clusters", &self.clusters.len())
            .field("conflicts", &self.conflicts.len())
            .finish()
    }
}
