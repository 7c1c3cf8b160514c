//! Engine events and the synchronous listener bus
//!
//! Write-through observers (markdown mirrors, webhooks) subscribe here.
//! Listeners run synchronously in registration order; a panicking listener
//! is trapped and discarded so engine correctness never depends on an
//! observer.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::memory::{LinkType, Memory, PendingConflict};

// ============================================================================
// EVENTS
// ============================================================================

/// Everything the engine announces to observers
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Store { memory: Memory },
    Search { agent: Option<String>, query: String, results: usize },
    Decay { archived: usize, deleted: usize },
    Link { source_id: String, target_id: String, link_type: LinkType, similarity: f64 },
    Dispute { id: String, trust: f64 },
    Corroborate { id: String, corroboration: u32 },
    Supersede { superseded_id: String, by_id: String },
    ConflictPending { conflict: PendingConflict },
    ConflictResolved { id: String, resolution: String },
    EpisodeCreate { id: String },
    EpisodeUpdate { id: String },
    EpisodeDelete { id: String },
    EpisodeSummarize { id: String },
    ClusterCreate { id: String },
    ClusterDelete { id: String },
    Compress { digest_id: String, source_count: usize },
    Consolidate { duration_ms: u64 },
}

impl EngineEvent {
    /// Stable event name, the subscription key.
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::Store { .. } => "store",
            EngineEvent::Search { .. } => "search",
            EngineEvent::Decay { .. } => "decay",
            EngineEvent::Link { .. } => "link",
            EngineEvent::Dispute { .. } => "dispute",
            EngineEvent::Corroborate { .. } => "corroborate",
            EngineEvent::Supersede { .. } => "supersede",
            EngineEvent::ConflictPending { .. } => "conflict:pending",
            EngineEvent::ConflictResolved { .. } => "conflict:resolved",
            EngineEvent::EpisodeCreate { .. } => "episode:create",
            EngineEvent::EpisodeUpdate { .. } => "episode:update",
            EngineEvent::EpisodeDelete { .. } => "episode:delete",
            EngineEvent::EpisodeSummarize { .. } => "episode:summarize",
            EngineEvent::ClusterCreate { .. } => "cluster:create",
            EngineEvent::ClusterDelete { .. } => "cluster:delete",
            EngineEvent::Compress { .. } => "compress",
            EngineEvent::Consolidate { .. } => "consolidate",
        }
    }
}

// ============================================================================
// EVENT BUS
// ============================================================================

type Callback = Box<dyn Fn(&EngineEvent)>;

struct Listener {
    /// None subscribes to every event
    filter: Option<String>,
    callback: Callback,
}

/// Ordered listener registry
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<Listener>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one event name.
    pub fn on<F>(&mut self, event_name: &str, callback: F)
    where
        F: Fn(&EngineEvent) + 'static,
    {
        self.listeners.push(Listener {
            filter: Some(event_name.to_string()),
            callback: Box::new(callback),
        });
    }

    /// Subscribe to every event.
    pub fn on_any<F>(&mut self, callback: F)
    where
        F: Fn(&EngineEvent) + 'static,
    {
        self.listeners.push(Listener {
            filter: None,
            callback: Box::new(callback),
        });
    }

    /// Invoke matching listeners in registration order. Panics inside a
    /// listener are trapped and discarded.
    pub fn emit(&self, event: &EngineEvent) {
        let name = event.name();
        for listener in &self.listeners {
            if let Some(filter) = &listener.filter {
                if filter != name {
                    continue;
                }
            }
            let result = catch_unwind(AssertUnwindSafe(|| (listener.callback)(event)));
            if result.is_err() {
                tracing::warn!(event = name, "event listener panicked; ignoring");
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
