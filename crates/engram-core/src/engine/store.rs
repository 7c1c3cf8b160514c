//! The core write path
//!
//! Validation and capacity checks fire before any mutation. Claims dedup
//! by corroboration, new nodes auto-link to their semantic neighbors, and
//! exclusive claims go through the structural conflict check before the
//! record is committed.

use std::collections::HashSet;

use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::memory::{
    Category, Claim, Link, LinkType, Memory, Quarantine, QuarantineReason, Status,
};
use crate::schema::Normalize;
use crate::scoring;
use crate::text::cosine_similarity;

use super::MemoryGraph;

// ============================================================================
// INPUTS
// ============================================================================

/// Raw claim fields as supplied by a front end
#[derive(Debug, Clone, Default)]
pub struct ClaimInput {
    pub subject: String,
    pub predicate: String,
    pub value: String,
    /// global | session | temporal; defaults to global
    pub scope: Option<String>,
    pub session_id: Option<String>,
    /// ISO-8601 bounds
    pub valid_from: Option<String>,
    pub valid_until: Option<String>,
    pub exclusive: Option<bool>,
}

/// Raw provenance fields as supplied by a front end
#[derive(Debug, Clone, Default)]
pub struct ProvenanceInput {
    /// user_explicit | system | tool_output | user_implicit | document | inference
    pub source: Option<String>,
    pub source_id: Option<String>,
}

/// What to do with the incoming memory when it loses a trust comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnConflict {
    /// Park the new memory for review
    #[default]
    Quarantine,
    /// Leave the new memory active, still recording the conflict
    KeepActive,
}

/// Options for [`MemoryGraph::store`]
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub category: Option<String>,
    pub importance: Option<f64>,
    pub tags: Vec<String>,
    /// ISO-8601 time of the real-world event (bi-temporal axis)
    pub event_time: Option<String>,
    pub claim: Option<ClaimInput>,
    pub provenance: Option<ProvenanceInput>,
    /// Quarantine the new memory unconditionally (reason `manual`)
    pub quarantine: bool,
    pub on_conflict: OnConflict,
}

/// One entry of a [`MemoryGraph::store_many`] batch
#[derive(Debug, Clone)]
pub struct StoreManyItem {
    pub text: String,
    pub options: StoreOptions,
}

// ============================================================================
// OUTCOME
// ============================================================================

/// What the write path did
#[derive(Debug, Clone)]
pub struct StoreOutcome {
    pub id: String,
    /// True when an existing claim was corroborated instead of creating a
    /// new node
    pub deduplicated: bool,
    pub links: usize,
    /// `"id (sim%, agent)"` or `"none"`
    pub top_link: String,
    pub quarantined: bool,
    pub pending_conflict_id: Option<String>,
}

/// Staged effects of one store, applied to in-memory state but not yet
/// persisted or announced
pub(crate) struct StoreStage {
    pub outcome: StoreOutcome,
    pub touched: HashSet<String>,
    pub conflicts_dirty: bool,
    pub events: Vec<EngineEvent>,
}

impl MemoryGraph {
    // ========================================================================
    // PUBLIC API
    // ========================================================================

    /// Store one memory. See the stage pipeline in [`MemoryGraph::store_stage`].
    pub fn store(&mut self, agent: &str, text: &str, options: StoreOptions) -> Result<StoreOutcome> {
        let stage = self.store_stage(agent, text, options)?;
        self.persist_memories(&stage.touched)?;
        if stage.conflicts_dirty {
            self.persist_conflicts()?;
        }
        for event in &stage.events {
            self.emit(event);
        }
        Ok(stage.outcome)
    }

    /// Store a batch. All items stage against in-memory state first; a
    /// failure anywhere rolls the staged mutations back and re-raises.
    pub fn store_many(
        &mut self,
        agent: &str,
        items: Vec<StoreManyItem>,
    ) -> Result<Vec<StoreOutcome>> {
        if items.is_empty() {
            return Err(EngineError::Invalid("store_many requires at least one item".into()));
        }
        if items.len() > self.config.max_batch_store {
            return Err(EngineError::CapacityExceeded(format!(
                "batch of {} exceeds limit {}",
                items.len(),
                self.config.max_batch_store
            )));
        }

        let snapshot_memories = self.memories.clone();
        let snapshot_conflicts = self.conflicts.clone();

        let staged = (|| -> Result<Vec<StoreStage>> {
            let mut staged = Vec::with_capacity(items.len());
            for item in items {
                staged.push(self.store_stage(agent, &item.text, item.options)?);
            }
            Ok(staged)
        })();

        let staged = match staged {
            Ok(staged) => staged,
            Err(err) => {
                self.rollback(snapshot_memories, snapshot_conflicts);
                return Err(err);
            }
        };

        let mut touched = HashSet::new();
        let mut conflicts_dirty = false;
        for stage in &staged {
            touched.extend(stage.touched.iter().cloned());
            conflicts_dirty |= stage.conflicts_dirty;
        }

        let persisted = self.persist_memories(&touched).and_then(|()| {
            if conflicts_dirty {
                self.persist_conflicts()
            } else {
                Ok(())
            }
        });
        if let Err(err) = persisted {
            self.rollback(snapshot_memories, snapshot_conflicts);
            return Err(err);
        }

        let mut outcomes = Vec::with_capacity(staged.len());
        for stage in staged {
            for event in &stage.events {
                self.emit(event);
            }
            outcomes.push(stage.outcome);
        }
        Ok(outcomes)
    }

    fn rollback(&mut self, memories: Vec<Memory>, conflicts: Vec<crate::memory::PendingConflict>) {
        self.memories = memories;
        self.conflicts = conflicts;
        self.indexes.rebuild(&self.memories);
        tracing::warn!("store batch rolled back to pre-commit snapshot");
    }

    // ========================================================================
    // STAGE PIPELINE
    // ========================================================================

    /// Validate, dedup, link, conflict-check, and apply one store to the
    /// in-memory state. Persistence and events are the caller's job.
    pub(crate) fn store_stage(
        &mut self,
        agent: &str,
        text: &str,
        options: StoreOptions,
    ) -> Result<StoreStage> {
        // 1. Validation, all before any mutation.
        self.validate_agent(agent)?;
        self.validate_text(text)?;
        let importance = match options.importance {
            Some(v) if !(0.0..=1.0).contains(&v) => {
                return Err(EngineError::Invalid(format!(
                    "importance {v} outside [0, 1]"
                )));
            }
            Some(v) => v,
            None => 0.5,
        };
        for tag in &options.tags {
            if tag.is_empty() || tag.chars().count() > 64 {
                return Err(EngineError::Invalid(format!("bad tag: {tag:?}")));
            }
        }
        let category = match &options.category {
            Some(c) if c.trim().is_empty() => {
                return Err(EngineError::Invalid("category must not be empty".into()));
            }
            Some(c) => c.trim().to_lowercase(),
            None => Category::Fact.as_str().to_string(),
        };
        let event_at = options
            .event_time
            .as_deref()
            .map(|t| self.parse_iso("event_time", t))
            .transpose()?;
        let claim = options
            .claim
            .map(|c| self.build_claim(c))
            .transpose()?;
        let source = match options.provenance.as_ref().and_then(|p| p.source.as_deref()) {
            Some(raw) => raw
                .parse()
                .map_err(|e: String| EngineError::Invalid(e))?,
            None => crate::memory::Source::Inference,
        };
        let source_id = options.provenance.and_then(|p| p.source_id);

        // 2. Capacity.
        if self.memories.len() >= self.config.max_memories {
            return Err(EngineError::CapacityExceeded(format!(
                "memory limit {} reached",
                self.config.max_memories
            )));
        }

        // 3. Claim dedup by corroboration.
        if let Some(claim) = &claim {
            if let Some(existing_id) = self.find_dedup_target(claim) {
                let now = self.now();
                let pos = self.position(&existing_id)?;
                {
                    let memory = &mut self.memories[pos];
                    memory.provenance.corroboration = memory.provenance.corroboration.max(1) + 1;
                    scoring::refresh_trust(memory, now);
                    memory.touch(now);
                }
                let memory = &self.memories[pos];
                let corroboration = memory.provenance.corroboration;
                let outcome = StoreOutcome {
                    id: existing_id.clone(),
                    deduplicated: true,
                    links: memory.links.len(),
                    top_link: top_link_label(memory, &self.memories, &self.indexes),
                    quarantined: false,
                    pending_conflict_id: None,
                };
                tracing::debug!(id = %existing_id, corroboration, "claim deduplicated");
                return Ok(StoreStage {
                    outcome,
                    touched: HashSet::from([existing_id.clone()]),
                    conflicts_dirty: false,
                    events: vec![EngineEvent::Corroborate {
                        id: existing_id,
                        corroboration,
                    }],
                });
            }
        }

        // 4. Embedding and related-memory discovery.
        let embedding = self.embed_texts(std::slice::from_ref(&text.to_string()))?
            .into_iter()
            .next()
            .flatten();
        let related = match &embedding {
            Some(vector) => self.find_related(vector)?,
            None => Vec::new(),
        };

        // 5-6. Provenance and the new record.
        let now = self.now();
        let id = self.storage.gen_id();
        let trust = scoring::compute_trust(source, 1, 0, 0, 0.0);
        let mut memory = Memory::new(id.clone(), agent.to_string(), text.to_string(), now);
        memory.category = category;
        memory.importance = importance;
        memory.tags = options.tags;
        memory.embedding = embedding;
        memory.event_at = event_at;
        memory.provenance.source = source;
        memory.provenance.source_id = source_id;
        memory.provenance.trust = trust;
        memory.confidence = scoring::confidence(trust);
        memory.claim = claim;
        memory.links = related
            .iter()
            .map(|(target_id, similarity)| Link {
                target_id: target_id.clone(),
                similarity: *similarity,
                link_type: LinkType::Similar,
            })
            .collect();

        let mut events = Vec::new();
        let mut touched = HashSet::new();

        // 7. Structural conflict check.
        let mut conflicts_dirty = false;
        let mut pending_conflict_id = None;
        if memory.claim.is_some() {
            let check = self.check_structural_conflicts(
                &mut memory,
                options.on_conflict,
                &mut events,
                &mut touched,
            )?;
            conflicts_dirty = check.conflicts_dirty;
            pending_conflict_id = check.first_pending_id;
        }

        // 8. Explicit quarantine request.
        if options.quarantine && memory.status != Status::Quarantined {
            memory.status = Status::Quarantined;
            memory.quarantine = Some(Quarantine {
                reason: QuarantineReason::Manual,
                details: None,
                created_at: now,
                resolved_at: None,
                resolution: None,
            });
        }

        let quarantined = memory.status == Status::Quarantined;
        let link_count = memory.links.iter().filter(|l| l.link_type == LinkType::Similar).count();
        let top_link = related
            .first()
            .map(|(target_id, similarity)| {
                let agent = self
                    .indexes
                    .position(target_id)
                    .map(|p| self.memories[p].agent.clone())
                    .unwrap_or_default();
                format!("{target_id} ({:.0}%, {agent})", similarity * 100.0)
            })
            .unwrap_or_else(|| "none".to_string());

        // 9. Commit to the canonical list and indexes, then mirror the
        // auto-links onto their targets.
        let store_event = EngineEvent::Store {
            memory: memory.clone(),
        };
        let pos = self.memories.len();
        self.indexes.insert(&memory, pos);
        self.memories.push(memory);
        touched.insert(id.clone());

        let mut link_events = Vec::new();
        for (target_id, similarity) in &related {
            if let Some(target_pos) = self.indexes.position(target_id) {
                let target = &mut self.memories[target_pos];
                target.upsert_link(Link {
                    target_id: id.clone(),
                    similarity: *similarity,
                    link_type: LinkType::Similar,
                });
                target.touch(now);
                touched.insert(target_id.clone());
                link_events.push(EngineEvent::Link {
                    source_id: id.clone(),
                    target_id: target_id.clone(),
                    link_type: LinkType::Similar,
                    similarity: *similarity,
                });
            }
        }

        // Event order: store, links, then whatever the conflict check queued
        // (supersede / conflict:pending).
        let mut ordered = Vec::with_capacity(1 + link_events.len() + events.len());
        ordered.push(store_event);
        ordered.extend(link_events);
        ordered.extend(events);

        tracing::debug!(%id, links = link_count, quarantined, "memory stored");

        Ok(StoreStage {
            outcome: StoreOutcome {
                id,
                deduplicated: false,
                links: link_count,
                top_link,
                quarantined,
                pending_conflict_id,
            },
            touched,
            conflicts_dirty,
            events: ordered,
        })
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    /// Build and validate a claim from raw input, applying the predicate's
    /// normalizer.
    fn build_claim(&self, input: ClaimInput) -> Result<Claim> {
        if input.subject.trim().is_empty()
            || input.predicate.trim().is_empty()
            || input.value.trim().is_empty()
        {
            return Err(EngineError::Invalid(
                "claim requires subject, predicate, and value".into(),
            ));
        }
        let scope = match input.scope.as_deref() {
            Some(raw) => raw.parse().map_err(|e: String| EngineError::Invalid(e))?,
            None => crate::memory::ClaimScope::Global,
        };
        if scope == crate::memory::ClaimScope::Session && input.session_id.is_none() {
            return Err(EngineError::Invalid(
                "claim with session scope requires session_id".into(),
            ));
        }
        let valid_from = input
            .valid_from
            .as_deref()
            .map(|t| self.parse_iso("valid_from", t))
            .transpose()?;
        let valid_until = input
            .valid_until
            .as_deref()
            .map(|t| self.parse_iso("valid_until", t))
            .transpose()?;

        let schema = self.schemas.effective(&input.predicate);
        let normalized_value = if schema.normalize != Normalize::None {
            Some(self.schemas.normalize_value(&input.predicate, &input.value))
        } else {
            None
        };

        Ok(Claim {
            subject: input.subject.trim().to_string(),
            predicate: input.predicate.trim().to_string(),
            value: input.value,
            normalized_value,
            scope,
            session_id: input.session_id,
            valid_from,
            valid_until,
            exclusive: input.exclusive.unwrap_or(true),
        })
    }

    /// An active memory with the same `(subject, predicate, normalized
    /// value)` that the schema says to corroborate instead of duplicating.
    fn find_dedup_target(&self, claim: &Claim) -> Option<String> {
        let schema = self.schemas.effective(&claim.predicate);
        let dedupable = schema.cardinality == crate::schema::Cardinality::Single
            || schema.dedup_policy == crate::schema::DedupPolicy::Corroborate;
        if !dedupable {
            return None;
        }
        let ids = self.indexes.claim_ids(&claim.subject, &claim.predicate)?;
        let mut matches: Vec<&Memory> = ids
            .iter()
            .filter_map(|id| self.indexes.position(id).map(|p| &self.memories[p]))
            .filter(|m| m.status == Status::Active)
            .filter(|m| {
                m.claim
                    .as_ref()
                    .is_some_and(|c| c.comparable_value() == claim.comparable_value())
            })
            .collect();
        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        matches.first().map(|m| m.id.clone())
    }

    /// Every existing embedded memory above the link threshold, best first,
    /// capped at `max_links_per_memory`.
    fn find_related(&self, vector: &[f64]) -> Result<Vec<(String, f64)>> {
        let mut scored = Vec::new();
        for memory in &self.memories {
            if let Some(candidate) = &memory.embedding {
                match cosine_similarity(vector, candidate) {
                    Ok(similarity) if similarity > self.config.link_threshold => {
                        scored.push((memory.id.clone(), similarity));
                    }
                    Ok(_) => {}
                    // Mixed-dimension graphs happen when the embedding
                    // model changes; skip rather than fail the store.
                    Err(EngineError::DimensionMismatch { .. }) => {}
                    Err(err) => return Err(err),
                }
            }
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.config.max_links_per_memory);
        Ok(scored)
    }
}

/// `"id (sim%, agent)"` for a memory's strongest link, or `"none"`.
fn top_link_label(
    memory: &Memory,
    memories: &[Memory],
    indexes: &crate::index::GraphIndexes,
) -> String {
    memory
        .links
        .iter()
        .max_by(|a, b| a.similarity.partial_cmp(&b.similarity).unwrap_or(std::cmp::Ordering::Equal))
        .map(|link| {
            let agent = indexes
                .position(&link.target_id)
                .map(|p| memories[p].agent.clone())
                .unwrap_or_default();
            format!("{} ({:.0}%, {agent})", link.target_id, link.similarity * 100.0)
        })
        .unwrap_or_else(|| "none".to_string())
}
