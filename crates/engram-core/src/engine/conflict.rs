//! Structural conflict detection and resolution
//!
//! An incoming exclusive claim on a single-cardinality predicate is checked
//! against the claim index. Depending on the predicate's policy the engine
//! supersedes the weaker side, parks the contradiction for review, or keeps
//! both and records the conflict pre-resolved for audit.

use std::collections::HashSet;

use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::memory::{
    ClaimScope, Link, LinkType, Memory, PendingConflict, Quarantine, QuarantineReason, Status,
};
use crate::schema::{Cardinality, ConflictPolicy};

use super::store::OnConflict;
use super::MemoryGraph;

// ============================================================================
// TYPES
// ============================================================================

/// Filter for [`MemoryGraph::conflicts`]
#[derive(Debug, Clone, Default)]
pub struct ConflictFilter {
    pub subject: Option<String>,
    pub predicate: Option<String>,
    /// Include resolved entries too
    pub include_resolved: bool,
}

/// Operator decision for a pending conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// The new memory wins; the existing one is superseded
    Supersede,
    /// The new memory is archived and removed
    Reject,
    /// Both stay active
    KeepBoth,
}

impl ConflictResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictResolution::Supersede => "supersede",
            ConflictResolution::Reject => "reject",
            ConflictResolution::KeepBoth => "keep_both",
        }
    }
}

impl std::str::FromStr for ConflictResolution {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "supersede" => Ok(ConflictResolution::Supersede),
            "reject" => Ok(ConflictResolution::Reject),
            "keep_both" => Ok(ConflictResolution::KeepBoth),
            _ => Err(format!("unknown resolution: {s}")),
        }
    }
}

/// Operator decision for a quarantined memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Activate,
    Reject,
}

impl std::str::FromStr for ReviewAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "activate" => Ok(ReviewAction::Activate),
            "reject" => Ok(ReviewAction::Reject),
            _ => Err(format!("unknown review action: {s}")),
        }
    }
}

/// What the structural check did
#[derive(Debug, Default)]
pub(crate) struct ConflictCheckResult {
    pub conflicts_dirty: bool,
    pub first_pending_id: Option<String>,
}

impl MemoryGraph {
    // ========================================================================
    // STRUCTURAL CHECK
    // ========================================================================

    /// Check `incoming` (not necessarily in the list yet) against existing
    /// active claims for the same `(subject, predicate)`. Mutates existing
    /// memories, may quarantine `incoming`, and appends pending conflicts;
    /// queues the corresponding events.
    pub(crate) fn check_structural_conflicts(
        &mut self,
        incoming: &mut Memory,
        on_conflict: OnConflict,
        events: &mut Vec<EngineEvent>,
        touched: &mut HashSet<String>,
    ) -> Result<ConflictCheckResult> {
        let mut result = ConflictCheckResult::default();
        let Some(claim) = incoming.claim.clone() else {
            return Ok(result);
        };
        if !claim.exclusive {
            return Ok(result);
        }
        let schema = self.schemas.effective(&claim.predicate);
        if schema.cardinality != Cardinality::Single {
            return Ok(result);
        }

        // Collect conflicting positions first; mutations follow.
        let mut conflicting: Vec<usize> = Vec::new();
        if let Some(ids) = self.indexes.claim_ids(&claim.subject, &claim.predicate) {
            for id in ids {
                if *id == incoming.id {
                    continue;
                }
                let Some(pos) = self.indexes.position(id) else {
                    continue;
                };
                let existing = &self.memories[pos];
                if existing.status != Status::Active {
                    continue;
                }
                let Some(existing_claim) = &existing.claim else {
                    continue;
                };
                if !existing_claim.exclusive {
                    continue;
                }
                if existing_claim.comparable_value() == claim.comparable_value() {
                    continue;
                }
                // Session-scoped values may shadow globals without
                // contradicting them.
                if claim.scope == ClaimScope::Session
                    && existing_claim.scope == ClaimScope::Global
                {
                    continue;
                }
                if !claim.window_overlaps(existing_claim) {
                    continue;
                }
                conflicting.push(pos);
            }
        }
        conflicting.sort_unstable();

        let now = self.now();
        for pos in conflicting {
            let existing_id = self.memories[pos].id.clone();
            let existing_trust = self.memories[pos].provenance.trust;
            let existing_claim = self.memories[pos]
                .claim
                .clone()
                .unwrap_or_else(|| claim.clone());

            match schema.conflict_policy {
                ConflictPolicy::Supersede => {
                    if incoming.provenance.trust >= existing_trust {
                        let existing = &mut self.memories[pos];
                        existing.status = Status::Superseded;
                        existing.superseded_by = Some(incoming.id.clone());
                        existing.upsert_link(Link {
                            target_id: incoming.id.clone(),
                            similarity: 1.0,
                            link_type: LinkType::Supersedes,
                        });
                        existing.touch(now);
                        incoming.supersedes.push(existing_id.clone());
                        incoming.upsert_link(Link {
                            target_id: existing_id.clone(),
                            similarity: 1.0,
                            link_type: LinkType::Supersedes,
                        });
                        touched.insert(existing_id.clone());
                        events.push(EngineEvent::Supersede {
                            superseded_id: existing_id.clone(),
                            by_id: incoming.id.clone(),
                        });
                        tracing::debug!(
                            superseded = %existing_id,
                            by = %incoming.id,
                            "claim superseded on trust comparison"
                        );
                    } else {
                        if on_conflict == OnConflict::Quarantine {
                            self.quarantine_incoming(
                                incoming,
                                QuarantineReason::TrustInsufficient,
                                now,
                            );
                        }
                        let pending = self.push_pending_conflict(
                            incoming,
                            &existing_id,
                            existing_trust,
                            existing_claim,
                            None,
                            now,
                        );
                        result.first_pending_id.get_or_insert(pending.id.clone());
                        result.conflicts_dirty = true;
                        events.push(EngineEvent::ConflictPending { conflict: pending });
                    }
                }
                ConflictPolicy::RequireReview => {
                    if on_conflict == OnConflict::Quarantine {
                        self.quarantine_incoming(
                            incoming,
                            QuarantineReason::PredicateRequiresReview,
                            now,
                        );
                    }
                    let pending = self.push_pending_conflict(
                        incoming,
                        &existing_id,
                        existing_trust,
                        existing_claim,
                        None,
                        now,
                    );
                    result.first_pending_id.get_or_insert(pending.id.clone());
                    result.conflicts_dirty = true;
                    events.push(EngineEvent::ConflictPending { conflict: pending });
                }
                ConflictPolicy::KeepBoth => {
                    // Pre-resolved entry kept for auditability only.
                    let pending = self.push_pending_conflict(
                        incoming,
                        &existing_id,
                        existing_trust,
                        existing_claim,
                        Some("keep_both"),
                        now,
                    );
                    result.first_pending_id.get_or_insert(pending.id.clone());
                    result.conflicts_dirty = true;
                    events.push(EngineEvent::ConflictPending { conflict: pending });
                }
            }
        }

        Ok(result)
    }

    fn quarantine_incoming(
        &self,
        incoming: &mut Memory,
        reason: QuarantineReason,
        now: chrono::DateTime<chrono::Utc>,
    ) {
        if incoming.status == Status::Quarantined {
            return;
        }
        incoming.status = Status::Quarantined;
        incoming.quarantine = Some(Quarantine {
            reason,
            details: None,
            created_at: now,
            resolved_at: None,
            resolution: None,
        });
    }

    fn push_pending_conflict(
        &mut self,
        incoming: &Memory,
        existing_id: &str,
        existing_trust: f64,
        existing_claim: crate::memory::Claim,
        resolution: Option<&str>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> PendingConflict {
        let conflict = PendingConflict {
            id: self.storage.gen_conflict_id(),
            new_id: incoming.id.clone(),
            existing_id: existing_id.to_string(),
            new_trust: incoming.provenance.trust,
            existing_trust,
            new_claim: incoming.claim.clone().unwrap_or(existing_claim.clone()),
            existing_claim,
            created_at: now,
            resolved_at: resolution.map(|_| now),
            resolution: resolution.map(|r| r.to_string()),
        };
        self.conflicts.push(conflict.clone());
        conflict
    }

    // ========================================================================
    // CONFLICT QUERIES
    // ========================================================================

    /// Open pending conflicts.
    pub fn pending_conflicts(&self) -> Vec<PendingConflict> {
        self.conflicts.iter().filter(|c| c.is_open()).cloned().collect()
    }

    /// Pending conflicts with optional subject/predicate filters.
    pub fn conflicts(&self, filter: &ConflictFilter) -> Vec<PendingConflict> {
        self.conflicts
            .iter()
            .filter(|c| filter.include_resolved || c.is_open())
            .filter(|c| {
                filter
                    .subject
                    .as_deref()
                    .is_none_or(|s| c.new_claim.subject == s)
            })
            .filter(|c| {
                filter
                    .predicate
                    .as_deref()
                    .is_none_or(|p| c.new_claim.predicate == p)
            })
            .cloned()
            .collect()
    }

    // ========================================================================
    // RESOLUTION
    // ========================================================================

    /// Resolve an open pending conflict.
    pub fn resolve_conflict(
        &mut self,
        conflict_id: &str,
        action: ConflictResolution,
    ) -> Result<PendingConflict> {
        let idx = self
            .conflicts
            .iter()
            .position(|c| c.id == conflict_id)
            .ok_or_else(|| EngineError::NotFound(format!("conflict {conflict_id}")))?;
        if !self.conflicts[idx].is_open() {
            return Err(EngineError::Conflict(format!(
                "conflict {conflict_id} already resolved"
            )));
        }

        let new_id = self.conflicts[idx].new_id.clone();
        let existing_id = self.conflicts[idx].existing_id.clone();
        let now = self.now();
        let mut touched = HashSet::new();
        let mut removed: Vec<String> = Vec::new();

        match action {
            ConflictResolution::Supersede => {
                if let Some(pos) = self.indexes.position(&existing_id) {
                    let existing = &mut self.memories[pos];
                    existing.status = Status::Superseded;
                    existing.superseded_by = Some(new_id.clone());
                    existing.upsert_link(Link {
                        target_id: new_id.clone(),
                        similarity: 1.0,
                        link_type: LinkType::Supersedes,
                    });
                    existing.touch(now);
                    touched.insert(existing_id.clone());
                }
                if let Some(pos) = self.indexes.position(&new_id) {
                    let memory = &mut self.memories[pos];
                    Self::lift_quarantine(memory, "superseded_existing", now);
                    memory.status = Status::Active;
                    if !memory.supersedes.contains(&existing_id) {
                        memory.supersedes.push(existing_id.clone());
                    }
                    memory.upsert_link(Link {
                        target_id: existing_id.clone(),
                        similarity: 1.0,
                        link_type: LinkType::Supersedes,
                    });
                    memory.touch(now);
                    touched.insert(new_id.clone());
                }
            }
            ConflictResolution::Reject => {
                if let Some(pos) = self.indexes.position(&new_id) {
                    let mut memory = self.memories[pos].clone();
                    Self::lift_quarantine(&mut memory, "rejected", now);
                    let copy = memory.to_archive_copy(now, Some("conflict_rejected"));
                    self.append_archive(vec![copy])?;
                    self.remove_memories(&[new_id.clone()], &mut touched);
                    removed.push(new_id.clone());
                }
            }
            ConflictResolution::KeepBoth => {
                for id in [&new_id, &existing_id] {
                    if let Some(pos) = self.indexes.position(id) {
                        let memory = &mut self.memories[pos];
                        Self::lift_quarantine(memory, "keep_both", now);
                        if memory.status != Status::Active {
                            if memory.superseded_by.as_deref() == Some(new_id.as_str()) {
                                memory.superseded_by = None;
                            }
                            memory.status = Status::Active;
                        }
                        memory.touch(now);
                        touched.insert(id.clone());
                    }
                }
                if let Some(pos) = self.indexes.position(&new_id) {
                    self.memories[pos].supersedes.retain(|s| s != &existing_id);
                }
            }
        }

        let conflict = &mut self.conflicts[idx];
        conflict.resolved_at = Some(now);
        conflict.resolution = Some(action.as_str().to_string());
        let resolved = conflict.clone();

        if removed.is_empty() {
            self.persist_memories(&touched)?;
        } else {
            self.persist_removals(&removed, &touched)?;
        }
        self.persist_conflicts()?;
        self.emit(&EngineEvent::ConflictResolved {
            id: resolved.id.clone(),
            resolution: action.as_str().to_string(),
        });
        Ok(resolved)
    }

    fn lift_quarantine(memory: &mut Memory, resolution: &str, now: chrono::DateTime<chrono::Utc>) {
        if let Some(q) = &mut memory.quarantine {
            if q.resolved_at.is_none() {
                q.resolved_at = Some(now);
                q.resolution = Some(resolution.to_string());
            }
        }
    }

    // ========================================================================
    // QUARANTINE OPERATIONS
    // ========================================================================

    /// Manually quarantine an active memory.
    pub fn quarantine(
        &mut self,
        id: &str,
        reason: QuarantineReason,
        details: Option<String>,
    ) -> Result<Memory> {
        let pos = self.position(id)?;
        if self.memories[pos].status != Status::Active {
            return Err(EngineError::Conflict(format!(
                "memory {id} is {}, only active memories can be quarantined",
                self.memories[pos].status
            )));
        }
        let now = self.now();
        let memory = &mut self.memories[pos];
        memory.status = Status::Quarantined;
        memory.quarantine = Some(Quarantine {
            reason,
            details,
            created_at: now,
            resolved_at: None,
            resolution: None,
        });
        memory.touch(now);
        let projection = memory.clone();
        self.persist_memories(&HashSet::from([id.to_string()]))?;
        Ok(projection)
    }

    /// Quarantined memories, optionally filtered by agent.
    pub fn list_quarantined(&self, agent: Option<&str>, limit: usize) -> Vec<Memory> {
        self.memories
            .iter()
            .filter(|m| m.status == Status::Quarantined)
            .filter(|m| agent.is_none_or(|a| m.agent == a))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Operator review of a quarantined memory. Activation re-runs the
    /// structural conflict check against the current graph.
    pub fn review_quarantine(
        &mut self,
        id: &str,
        action: ReviewAction,
        reason: Option<String>,
    ) -> Result<Memory> {
        let pos = self.position(id)?;
        if self.memories[pos].status != Status::Quarantined {
            return Err(EngineError::Conflict(format!(
                "memory {id} is not quarantined"
            )));
        }
        let now = self.now();

        match action {
            ReviewAction::Reject => {
                let mut memory = self.memories[pos].clone();
                Self::lift_quarantine(&mut memory, reason.as_deref().unwrap_or("rejected"), now);
                let copy = memory.to_archive_copy(now, Some("quarantine_rejected"));
                self.append_archive(vec![copy.clone()])?;
                let mut touched = HashSet::new();
                self.remove_memories(&[id.to_string()], &mut touched);
                self.persist_removals(&[id.to_string()], &touched)?;
                Ok(copy)
            }
            ReviewAction::Activate => {
                let mut memory = self.memories[pos].clone();
                Self::lift_quarantine(&mut memory, reason.as_deref().unwrap_or("activated"), now);
                memory.status = Status::Active;
                memory.touch(now);

                let mut events = Vec::new();
                let mut touched = HashSet::new();
                let check = self.check_structural_conflicts(
                    &mut memory,
                    OnConflict::Quarantine,
                    &mut events,
                    &mut touched,
                )?;

                // Positions are stable here: the check only mutates fields.
                let pos = self.position(id)?;
                self.memories[pos] = memory.clone();
                touched.insert(id.to_string());

                self.persist_memories(&touched)?;
                if check.conflicts_dirty {
                    self.persist_conflicts()?;
                }
                for event in &events {
                    self.emit(event);
                }
                Ok(memory)
            }
        }
    }

    // ========================================================================
    // REMOVAL PLUMBING
    // ========================================================================

    /// Remove memories from the active set and every index, pruning broken
    /// links on the survivors. Ids of survivors whose links changed are
    /// added to `touched`.
    pub(crate) fn remove_memories(&mut self, ids: &[String], touched: &mut HashSet<String>) {
        if ids.is_empty() {
            return;
        }
        let doomed: HashSet<&String> = ids.iter().collect();
        self.memories.retain(|m| !doomed.contains(&m.id));
        for memory in &mut self.memories {
            let before = memory.links.len();
            memory.links.retain(|l| !doomed.contains(&l.target_id));
            if memory.links.len() != before {
                touched.insert(memory.id.clone());
            }
        }
        self.indexes.rebuild(&self.memories);
        touched.retain(|id| self.indexes.contains(id));
        tracing::debug!(removed = ids.len(), "memories removed from active set");
    }
}
