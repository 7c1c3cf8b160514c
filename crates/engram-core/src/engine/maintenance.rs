//! Decay and reinforcement
//!
//! Decay buckets every memory by its current strength and archives or
//! deletes the weak ones; reinforce is the write side of the SM-2 state.
//! Dispute and corroborate adjust the trust inputs directly.

use std::collections::HashSet;

use crate::error::Result;
use crate::events::EngineEvent;
use crate::memory::{Memory, Status};
use crate::scoring;

use super::MemoryGraph;

// ============================================================================
// REPORT
// ============================================================================

/// Outcome of one decay pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecayReport {
    pub total: usize,
    pub healthy: usize,
    pub weakening: usize,
    pub archived: usize,
    pub deleted: usize,
    pub dry_run: bool,
}

impl MemoryGraph {
    // ========================================================================
    // DECAY
    // ========================================================================

    /// Bucket all memories by strength; unless `dry_run`, archive-copy and
    /// remove the weak buckets and prune broken links on survivors.
    pub fn decay(&mut self, dry_run: bool) -> Result<DecayReport> {
        let now = self.now();
        let mut report = DecayReport {
            total: self.memories.len(),
            dry_run,
            ..Default::default()
        };

        let mut archive_bucket: Vec<String> = Vec::new();
        let mut delete_bucket: Vec<String> = Vec::new();
        for memory in &self.memories {
            let strength = scoring::decay_strength(memory, self.config.half_life_days, now);
            if strength < self.config.delete_threshold {
                delete_bucket.push(memory.id.clone());
            } else if strength < self.config.archive_threshold {
                archive_bucket.push(memory.id.clone());
            } else if strength < 0.3 {
                report.weakening += 1;
            } else {
                report.healthy += 1;
            }
        }
        report.archived = archive_bucket.len();
        report.deleted = delete_bucket.len();

        if dry_run {
            return Ok(report);
        }
        if archive_bucket.is_empty() && delete_bucket.is_empty() {
            return Ok(report);
        }

        let mut copies = Vec::with_capacity(report.archived + report.deleted);
        for id in archive_bucket.iter().chain(delete_bucket.iter()) {
            if let Some(pos) = self.indexes.position(id) {
                copies.push(self.memories[pos].to_archive_copy(now, Some("decayed")));
            }
        }
        self.append_archive(copies)?;

        let mut touched = HashSet::new();
        let removed: Vec<String> = archive_bucket
            .into_iter()
            .chain(delete_bucket.into_iter())
            .collect();
        self.remove_memories(&removed, &mut touched);
        self.persist_removals(&removed, &touched)?;

        tracing::info!(
            archived = report.archived,
            deleted = report.deleted,
            "decay pass complete"
        );
        self.emit(&EngineEvent::Decay {
            archived: report.archived,
            deleted: report.deleted,
        });
        Ok(report)
    }

    // ========================================================================
    // REINFORCE
    // ========================================================================

    /// Strengthen a memory: bump importance and counters, refresh trust,
    /// and advance the SM-2 state with a spacing-capped stability update.
    pub fn reinforce(&mut self, id: &str, boost: f64) -> Result<Memory> {
        let pos = self.position(id)?;
        let now = self.now();
        let initial_stability = self.config.initial_stability;
        let growth = self.config.stability_growth;

        let memory = &mut self.memories[pos];
        memory.importance = (memory.importance + boost).min(1.0);
        memory.access_count += 1;
        memory.reinforcements += 1;
        scoring::refresh_trust(memory, now);

        let interval = scoring::days_between(memory.updated_at, now).max(0.01);
        let prev_interval = memory.last_review_interval.unwrap_or(0.0);
        let spacing_factor = (interval / prev_interval.max(1.0)).min(3.0);
        let stability = memory.stability.unwrap_or(initial_stability);
        memory.stability = Some(stability * (1.0 + (growth - 1.0) * spacing_factor / 3.0));
        memory.last_review_interval = Some(interval);
        memory.touch(now);

        let projection = memory.clone();
        self.persist_memories(&HashSet::from([id.to_string()]))?;
        tracing::debug!(%id, stability = ?projection.stability, "memory reinforced");
        Ok(projection)
    }

    // ========================================================================
    // DISPUTE AND CORROBORATE
    // ========================================================================

    /// Dispute a memory; trust falling under 0.3 moves an active memory to
    /// `disputed`.
    pub fn dispute(&mut self, id: &str, reason: Option<&str>) -> Result<Memory> {
        let pos = self.position(id)?;
        let now = self.now();

        let memory = &mut self.memories[pos];
        memory.disputes += 1;
        scoring::refresh_trust(memory, now);
        if memory.provenance.trust < 0.3 && memory.status == Status::Active {
            memory.status = Status::Disputed;
        }
        memory.touch(now);
        let trust = memory.provenance.trust;
        let projection = memory.clone();

        if let Some(reason) = reason {
            tracing::debug!(%id, trust, reason, "memory disputed");
        }
        self.persist_memories(&HashSet::from([id.to_string()]))?;
        self.emit(&EngineEvent::Dispute {
            id: id.to_string(),
            trust,
        });
        Ok(projection)
    }

    /// Record an independent confirmation.
    pub fn corroborate(&mut self, id: &str) -> Result<Memory> {
        let pos = self.position(id)?;
        let now = self.now();

        let memory = &mut self.memories[pos];
        memory.provenance.corroboration = memory.provenance.corroboration.max(1) + 1;
        scoring::refresh_trust(memory, now);
        memory.touch(now);
        let corroboration = memory.provenance.corroboration;
        let projection = memory.clone();

        self.persist_memories(&HashSet::from([id.to_string()]))?;
        self.emit(&EngineEvent::Corroborate {
            id: id.to_string(),
            corroboration,
        });
        Ok(projection)
    }
}
