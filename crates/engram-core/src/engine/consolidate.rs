//! Consolidation - the full maintenance pass
//!
//! Five phases over the whole graph: embedding dedup, structural
//! contradiction sweep, cross-source corroboration, stale-cluster
//! compression, and pruning. Dry-run computes the identical report against
//! a scratch copy of the state and restores it before returning.

use std::collections::HashSet;
use std::time::Instant;

use crate::error::Result;
use crate::events::EngineEvent;
use crate::memory::{
    Category, ClaimScope, Compressed, CompressionMethod, Link, LinkType, Memory, Status,
};
use crate::schema::{Cardinality, ConflictPolicy};
use crate::scoring;

use super::MemoryGraph;

// ============================================================================
// OPTIONS AND REPORT
// ============================================================================

/// Options for [`MemoryGraph::consolidate`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsolidateOptions {
    /// Compute the report without mutating or persisting anything
    pub dry_run: bool,
}

/// The single report a consolidation pass produces
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    pub deduplicated: usize,
    pub contradictions_resolved: usize,
    pub contradictions_pending: usize,
    pub corroborated: usize,
    pub compressed_clusters: usize,
    pub compressed_source_memories: usize,
    pub pruned_superseded: usize,
    pub pruned_decayed: usize,
    pub pruned_disputed: usize,
    pub pruned_quarantined: usize,
    pub before_total: usize,
    pub before_active: usize,
    pub after_total: usize,
    pub after_active: usize,
    pub duration_ms: u64,
    pub dry_run: bool,
}

impl MemoryGraph {
    /// Run the full maintenance pass.
    pub fn consolidate(&mut self, options: &ConsolidateOptions) -> Result<ConsolidationReport> {
        let start = Instant::now();
        let now = self.now();
        let snapshot = options.dry_run.then(|| self.memories.clone());

        let mut report = ConsolidationReport {
            before_total: self.memories.len(),
            before_active: self.active_count(),
            dry_run: options.dry_run,
            ..Default::default()
        };
        let mut archive_copies: Vec<Memory> = Vec::new();
        let mut digest_events: Vec<EngineEvent> = Vec::new();

        self.phase_dedup(&mut report, now);
        self.phase_contradictions(&mut report, now);
        self.phase_corroborate(&mut report, now);
        self.phase_compress_stale(&mut report, &mut digest_events, now)?;
        self.phase_prune(&mut report, &mut archive_copies, now);

        report.after_total = self.memories.len();
        report.after_active = self.active_count();
        report.duration_ms = start.elapsed().as_millis() as u64;

        if let Some(snapshot) = snapshot {
            self.memories = snapshot;
            self.indexes.rebuild(&self.memories);
            return Ok(report);
        }

        self.append_archive(archive_copies)?;
        self.persist_all_memories()?;
        for event in &digest_events {
            self.emit(event);
        }
        tracing::info!(
            deduplicated = report.deduplicated,
            corroborated = report.corroborated,
            pruned = report.pruned_superseded
                + report.pruned_decayed
                + report.pruned_disputed
                + report.pruned_quarantined,
            "consolidation complete"
        );
        self.emit(&EngineEvent::Consolidate {
            duration_ms: report.duration_ms,
        });
        Ok(report)
    }

    fn active_count(&self) -> usize {
        self.memories
            .iter()
            .filter(|m| m.status == Status::Active)
            .count()
    }

    // ========================================================================
    // PHASE 1: EMBEDDING DEDUP
    // ========================================================================

    /// Near-identical pairs collapse: the higher-trust member stays active
    /// and absorbs the loser's tags and links.
    fn phase_dedup(&mut self, report: &mut ConsolidationReport, now: chrono::DateTime<chrono::Utc>) {
        let pairs = self.similar_pairs(self.config.dedup_threshold, f64::INFINITY, true);
        for (a, b) in pairs {
            if self.memories[a].status != Status::Active
                || self.memories[b].status != Status::Active
            {
                continue;
            }
            let (winner, loser) = if self.memories[a].provenance.trust
                >= self.memories[b].provenance.trust
            {
                (a, b)
            } else {
                (b, a)
            };
            let winner_id = self.memories[winner].id.clone();
            let loser_id = self.memories[loser].id.clone();

            let loser_tags = self.memories[loser].tags.clone();
            let loser_links = self.memories[loser].links.clone();
            {
                let memory = &mut self.memories[loser];
                memory.status = Status::Superseded;
                memory.superseded_by = Some(winner_id.clone());
                memory.touch(now);
            }
            let mut adopted: Vec<Link> = Vec::new();
            {
                let memory = &mut self.memories[winner];
                memory.supersedes.push(loser_id.clone());
                for tag in loser_tags {
                    if !memory.tags.contains(&tag) {
                        memory.tags.push(tag);
                    }
                }
                for link in loser_links {
                    if link.target_id != winner_id
                        && !memory.links.iter().any(|l| l.target_id == link.target_id)
                    {
                        memory.links.push(link.clone());
                        adopted.push(link);
                    }
                }
                memory.provenance.corroboration = memory.provenance.corroboration.max(1) + 1;
                scoring::refresh_trust(memory, now);
                memory.touch(now);
            }
            // Mirror each adopted link so both endpoints stay in sync.
            for link in adopted {
                if let Some(target_pos) = self.indexes.position(&link.target_id) {
                    self.memories[target_pos].upsert_link(Link {
                        target_id: winner_id.clone(),
                        similarity: link.similarity,
                        link_type: link.link_type,
                    });
                    self.memories[target_pos].touch(now);
                }
            }
            report.deduplicated += 1;
        }
    }

    // ========================================================================
    // PHASE 2: STRUCTURAL CONTRADICTIONS
    // ========================================================================

    /// Sweep every claim key for active contradictions and apply
    /// trust-gated supersession; everything the gate cannot decide counts
    /// as pending.
    fn phase_contradictions(
        &mut self,
        report: &mut ConsolidationReport,
        now: chrono::DateTime<chrono::Utc>,
    ) {
        for (subject, predicate) in self.indexes.claim_keys() {
            let schema = self.schemas.effective(&predicate);
            if schema.cardinality != Cardinality::Single {
                continue;
            }
            let Some(ids) = self.indexes.claim_ids(&subject, &predicate) else {
                continue;
            };
            let mut positions: Vec<usize> = ids
                .iter()
                .filter_map(|id| self.indexes.position(id))
                .collect();
            positions.sort_unstable();

            for i in 0..positions.len() {
                for j in (i + 1)..positions.len() {
                    let (a, b) = (positions[i], positions[j]);
                    if self.memories[a].status != Status::Active
                        || self.memories[b].status != Status::Active
                    {
                        continue;
                    }
                    let (Some(ca), Some(cb)) =
                        (self.memories[a].claim.clone(), self.memories[b].claim.clone())
                    else {
                        continue;
                    };
                    if !ca.exclusive || !cb.exclusive {
                        continue;
                    }
                    if ca.comparable_value() == cb.comparable_value() {
                        continue;
                    }
                    if !ca.window_overlaps(&cb) {
                        continue;
                    }
                    // Session values shadowing globals are not
                    // contradictions.
                    if ca.scope != cb.scope
                        && (ca.scope == ClaimScope::Session || cb.scope == ClaimScope::Session)
                    {
                        continue;
                    }

                    if schema.conflict_policy == ConflictPolicy::Supersede {
                        let trust_a = self.memories[a].provenance.trust;
                        let trust_b = self.memories[b].provenance.trust;
                        if (trust_a - trust_b).abs() > f64::EPSILON {
                            let (winner, loser) = if trust_a > trust_b { (a, b) } else { (b, a) };
                            let winner_id = self.memories[winner].id.clone();
                            let loser_id = self.memories[loser].id.clone();
                            {
                                let memory = &mut self.memories[loser];
                                memory.status = Status::Superseded;
                                memory.superseded_by = Some(winner_id.clone());
                                memory.upsert_link(Link {
                                    target_id: winner_id.clone(),
                                    similarity: 1.0,
                                    link_type: LinkType::Supersedes,
                                });
                                memory.touch(now);
                            }
                            {
                                let memory = &mut self.memories[winner];
                                memory.supersedes.push(loser_id.clone());
                                memory.upsert_link(Link {
                                    target_id: loser_id,
                                    similarity: 1.0,
                                    link_type: LinkType::Supersedes,
                                });
                                memory.touch(now);
                            }
                            report.contradictions_resolved += 1;
                        } else {
                            report.contradictions_pending += 1;
                        }
                    } else {
                        report.contradictions_pending += 1;
                    }
                }
            }
        }
    }

    // ========================================================================
    // PHASE 3: CROSS-SOURCE CORROBORATION
    // ========================================================================

    /// Similar-but-not-identical pairs from different provenance sources
    /// corroborate the higher-trust member.
    fn phase_corroborate(
        &mut self,
        report: &mut ConsolidationReport,
        now: chrono::DateTime<chrono::Utc>,
    ) {
        let pairs =
            self.similar_pairs(self.config.corroborate_threshold, self.config.dedup_threshold, false);
        for (a, b) in pairs {
            if self.memories[a].status != Status::Active
                || self.memories[b].status != Status::Active
            {
                continue;
            }
            if self.memories[a].provenance.source == self.memories[b].provenance.source {
                continue;
            }
            let target = if self.memories[a].provenance.trust >= self.memories[b].provenance.trust {
                a
            } else {
                b
            };
            let memory = &mut self.memories[target];
            memory.provenance.corroboration = memory.provenance.corroboration.max(1) + 1;
            scoring::refresh_trust(memory, now);
            memory.touch(now);
            report.corroborated += 1;
        }
    }

    // ========================================================================
    // PHASE 4: STALE-CLUSTER COMPRESSION
    // ========================================================================

    /// Extractively digest up to 5 components whose members are all older
    /// than `compress_age_days` and which hold no digest yet. Persistence
    /// and events stay with the caller so dry-run does not leak.
    fn phase_compress_stale(
        &mut self,
        report: &mut ConsolidationReport,
        digest_events: &mut Vec<EngineEvent>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let mut seen: HashSet<usize> = HashSet::new();
        let mut stale: Vec<Vec<usize>> = Vec::new();
        for start in 0..self.memories.len() {
            if seen.contains(&start) {
                continue;
            }
            let component = self.component_from(start, &mut seen);
            if component.len() < 2 {
                continue;
            }
            let all_old = component.iter().all(|&pos| {
                scoring::days_between(self.memories[pos].created_at, now)
                    > self.config.compress_age_days
            });
            let has_digest = component
                .iter()
                .any(|&pos| self.memories[pos].category_kind() == Category::Digest);
            if all_old && !has_digest {
                stale.push(component);
            }
        }
        stale.truncate(5);

        for component in stale {
            let ids: Vec<String> = component
                .iter()
                .map(|&pos| self.memories[pos].id.clone())
                .collect();
            let text = self.extractive_text(&component);
            let digest_id = self.storage.gen_id();
            let importance = component
                .iter()
                .map(|&pos| self.memories[pos].importance)
                .fold(0.0_f64, f64::max);
            let agent = self.memories[component[0]].agent.clone();

            let mut digest = Memory::new(digest_id.clone(), agent, text, now);
            digest.category = Category::Digest.as_str().to_string();
            digest.importance = importance;
            digest.provenance.source = crate::memory::Source::System;
            digest.provenance.trust =
                scoring::compute_trust(digest.provenance.source, 1, 0, 0, 0.0);
            digest.confidence = scoring::confidence(digest.provenance.trust);
            digest.compressed = Some(Compressed {
                source_ids: ids.clone(),
                source_count: ids.len(),
                method: CompressionMethod::Extractive,
                compressed_at: now,
                episode_id: None,
            });
            digest.links = ids
                .iter()
                .map(|id| Link {
                    target_id: id.clone(),
                    similarity: 1.0,
                    link_type: LinkType::DigestOf,
                })
                .collect();

            let pos = self.memories.len();
            self.indexes.insert(&digest, pos);
            self.memories.push(digest);
            for id in &ids {
                if let Some(source_pos) = self.indexes.position(id) {
                    let source = &mut self.memories[source_pos];
                    source.upsert_link(Link {
                        target_id: digest_id.clone(),
                        similarity: 1.0,
                        link_type: LinkType::DigestedInto,
                    });
                    source.touch(now);
                }
            }

            digest_events.push(EngineEvent::Compress {
                digest_id,
                source_count: ids.len(),
            });
            report.compressed_clusters += 1;
            report.compressed_source_memories += ids.len();
        }
        Ok(())
    }

    // ========================================================================
    // PHASE 5: PRUNE
    // ========================================================================

    /// Archive-copy and remove worn-out memories, then clean broken links.
    fn phase_prune(
        &mut self,
        report: &mut ConsolidationReport,
        archive_copies: &mut Vec<Memory>,
        now: chrono::DateTime<chrono::Utc>,
    ) {
        let mut doomed: Vec<(String, &'static str)> = Vec::new();
        for memory in &self.memories {
            match memory.status {
                Status::Superseded => {
                    if scoring::days_between(memory.updated_at, now) > self.config.prune_age_days {
                        doomed.push((memory.id.clone(), "superseded"));
                    }
                }
                Status::Disputed => {
                    if memory.provenance.trust < 0.2 {
                        doomed.push((memory.id.clone(), "disputed"));
                    }
                }
                Status::Quarantined => {
                    let quarantined_at = memory
                        .quarantine
                        .as_ref()
                        .map(|q| q.created_at)
                        .unwrap_or(memory.updated_at);
                    if self.config.prune_quarantined
                        && memory.access_count == 0
                        && scoring::days_between(quarantined_at, now)
                            > self.config.quarantine_max_age_days
                    {
                        doomed.push((memory.id.clone(), "quarantined"));
                    }
                }
                Status::Active => {
                    let strength =
                        scoring::decay_strength(memory, self.config.half_life_days, now);
                    if strength < self.config.delete_threshold {
                        doomed.push((memory.id.clone(), "decayed"));
                    }
                }
                Status::Archived => {}
            }
        }

        if doomed.is_empty() {
            return;
        }
        for (id, reason) in &doomed {
            if let Some(pos) = self.indexes.position(id) {
                archive_copies.push(self.memories[pos].to_archive_copy(now, Some(reason)));
            }
            match *reason {
                "superseded" => report.pruned_superseded += 1,
                "disputed" => report.pruned_disputed += 1,
                "quarantined" => report.pruned_quarantined += 1,
                _ => report.pruned_decayed += 1,
            }
        }
        let ids: Vec<String> = doomed.into_iter().map(|(id, _)| id).collect();
        let mut touched = HashSet::new();
        self.remove_memories(&ids, &mut touched);
    }

    // ========================================================================
    // PAIR SCAN
    // ========================================================================

    /// Active pairs with cosine similarity between `low` and `high`
    /// (upper bound exclusive; lower bound inclusive when `inclusive_low`).
    fn similar_pairs(&self, low: f64, high: f64, inclusive_low: bool) -> Vec<(usize, usize)> {
        let embedded: Vec<usize> = self
            .memories
            .iter()
            .enumerate()
            .filter(|(_, m)| m.status == Status::Active && m.embedding.is_some())
            .map(|(pos, _)| pos)
            .collect();

        let mut pairs = Vec::new();
        for i in 0..embedded.len() {
            for j in (i + 1)..embedded.len() {
                let (a, b) = (embedded[i], embedded[j]);
                let (Some(va), Some(vb)) =
                    (&self.memories[a].embedding, &self.memories[b].embedding)
                else {
                    continue;
                };
                if let Ok(similarity) = crate::text::cosine_similarity(va, vb) {
                    let above = if inclusive_low {
                        similarity >= low
                    } else {
                        similarity > low
                    };
                    if above && similarity < high {
                        pairs.push((a, b));
                    }
                }
            }
        }
        pairs
    }
}
