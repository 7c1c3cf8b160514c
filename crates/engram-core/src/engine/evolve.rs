//! Evolve - LLM-guided conflict resolution on the write path
//!
//! A rate-limited shim kept for front ends that predate structural claims.
//! The chat adapter classifies the incoming text against its nearest
//! neighbors; contradicted memories are archived, updated memories are
//! edited in place, and genuinely novel text falls through to the normal
//! store path.

use std::collections::HashSet;
use std::time::Instant;

use serde::Deserialize;

use crate::error::{EngineError, Result};
use crate::memory::{EvolutionStep, Link, LinkType, Status};
use crate::text::cosine_similarity;

use super::store::StoreOptions;
use super::{MemoryGraph, StoreOutcome};

/// Neighbors below this similarity are not worth classifying.
const EVOLVE_SIMILARITY_FLOOR: f64 = 0.6;
const EVOLVE_CANDIDATE_CAP: usize = 10;

// ============================================================================
// OUTCOME
// ============================================================================

/// What the evolve path did
#[derive(Debug, Clone)]
pub struct EvolveOutcome {
    /// `"updated"` when an existing memory was edited in place,
    /// `"stored"` when the text fell through to the store path
    pub action: &'static str,
    pub id: String,
    /// Memories archived as contradicted by the new text
    pub archived_conflicts: Vec<String>,
    /// Store result when the text was stored as new
    pub store: Option<StoreOutcome>,
    /// Chat classification failure, surfaced inline; the text is treated
    /// as novel when set
    pub error: Option<String>,
}

/// Strict shape the chat adapter must return
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Classification {
    #[serde(default)]
    conflicts: Vec<usize>,
    #[serde(default)]
    updates: Vec<usize>,
}

impl MemoryGraph {
    /// Evolve an agent's memory with a new text. Sleeps out the remainder
    /// of the configured minimum interval when called too quickly.
    pub fn evolve(
        &mut self,
        agent: &str,
        text: &str,
        importance: f64,
        category: Option<String>,
    ) -> Result<EvolveOutcome> {
        if let Some(last) = self.last_evolve_at {
            let elapsed = last.elapsed();
            if elapsed < self.config.evolve_min_interval {
                let gap = self.config.evolve_min_interval - elapsed;
                tracing::debug!(?gap, "evolve rate limit, sleeping");
                std::thread::sleep(gap);
            }
        }
        self.last_evolve_at = Some(Instant::now());

        self.validate_agent(agent)?;
        self.validate_text(text)?;

        let embedding = self
            .embed_texts(std::slice::from_ref(&text.to_string()))?
            .into_iter()
            .next()
            .flatten();

        // Nearest same-agent neighbors worth classifying. Ids, not
        // positions: the conflict removal below shifts the list.
        let mut candidates: Vec<(String, f64)> = Vec::new();
        if let Some(vector) = &embedding {
            for memory in &self.memories {
                if memory.agent != agent || memory.status != Status::Active {
                    continue;
                }
                let Some(candidate_vector) = &memory.embedding else {
                    continue;
                };
                if let Ok(similarity) = cosine_similarity(vector, candidate_vector) {
                    if similarity > EVOLVE_SIMILARITY_FLOOR {
                        candidates.push((memory.id.clone(), similarity));
                    }
                }
            }
            candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            candidates.truncate(EVOLVE_CANDIDATE_CAP);
        }

        let mut classification = Classification {
            conflicts: Vec::new(),
            updates: Vec::new(),
        };
        let mut parse_error: Option<String> = None;
        if !candidates.is_empty() {
            if let Some(chat) = &self.chat {
                let numbered: Vec<String> = candidates
                    .iter()
                    .enumerate()
                    .filter_map(|(i, (id, _))| {
                        let pos = self.indexes.position(id)?;
                        Some(format!("{i}. {}", self.memories[pos].text))
                    })
                    .collect();
                let prompt = format!(
                    "A new memory arrives:\n\"{text}\"\n\nExisting memories:\n{}\n\n\
                     Reply with ONLY a JSON object of the form \
                     {{\"conflicts\": [indices the new memory contradicts], \
                     \"updates\": [indices the new memory updates or extends]}}. \
                     Use empty arrays when nothing applies.",
                    numbered.join("\n")
                );
                match chat.chat(&prompt) {
                    Ok(raw) => match serde_json::from_str::<Classification>(raw.trim()) {
                        Ok(parsed) => {
                            let in_bounds = parsed
                                .conflicts
                                .iter()
                                .chain(parsed.updates.iter())
                                .all(|&i| i < candidates.len());
                            if in_bounds {
                                classification = parsed;
                            } else {
                                parse_error = Some(
                                    EngineError::LlmParse(
                                        "classification index out of bounds".into(),
                                    )
                                    .to_string(),
                                );
                            }
                        }
                        Err(err) => {
                            parse_error = Some(
                                EngineError::LlmParse(format!("bad classification JSON: {err}"))
                                    .to_string(),
                            );
                        }
                    },
                    Err(err) => {
                        parse_error = Some(err.to_string());
                    }
                }
            }
        }

        let now = self.now();

        // Archive contradicted memories before anything else.
        let conflict_ids: Vec<String> = classification
            .conflicts
            .iter()
            .filter_map(|&i| candidates.get(i))
            .map(|(id, _)| id.clone())
            .collect();
        if !conflict_ids.is_empty() {
            let mut copies = Vec::with_capacity(conflict_ids.len());
            for id in &conflict_ids {
                if let Some(pos) = self.indexes.position(id) {
                    copies.push(
                        self.memories[pos].to_archive_copy(now, Some("superseded_by_evolution")),
                    );
                }
            }
            self.append_archive(copies)?;
            let mut touched = HashSet::new();
            self.remove_memories(&conflict_ids, &mut touched);
            self.persist_removals(&conflict_ids, &touched)?;
        }

        // First update wins: edit the existing memory's text in place.
        // Positions may have shifted after the conflict removal, so go
        // through ids.
        let update_id = classification
            .updates
            .first()
            .and_then(|&i| candidates.get(i))
            .map(|(id, _)| id.clone())
            // The update target may itself have been archived as a conflict.
            .filter(|id| self.indexes.contains(id));
        if let Some(id) = update_id {
            let pos = self.position(&id)?;
            let old_text = self.memories[pos].text.clone();
            self.indexes.reindex_text(&id, &old_text, text);

            let memory = &mut self.memories[pos];
            memory.text = text.to_string();
            memory.importance = memory.importance.max(importance);
            memory.embedding = embedding;
            memory.evolution.push(EvolutionStep {
                from: old_text,
                to: text.to_string(),
                reason: "evolve".to_string(),
                at: now,
            });
            memory.touch(now);

            self.persist_memories(&HashSet::from([id.clone()]))?;
            tracing::info!(%id, "memory evolved in place");
            return Ok(EvolveOutcome {
                action: "updated",
                id,
                archived_conflicts: conflict_ids,
                store: None,
                error: parse_error,
            });
        }

        // Novel: normal store path, then supersedes links onto whatever
        // was archived above.
        let outcome = self.store(
            agent,
            text,
            StoreOptions {
                importance: Some(importance.clamp(0.0, 1.0)),
                category,
                ..Default::default()
            },
        )?;
        if !conflict_ids.is_empty() {
            if let Some(pos) = self.indexes.position(&outcome.id) {
                let memory = &mut self.memories[pos];
                for conflict_id in &conflict_ids {
                    memory.supersedes.push(conflict_id.clone());
                    memory.upsert_link(Link {
                        target_id: conflict_id.clone(),
                        similarity: 1.0,
                        link_type: LinkType::Supersedes,
                    });
                }
                self.persist_memories(&HashSet::from([outcome.id.clone()]))?;
            }
        }

        Ok(EvolveOutcome {
            action: "stored",
            id: outcome.id.clone(),
            archived_conflicts: conflict_ids,
            store: Some(outcome),
            error: parse_error,
        })
    }
}
