//! Episodes - named, time-ranged groupings of memories
//!
//! The time range is always recomputed from the members' effective times
//! (`event_at || created_at`), as is the agent roster.

use chrono::{DateTime, Utc};

use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::memory::{Episode, TimeRange};
use crate::text::{cosine_similarity, tokenize};

use super::MemoryGraph;

/// Filter for [`MemoryGraph::list_episodes`]
#[derive(Debug, Clone, Default)]
pub struct EpisodeFilter {
    pub agent: Option<String>,
    pub tag: Option<String>,
}

/// A hit from [`MemoryGraph::search_episode`]
#[derive(Debug, Clone)]
pub struct EpisodeHit {
    pub id: String,
    pub text: String,
    pub score: f64,
}

impl MemoryGraph {
    // ========================================================================
    // CREATE / CAPTURE
    // ========================================================================

    /// Create an episode from explicit member ids.
    pub fn create_episode(
        &mut self,
        name: &str,
        memory_ids: Vec<String>,
        tags: Vec<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Episode> {
        if name.trim().is_empty() {
            return Err(EngineError::Invalid("episode name must not be empty".into()));
        }
        if memory_ids.is_empty() {
            return Err(EngineError::Invalid(
                "episode requires at least one memory id".into(),
            ));
        }
        for id in &memory_ids {
            self.require(id)?;
        }

        let now = self.now();
        let (agents, time_range) = self.roster_and_range(&memory_ids, now);
        let episode = Episode {
            id: self.storage.gen_episode_id(),
            name: name.trim().to_string(),
            summary: None,
            agents,
            memory_ids,
            tags,
            time_range,
            metadata,
            created_at: now,
            updated_at: now,
        };
        self.episodes.push(episode.clone());
        self.persist_episodes()?;
        self.emit(&EngineEvent::EpisodeCreate {
            id: episode.id.clone(),
        });
        Ok(episode)
    }

    /// Capture an episode from an agent's memories inside a time window.
    /// Returns None when fewer than `min_memories` qualify.
    pub fn capture_episode(
        &mut self,
        name: &str,
        agent: &str,
        start: &str,
        end: &str,
        min_memories: usize,
    ) -> Result<Option<Episode>> {
        self.validate_agent(agent)?;
        let start = self.parse_iso("start", start)?;
        let end = self.parse_iso("end", end)?;
        if end < start {
            return Err(EngineError::Invalid("end precedes start".into()));
        }

        let members: Vec<String> = self
            .memories
            .iter()
            .filter(|m| m.agent == agent)
            .filter(|m| {
                let t = m.effective_time();
                t >= start && t <= end
            })
            .map(|m| m.id.clone())
            .collect();
        if members.len() < min_memories.max(1) {
            return Ok(None);
        }
        self.create_episode(name, members, Vec::new(), None).map(Some)
    }

    // ========================================================================
    // MEMBERSHIP
    // ========================================================================

    /// Add members; the roster and time range recompute.
    pub fn add_to_episode(&mut self, episode_id: &str, memory_ids: &[String]) -> Result<Episode> {
        for id in memory_ids {
            self.require(id)?;
        }
        let idx = self.episode_index(episode_id)?;
        let now = self.now();
        for id in memory_ids {
            if !self.episodes[idx].memory_ids.contains(id) {
                self.episodes[idx].memory_ids.push(id.clone());
            }
        }
        self.refresh_episode(idx, now);
        let episode = self.episodes[idx].clone();
        self.persist_episodes()?;
        self.emit(&EngineEvent::EpisodeUpdate {
            id: episode_id.to_string(),
        });
        Ok(episode)
    }

    /// Remove members; the roster and time range recompute.
    pub fn remove_from_episode(
        &mut self,
        episode_id: &str,
        memory_ids: &[String],
    ) -> Result<Episode> {
        let idx = self.episode_index(episode_id)?;
        let now = self.now();
        self.episodes[idx]
            .memory_ids
            .retain(|id| !memory_ids.contains(id));
        self.refresh_episode(idx, now);
        let episode = self.episodes[idx].clone();
        self.persist_episodes()?;
        self.emit(&EngineEvent::EpisodeUpdate {
            id: episode_id.to_string(),
        });
        Ok(episode)
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn get_episode(&self, episode_id: &str) -> Result<Episode> {
        let idx = self.episode_index(episode_id)?;
        Ok(self.episodes[idx].clone())
    }

    pub fn list_episodes(&self, filter: &EpisodeFilter) -> Vec<Episode> {
        self.episodes
            .iter()
            .filter(|e| {
                filter
                    .agent
                    .as_deref()
                    .is_none_or(|a| e.agents.iter().any(|x| x == a))
            })
            .filter(|e| {
                filter
                    .tag
                    .as_deref()
                    .is_none_or(|t| e.tags.iter().any(|x| x == t))
            })
            .cloned()
            .collect()
    }

    /// Search within an episode: semantic when both the query and members
    /// have embeddings, substring otherwise.
    pub fn search_episode(
        &mut self,
        episode_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<EpisodeHit>> {
        if query.trim().is_empty() {
            return Err(EngineError::Invalid("query must not be empty".into()));
        }
        let idx = self.episode_index(episode_id)?;
        let member_ids = self.episodes[idx].memory_ids.clone();
        let query_embedding = self
            .embed_queries(std::slice::from_ref(&query.to_string()))?
            .into_iter()
            .next()
            .flatten();

        let mut hits: Vec<EpisodeHit> = Vec::new();
        match query_embedding {
            Some(vector) => {
                for id in &member_ids {
                    let Some(pos) = self.indexes.position(id) else {
                        continue;
                    };
                    let memory = &self.memories[pos];
                    let Some(member_vector) = &memory.embedding else {
                        continue;
                    };
                    if let Ok(similarity) = cosine_similarity(&vector, member_vector) {
                        hits.push(EpisodeHit {
                            id: id.clone(),
                            text: memory.text.clone(),
                            score: similarity,
                        });
                    }
                }
            }
            None => {
                let needle = query.to_lowercase();
                let query_tokens = tokenize(query);
                for id in &member_ids {
                    let Some(pos) = self.indexes.position(id) else {
                        continue;
                    };
                    let memory = &self.memories[pos];
                    let text = memory.text.to_lowercase();
                    let score = if !query_tokens.is_empty() {
                        let member_tokens: std::collections::HashSet<String> =
                            tokenize(&memory.text).into_iter().collect();
                        let matched = query_tokens
                            .iter()
                            .filter(|t| member_tokens.contains(*t))
                            .count();
                        matched as f64 / query_tokens.len() as f64
                    } else if text.contains(&needle) {
                        1.0
                    } else {
                        0.0
                    };
                    if score > 0.0 {
                        hits.push(EpisodeHit {
                            id: id.clone(),
                            text: memory.text.clone(),
                            score,
                        });
                    }
                }
            }
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Summarize an episode through the chat adapter.
    pub fn summarize_episode(&mut self, episode_id: &str) -> Result<Episode> {
        let idx = self.episode_index(episode_id)?;
        let chat = self
            .chat
            .as_ref()
            .ok_or(EngineError::AdapterMissing("chat"))?;

        let member_texts: Vec<String> = self.episodes[idx]
            .memory_ids
            .iter()
            .filter_map(|id| self.indexes.position(id))
            .map(|pos| format!("- {}", self.memories[pos].text))
            .collect();
        let prompt = format!(
            "Summarize the following agent memories into one short paragraph. \
             Preserve concrete facts and decisions.\n\n{}",
            member_texts.join("\n")
        );
        let summary = chat.chat(&prompt)?;

        let now = self.now();
        self.episodes[idx].summary = Some(summary.trim().to_string());
        self.episodes[idx].updated_at = now;
        let episode = self.episodes[idx].clone();
        self.persist_episodes()?;
        self.emit(&EngineEvent::EpisodeSummarize {
            id: episode_id.to_string(),
        });
        Ok(episode)
    }

    /// Delete an episode. Member memories are untouched.
    pub fn delete_episode(&mut self, episode_id: &str) -> Result<()> {
        let idx = self.episode_index(episode_id)?;
        self.episodes.remove(idx);
        self.persist_episodes()?;
        self.emit(&EngineEvent::EpisodeDelete {
            id: episode_id.to_string(),
        });
        Ok(())
    }

    // ========================================================================
    // PLUMBING
    // ========================================================================

    pub(crate) fn episode_index(&self, episode_id: &str) -> Result<usize> {
        self.episodes
            .iter()
            .position(|e| e.id == episode_id)
            .ok_or_else(|| EngineError::NotFound(format!("episode {episode_id}")))
    }

    fn refresh_episode(&mut self, idx: usize, now: DateTime<Utc>) {
        let member_ids = self.episodes[idx].memory_ids.clone();
        let (agents, time_range) = self.roster_and_range(&member_ids, now);
        let episode = &mut self.episodes[idx];
        episode.agents = agents;
        episode.time_range = time_range;
        episode.updated_at = now;
    }

    /// Distinct agents and min/max effective time over members; an empty
    /// member list collapses the range onto `now`.
    fn roster_and_range(
        &self,
        memory_ids: &[String],
        now: DateTime<Utc>,
    ) -> (Vec<String>, TimeRange) {
        let mut agents: Vec<String> = Vec::new();
        let mut start: Option<DateTime<Utc>> = None;
        let mut end: Option<DateTime<Utc>> = None;
        for id in memory_ids {
            let Some(pos) = self.indexes.position(id) else {
                continue;
            };
            let memory = &self.memories[pos];
            if !agents.contains(&memory.agent) {
                agents.push(memory.agent.clone());
            }
            let t = memory.effective_time();
            start = Some(start.map_or(t, |s| s.min(t)));
            end = Some(end.map_or(t, |e| e.max(t)));
        }
        (
            agents,
            TimeRange {
                start: start.unwrap_or(now),
                end: end.unwrap_or(now),
            },
        )
    }
}
