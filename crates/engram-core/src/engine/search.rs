//! Search and ranking
//!
//! Vector search when an embedding is available (server-side when the
//! storage adapter offers it, client-side cosine otherwise), keyword
//! scoring as the fallback, and a composite rerank over relevance,
//! confidence, recency, and importance.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::adapters::VectorSearchRequest;
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::memory::{ClaimScope, Memory, Quarantine, Status};
use crate::scoring;
use crate::text::{cosine_similarity, tokenize};

use super::{MemoryGraph, Weights};

/// Rerank weights, as supplied per query
pub type RerankWeights = Weights;

/// Candidate sets above this size get narrowed through the token index
/// before the cosine scan.
const NARROW_THRESHOLD: usize = 500;

// ============================================================================
// OPTIONS
// ============================================================================

/// Rerank control: default weights, off, or custom weights
#[derive(Debug, Clone, Copy, Default)]
pub enum Rerank {
    #[default]
    Default,
    Off,
    Weights(Weights),
}

/// Options for [`MemoryGraph::search`]
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub min_similarity: f64,
    /// ISO-8601 bounds over `event_at || created_at`
    pub before: Option<String>,
    pub after: Option<String>,
    pub rerank: Rerank,
    /// Ignore the status filter entirely
    pub include_all: bool,
    pub include_superseded: bool,
    pub include_disputed: bool,
    pub include_quarantined: bool,
    pub session_id: Option<String>,
    pub explain: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            min_similarity: 0.3,
            before: None,
            after: None,
            rerank: Rerank::Default,
            include_all: false,
            include_superseded: false,
            include_disputed: false,
            include_quarantined: false,
            session_id: None,
            explain: false,
        }
    }
}

// ============================================================================
// RESULTS
// ============================================================================

/// Why candidates were excluded, by reason
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExcludedBreakdown {
    pub superseded: usize,
    pub disputed: usize,
    pub quarantined: usize,
    pub archived: usize,
    pub below_min_similarity: usize,
    pub scope_mismatch: usize,
    pub validity_mismatch: usize,
}

/// Query-level diagnostics, attached when `explain` is set
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMeta {
    pub query: String,
    pub agent: Option<String>,
    pub limit: usize,
    pub min_similarity: f64,
    pub rerank: bool,
    pub candidates: usize,
    pub returned: usize,
    pub excluded: ExcludedBreakdown,
}

/// Per-hit diagnostics, attached when `explain` is set
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HitExplain {
    pub retrieved: RetrievedExplain,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank: Option<RerankExplain>,
    pub status: StatusExplain,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedExplain {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_score: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keyword_hits: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RerankExplain {
    pub weights: WeightsExplain,
    pub signals: SignalsExplain,
    pub composite_score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightsExplain {
    pub relevance: f64,
    pub confidence: f64,
    pub recency: f64,
    pub importance: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalsExplain {
    pub relevance: f64,
    pub confidence: f64,
    pub recency: f64,
    pub importance: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusExplain {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quarantine: Option<Quarantine>,
}

/// One search result
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub memory: Memory,
    /// Final ordering score: composite when reranked, raw similarity
    /// otherwise
    pub score: f64,
    pub vector_similarity: Option<f64>,
    pub keyword_score: Option<f64>,
    pub explain: Option<HitExplain>,
}

/// Result list plus optional diagnostics
#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub meta: Option<SearchMeta>,
}

struct Candidate {
    pos: usize,
    vector_similarity: Option<f64>,
    keyword_score: Option<f64>,
    keyword_hits: Vec<String>,
}

impl MemoryGraph {
    // ========================================================================
    // PUBLIC API
    // ========================================================================

    /// Search memories for one query.
    pub fn search(
        &mut self,
        agent: Option<&str>,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        if query.trim().is_empty() {
            return Err(EngineError::Invalid("query must not be empty".into()));
        }
        let embedding = self
            .embed_queries(std::slice::from_ref(&query.to_string()))?
            .into_iter()
            .next()
            .flatten();
        let response = self.search_with_embedding(agent, query, options, embedding.as_deref())?;
        self.emit(&EngineEvent::Search {
            agent: agent.map(str::to_string),
            query: query.to_string(),
            results: response.hits.len(),
        });
        Ok(response)
    }

    /// Search many queries, embedding them all in one adapter call.
    pub fn search_many(
        &mut self,
        agent: Option<&str>,
        queries: &[String],
        options: &SearchOptions,
    ) -> Result<Vec<SearchResponse>> {
        if queries.is_empty() {
            return Err(EngineError::Invalid("search_many requires at least one query".into()));
        }
        if queries.len() > self.config.max_batch_queries {
            return Err(EngineError::CapacityExceeded(format!(
                "query batch of {} exceeds limit {}",
                queries.len(),
                self.config.max_batch_queries
            )));
        }
        for query in queries {
            if query.trim().is_empty() {
                return Err(EngineError::Invalid("query must not be empty".into()));
            }
        }

        let embeddings = self.embed_queries(queries)?;
        let mut responses = Vec::with_capacity(queries.len());
        for (query, embedding) in queries.iter().zip(embeddings.into_iter()) {
            let response =
                self.search_with_embedding(agent, query, options, embedding.as_deref())?;
            self.emit(&EngineEvent::Search {
                agent: agent.map(str::to_string),
                query: query.clone(),
                results: response.hits.len(),
            });
            responses.push(response);
        }
        Ok(responses)
    }

    // ========================================================================
    // CORE ALGORITHM
    // ========================================================================

    fn search_with_embedding(
        &self,
        agent: Option<&str>,
        query: &str,
        options: &SearchOptions,
        embedding: Option<&[f64]>,
    ) -> Result<SearchResponse> {
        let now = self.now();
        let before = options
            .before
            .as_deref()
            .map(|t| self.parse_iso("before", t))
            .transpose()?;
        let after = options
            .after
            .as_deref()
            .map(|t| self.parse_iso("after", t))
            .transpose()?;

        let mut excluded = ExcludedBreakdown::default();

        // 1-2. Candidate set: agent, status, and temporal filters.
        // Memories carrying a claim scoped to the requested session are
        // unioned in past the agent filter (status and temporal filters
        // still apply); the override below then suppresses the globals
        // they shadow.
        let session_id = options.session_id.as_deref();
        let mut candidate_positions: Vec<usize> = Vec::new();
        for (pos, memory) in self.memories.iter().enumerate() {
            let session_match = session_id.is_some_and(|sid| {
                memory.claim.as_ref().is_some_and(|claim| {
                    claim.scope == ClaimScope::Session
                        && claim.session_id.as_deref() == Some(sid)
                })
            });
            if !session_match {
                if let Some(a) = agent {
                    if memory.agent != a {
                        continue;
                    }
                }
            }
            if !options.include_all && !self.status_allowed(memory.status, options, &mut excluded) {
                continue;
            }
            let t = memory.effective_time();
            if before.is_some_and(|b| t >= b) || after.is_some_and(|a| t <= a) {
                excluded.validity_mismatch += 1;
                continue;
            }
            candidate_positions.push(pos);
        }
        let candidate_count = candidate_positions.len();

        // 3. Server-side vector search delegation.
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut delegated = false;
        if let Some(vector) = embedding {
            if self.storage.capabilities().vector_search {
                let statuses = self.allowed_statuses(options);
                let request = VectorSearchRequest {
                    embedding: vector,
                    agent,
                    limit: options.limit,
                    min_similarity: options.min_similarity,
                    statuses: &statuses,
                };
                if let Some(rows) = self.storage.vector_search(&request)? {
                    delegated = true;
                    for row in rows {
                        if let Some(pos) = self.indexes.position(&row.id) {
                            candidates.push(Candidate {
                                pos,
                                vector_similarity: Some(row.similarity),
                                keyword_score: None,
                                keyword_hits: Vec::new(),
                            });
                        }
                    }
                }
            }
        }

        if !delegated {
            match embedding {
                // 4. Client-side cosine scan, narrowed for large sets.
                Some(vector) => {
                    let scan = self.narrow_candidates(&candidate_positions, query, options.limit);
                    for pos in scan {
                        let memory = &self.memories[pos];
                        let Some(candidate_vector) = &memory.embedding else {
                            continue;
                        };
                        let similarity = match cosine_similarity(vector, candidate_vector) {
                            Ok(s) => s,
                            // Stale embeddings from another model; skip.
                            Err(EngineError::DimensionMismatch { .. }) => continue,
                            Err(err) => return Err(err),
                        };
                        if similarity < options.min_similarity {
                            excluded.below_min_similarity += 1;
                            continue;
                        }
                        candidates.push(Candidate {
                            pos,
                            vector_similarity: Some(similarity),
                            keyword_score: None,
                            keyword_hits: Vec::new(),
                        });
                    }
                }
                // 5. Keyword fallback.
                None => {
                    let query_tokens = tokenize(query);
                    if query_tokens.is_empty() {
                        // Every query token was a stop word; substring
                        // rescue with a flat score.
                        let needle = query.to_lowercase();
                        for &pos in &candidate_positions {
                            if self.memories[pos].text.to_lowercase().contains(&needle) {
                                candidates.push(Candidate {
                                    pos,
                                    vector_similarity: None,
                                    keyword_score: Some(1.0),
                                    keyword_hits: Vec::new(),
                                });
                            }
                        }
                    } else {
                        for &pos in &candidate_positions {
                            let memory_tokens: HashSet<String> =
                                tokenize(&self.memories[pos].text).into_iter().collect();
                            let hits: Vec<String> = query_tokens
                                .iter()
                                .filter(|t| memory_tokens.contains(*t))
                                .cloned()
                                .collect();
                            if hits.is_empty() {
                                continue;
                            }
                            let score = hits.len() as f64 / query_tokens.len() as f64;
                            candidates.push(Candidate {
                                pos,
                                vector_similarity: None,
                                keyword_score: Some(score),
                                keyword_hits: hits,
                            });
                        }
                    }
                }
            }
        }

        // 6. Session override: session-scoped values shadow globals with
        // the same (subject, predicate).
        if let Some(session_id) = options.session_id.as_deref() {
            let mut session_keys: HashSet<(String, String)> = HashSet::new();
            for candidate in &candidates {
                if let Some(claim) = &self.memories[candidate.pos].claim {
                    if claim.scope == ClaimScope::Session
                        && claim.session_id.as_deref() == Some(session_id)
                    {
                        session_keys.insert((claim.subject.clone(), claim.predicate.clone()));
                    }
                }
            }
            if !session_keys.is_empty() {
                let before_len = candidates.len();
                candidates.retain(|candidate| {
                    let memory = &self.memories[candidate.pos];
                    match &memory.claim {
                        Some(claim)
                            if claim.scope != ClaimScope::Session
                                && session_keys.contains(&(
                                    claim.subject.clone(),
                                    claim.predicate.clone(),
                                )) =>
                        {
                            false
                        }
                        _ => true,
                    }
                });
                excluded.scope_mismatch += before_len - candidates.len();
            }
        }

        // 7-8. Confidence, rerank, and the final ordering.
        let (weights, rerank_on) = match options.rerank {
            Rerank::Default => (self.config.rerank_weights, true),
            Rerank::Weights(w) => (w, true),
            Rerank::Off => (self.config.rerank_weights, false),
        };

        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .map(|candidate| {
                let memory = &self.memories[candidate.pos];
                let confidence = if memory.confidence > 0.0 {
                    memory.confidence
                } else {
                    scoring::confidence(memory.provenance.trust)
                };
                let relevance = candidate
                    .vector_similarity
                    .or(candidate.keyword_score)
                    .unwrap_or(0.0);
                let recency = recency_factor(memory.updated_at, now);
                let composite = weights.relevance * relevance
                    + weights.confidence * confidence
                    + weights.recency * recency
                    + weights.importance * memory.importance;

                let score = if rerank_on { composite } else { relevance };
                let explain = options.explain.then(|| HitExplain {
                    retrieved: RetrievedExplain {
                        vector_similarity: candidate.vector_similarity,
                        keyword_score: candidate.keyword_score,
                        keyword_hits: candidate.keyword_hits.clone(),
                    },
                    rerank: rerank_on.then(|| RerankExplain {
                        weights: WeightsExplain {
                            relevance: weights.relevance,
                            confidence: weights.confidence,
                            recency: weights.recency,
                            importance: weights.importance,
                        },
                        signals: SignalsExplain {
                            relevance,
                            confidence,
                            recency,
                            importance: memory.importance,
                        },
                        composite_score: composite,
                    }),
                    status: StatusExplain {
                        status: memory.status,
                        superseded_by: memory.superseded_by.clone(),
                        quarantine: memory.quarantine.clone(),
                    },
                });

                SearchHit {
                    memory: memory.clone(),
                    score,
                    vector_similarity: candidate.vector_similarity,
                    keyword_score: candidate.keyword_score,
                    explain,
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.memory
                        .importance
                        .partial_cmp(&a.memory.importance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });
        hits.truncate(options.limit);

        let meta = options.explain.then(|| SearchMeta {
            query: query.to_string(),
            agent: agent.map(str::to_string),
            limit: options.limit,
            min_similarity: options.min_similarity,
            rerank: rerank_on,
            candidates: candidate_count,
            returned: hits.len(),
            excluded,
        });

        Ok(SearchResponse { hits, meta })
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn status_allowed(
        &self,
        status: Status,
        options: &SearchOptions,
        excluded: &mut ExcludedBreakdown,
    ) -> bool {
        match status {
            Status::Active => true,
            Status::Superseded => {
                if options.include_superseded {
                    true
                } else {
                    excluded.superseded += 1;
                    false
                }
            }
            Status::Disputed => {
                if options.include_disputed {
                    true
                } else {
                    excluded.disputed += 1;
                    false
                }
            }
            Status::Quarantined => {
                if options.include_quarantined {
                    true
                } else {
                    excluded.quarantined += 1;
                    false
                }
            }
            Status::Archived => {
                excluded.archived += 1;
                false
            }
        }
    }

    fn allowed_statuses(&self, options: &SearchOptions) -> Vec<Status> {
        if options.include_all {
            return vec![
                Status::Active,
                Status::Superseded,
                Status::Disputed,
                Status::Quarantined,
                Status::Archived,
            ];
        }
        let mut statuses = vec![Status::Active];
        if options.include_superseded {
            statuses.push(Status::Superseded);
        }
        if options.include_disputed {
            statuses.push(Status::Disputed);
        }
        if options.include_quarantined {
            statuses.push(Status::Quarantined);
        }
        statuses
    }

    /// Keep every token-matched candidate plus a deterministic evenly-spaced
    /// sample of the remainder, so big graphs stay scannable without
    /// sacrificing recall on exact-term queries.
    fn narrow_candidates(&self, positions: &[usize], query: &str, limit: usize) -> Vec<usize> {
        if positions.len() <= NARROW_THRESHOLD {
            return positions.to_vec();
        }

        let matched_ids = self.indexes.token_candidates(&tokenize(query));
        let mut kept: Vec<usize> = Vec::new();
        let mut remainder: Vec<usize> = Vec::new();
        for &pos in positions {
            if matched_ids.contains(&self.memories[pos].id) {
                kept.push(pos);
            } else {
                remainder.push(pos);
            }
        }

        let sample_size = (5 * limit).max(100).min(remainder.len());
        if sample_size > 0 {
            // Step-based deterministic sampling keeps recall regression
            // tests stable.
            let step = (remainder.len() / sample_size).max(1);
            kept.extend(remainder.iter().step_by(step).take(sample_size).copied());
        }

        tracing::debug!(
            total = positions.len(),
            scanned = kept.len(),
            "narrowed search candidates"
        );
        kept
    }
}

/// `exp(-0.01 * days_since_updated)`
fn recency_factor(updated_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (-0.01 * scoring::days_between(updated_at, now)).exp()
}
