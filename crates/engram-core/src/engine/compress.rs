//! Compression - folding many memories into a digest
//!
//! Extractive compression merges texts by importance, admitting only texts
//! that contribute new tokens; LLM compression asks the chat adapter for a
//! one-paragraph summary. Either way the digest links to its sources with
//! `digest_of` / `digested_into`.

use std::collections::HashSet;

use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::memory::{
    Category, Compressed, CompressionMethod, Link, LinkType, Memory,
};
use crate::scoring;
use crate::text::tokenize;

use super::graph::component_has_digest;
use super::MemoryGraph;

pub use crate::memory::CompressionMethod as CompressMethod;

// ============================================================================
// OPTIONS AND OUTCOME
// ============================================================================

/// Options for [`MemoryGraph::compress`]
#[derive(Debug, Clone, Default)]
pub struct CompressOptions {
    pub method: CompressionMethod,
    /// Archive and remove the source memories after digesting
    pub archive_originals: bool,
    /// Agent tag for the digest; defaults to the first source's agent
    pub agent: Option<String>,
}

/// What compression produced
#[derive(Debug, Clone)]
pub struct CompressOutcome {
    pub digest_id: String,
    pub source_count: usize,
    pub method: CompressionMethod,
    pub text: String,
}

/// Options for [`MemoryGraph::auto_compress`]
#[derive(Debug, Clone)]
pub struct AutoCompressOptions {
    pub max_digests: usize,
    pub min_cluster_size: usize,
    pub archive_originals: bool,
    pub agent: Option<String>,
}

impl Default for AutoCompressOptions {
    fn default() -> Self {
        Self {
            max_digests: 5,
            min_cluster_size: 3,
            archive_originals: false,
            agent: None,
        }
    }
}

impl MemoryGraph {
    // ========================================================================
    // COMPRESS
    // ========================================================================

    /// Compress two or more memories into a digest.
    pub fn compress(&mut self, ids: &[String], options: &CompressOptions) -> Result<CompressOutcome> {
        if ids.len() < 2 {
            return Err(EngineError::Invalid(
                "compression requires at least two memories".into(),
            ));
        }
        let mut positions = Vec::with_capacity(ids.len());
        for id in ids {
            positions.push(self.position(id)?);
        }

        let text = match options.method {
            CompressionMethod::Extractive => self.extractive_text(&positions),
            CompressionMethod::Llm => self.llm_text(&positions)?,
        };

        let now = self.now();
        let digest_id = self.storage.gen_id();
        let sources: Vec<&Memory> = positions.iter().map(|&p| &self.memories[p]).collect();

        let importance = sources
            .iter()
            .map(|m| m.importance)
            .fold(0.0_f64, f64::max);
        let mut tags: Vec<String> = Vec::new();
        for source in &sources {
            for tag in &source.tags {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
        }
        let agent = options
            .agent
            .clone()
            .unwrap_or_else(|| sources[0].agent.clone());

        let embedding = self
            .embed_texts(std::slice::from_ref(&text))?
            .into_iter()
            .next()
            .flatten();

        let mut digest = Memory::new(digest_id.clone(), agent, text.clone(), now);
        digest.category = Category::Digest.as_str().to_string();
        digest.importance = importance;
        digest.tags = tags;
        digest.embedding = embedding;
        digest.provenance.source = crate::memory::Source::System;
        digest.provenance.trust = scoring::compute_trust(digest.provenance.source, 1, 0, 0, 0.0);
        digest.confidence = scoring::confidence(digest.provenance.trust);
        digest.compressed = Some(Compressed {
            source_ids: ids.to_vec(),
            source_count: ids.len(),
            method: options.method,
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

        // Commit the digest, then mirror digested_into links onto sources.
        let pos = self.memories.len();
        self.indexes.insert(&digest, pos);
        self.memories.push(digest);

        let mut touched: HashSet<String> = HashSet::from([digest_id.clone()]);
        for id in ids {
            if let Some(source_pos) = self.indexes.position(id) {
                let source = &mut self.memories[source_pos];
                source.upsert_link(Link {
                    target_id: digest_id.clone(),
                    similarity: 1.0,
                    link_type: LinkType::DigestedInto,
                });
                source.touch(now);
                touched.insert(id.clone());
            }
        }

        let mut removed: Vec<String> = Vec::new();
        if options.archive_originals {
            let mut copies = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(source_pos) = self.indexes.position(id) {
                    copies.push(self.memories[source_pos].to_archive_copy(now, Some("compressed")));
                }
            }
            self.append_archive(copies)?;
            self.remove_memories(ids, &mut touched);
            removed = ids.to_vec();
        }

        if removed.is_empty() {
            self.persist_memories(&touched)?;
        } else {
            self.persist_removals(&removed, &touched)?;
        }

        tracing::info!(
            digest = %digest_id,
            sources = ids.len(),
            method = %options.method.as_str(),
            "memories compressed"
        );
        self.emit(&EngineEvent::Compress {
            digest_id: digest_id.clone(),
            source_count: ids.len(),
        });

        Ok(CompressOutcome {
            digest_id,
            source_count: ids.len(),
            method: options.method,
            text,
        })
    }

    /// Compress an episode's members and stamp the digest with the episode.
    pub fn compress_episode(
        &mut self,
        episode_id: &str,
        options: &CompressOptions,
    ) -> Result<CompressOutcome> {
        let idx = self.episode_index(episode_id)?;
        let ids = self.episodes[idx].memory_ids.clone();
        let outcome = self.compress(&ids, options)?;
        if let Some(pos) = self.indexes.position(&outcome.digest_id) {
            if let Some(compressed) = &mut self.memories[pos].compressed {
                compressed.episode_id = Some(episode_id.to_string());
            }
            self.persist_memories(&HashSet::from([outcome.digest_id.clone()]))?;
        }
        Ok(outcome)
    }

    /// Compress the nth auto-detected cluster.
    pub fn compress_cluster(
        &mut self,
        index: usize,
        min_size: usize,
        options: &CompressOptions,
    ) -> Result<CompressOutcome> {
        let clusters = self.graph_clusters(min_size);
        let cluster = clusters
            .get(index)
            .ok_or_else(|| EngineError::NotFound(format!("cluster {index}")))?;
        let ids = cluster.ids.clone();
        self.compress(&ids, options)
    }

    /// Compress auto-detected components, skipping any that already hold a
    /// digest.
    pub fn auto_compress(&mut self, options: &AutoCompressOptions) -> Result<Vec<CompressOutcome>> {
        // Resolve components to ids up front: each compression below can
        // shift positions.
        let mut seen: HashSet<usize> = HashSet::new();
        let mut components: Vec<Vec<String>> = Vec::new();
        for start in 0..self.memories.len() {
            if seen.contains(&start) {
                continue;
            }
            let component = self.component_from(start, &mut seen);
            if component.len() >= options.min_cluster_size
                && !component_has_digest(&self.memories, &component)
            {
                components.push(
                    component
                        .iter()
                        .map(|&pos| self.memories[pos].id.clone())
                        .collect(),
                );
            }
        }
        components.sort_by(|a, b| b.len().cmp(&a.len()));
        components.truncate(options.max_digests);

        let compress_options = CompressOptions {
            method: CompressionMethod::Extractive,
            archive_originals: options.archive_originals,
            agent: options.agent.clone(),
        };
        let mut outcomes = Vec::with_capacity(components.len());
        for ids in components {
            if ids.len() < 2 {
                continue;
            }
            outcomes.push(self.compress(&ids, &compress_options)?);
        }
        Ok(outcomes)
    }

    // ========================================================================
    // TEXT BUILDERS
    // ========================================================================

    /// Importance-ordered extractive merge: start from the most important
    /// text, then admit each text that contributes at least one new token.
    pub(crate) fn extractive_text(&self, positions: &[usize]) -> String {
        let mut ordered: Vec<usize> = positions.to_vec();
        ordered.sort_by(|&a, &b| {
            self.memories[b]
                .importance
                .partial_cmp(&self.memories[a].importance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut seen_tokens: HashSet<String> = HashSet::new();
        let mut parts: Vec<String> = Vec::new();
        for pos in ordered {
            let text = &self.memories[pos].text;
            let tokens = tokenize(text);
            let novel = parts.is_empty() || tokens.iter().any(|t| !seen_tokens.contains(t));
            if novel {
                seen_tokens.extend(tokens);
                parts.push(text.clone());
            }
        }
        parts.join("\n")
    }

    fn llm_text(&self, positions: &[usize]) -> Result<String> {
        let chat = self
            .chat
            .as_ref()
            .ok_or(EngineError::AdapterMissing("chat"))?;
        let bullet_list: Vec<String> = positions
            .iter()
            .map(|&pos| format!("- {}", self.memories[pos].text))
            .collect();
        let prompt = format!(
            "Compress the following memories into one paragraph. Preserve \
             every concrete fact and decision; drop filler.\n\n{}",
            bullet_list.join("\n")
        );
        Ok(chat.chat(&prompt)?.trim().to_string())
    }
}
