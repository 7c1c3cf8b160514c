//! Graph queries
//!
//! Link inspection, manual linking, BFS traversal, shortest paths,
//! connected-component clustering, and orphan detection.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::memory::{Link, LinkType, Memory};
use crate::scoring;

use super::MemoryGraph;

// ============================================================================
// VIEWS
// ============================================================================

/// One rendered link endpoint; missing targets render as `(deleted)`
#[derive(Debug, Clone)]
pub struct LinkView {
    pub id: String,
    pub similarity: f64,
    pub link_type: LinkType,
    pub memory: String,
    pub agent: String,
    pub category: String,
}

/// A memory and its resolved links
#[derive(Debug, Clone)]
pub struct LinksView {
    pub id: String,
    pub memory: String,
    pub agent: String,
    pub category: String,
    pub links: Vec<LinkView>,
}

/// A node reached by [`MemoryGraph::traverse`]
#[derive(Debug, Clone)]
pub struct TraverseNode {
    pub id: String,
    /// Minimum hop count from the origin
    pub hop: usize,
    /// Similarity of the incoming link (1.0 at the origin)
    pub similarity: f64,
    pub memory: String,
    pub agent: String,
    pub category: String,
}

/// Result of [`MemoryGraph::path`]
#[derive(Debug, Clone)]
pub struct PathResult {
    pub found: bool,
    pub hops: usize,
    pub path: Vec<String>,
}

/// One auto-detected connected component
#[derive(Debug, Clone)]
pub struct ClusterView {
    pub size: usize,
    pub ids: Vec<String>,
    /// Per-agent member counts
    pub agents: HashMap<String, usize>,
    /// Top 5 tags with counts
    pub top_tags: Vec<(String, usize)>,
    /// Label of an overlapping labeled cluster (>= 50% of members)
    pub label: Option<String>,
}

/// A weakly connected memory
#[derive(Debug, Clone)]
pub struct OrphanView {
    pub id: String,
    pub memory: String,
    pub agent: String,
    pub links: usize,
    pub strength: f64,
    pub age_days: f64,
}

impl MemoryGraph {
    // ========================================================================
    // LINK INSPECTION
    // ========================================================================

    /// A memory's links with resolved endpoints.
    pub fn links(&self, id: &str) -> Result<LinksView> {
        let memory = self.require(id)?;
        let links = memory
            .links
            .iter()
            .map(|link| match self.indexes.position(&link.target_id) {
                Some(pos) => {
                    let target = &self.memories[pos];
                    LinkView {
                        id: link.target_id.clone(),
                        similarity: link.similarity,
                        link_type: link.link_type,
                        memory: target.text.clone(),
                        agent: target.agent.clone(),
                        category: target.category.clone(),
                    }
                }
                None => LinkView {
                    id: link.target_id.clone(),
                    similarity: link.similarity,
                    link_type: link.link_type,
                    memory: "(deleted)".to_string(),
                    agent: String::new(),
                    category: String::new(),
                },
            })
            .collect();
        Ok(LinksView {
            id: memory.id.clone(),
            memory: memory.text.clone(),
            agent: memory.agent.clone(),
            category: memory.category.clone(),
            links,
        })
    }

    // ========================================================================
    // MANUAL LINKING
    // ========================================================================

    /// Upsert a bidirectional link between two memories.
    pub fn link(
        &mut self,
        source_id: &str,
        target_id: &str,
        link_type: LinkType,
        similarity: Option<f64>,
    ) -> Result<()> {
        if source_id == target_id {
            return Err(EngineError::Invalid("cannot link a memory to itself".into()));
        }
        let source_pos = self.position(source_id)?;
        let target_pos = self.position(target_id)?;
        let similarity = similarity.unwrap_or(1.0);
        let now = self.now();

        self.memories[source_pos].upsert_link(Link {
            target_id: target_id.to_string(),
            similarity,
            link_type,
        });
        self.memories[source_pos].touch(now);
        self.memories[target_pos].upsert_link(Link {
            target_id: source_id.to_string(),
            similarity,
            link_type,
        });
        self.memories[target_pos].touch(now);

        self.persist_memories(&HashSet::from([
            source_id.to_string(),
            target_id.to_string(),
        ]))?;
        self.emit(&EngineEvent::Link {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            link_type,
            similarity,
        });
        Ok(())
    }

    /// Remove the link pair in both directions if present.
    pub fn unlink(&mut self, source_id: &str, target_id: &str) -> Result<bool> {
        let source_pos = self.position(source_id)?;
        let target_pos = self.position(target_id)?;
        let now = self.now();

        let removed_forward = self.memories[source_pos].remove_links_to(target_id);
        let removed_reverse = self.memories[target_pos].remove_links_to(source_id);
        let removed = removed_forward || removed_reverse;
        if removed {
            self.memories[source_pos].touch(now);
            self.memories[target_pos].touch(now);
            self.persist_memories(&HashSet::from([
                source_id.to_string(),
                target_id.to_string(),
            ]))?;
        }
        Ok(removed)
    }

    // ========================================================================
    // TRAVERSAL
    // ========================================================================

    /// BFS from `start`, following only links of the allowed types. Nodes
    /// come back sorted by (hop asc, similarity desc).
    pub fn traverse(
        &self,
        start: &str,
        max_hops: usize,
        types: Option<&[LinkType]>,
    ) -> Result<Vec<TraverseNode>> {
        let start_pos = self.position(start)?;
        let allowed = |t: LinkType| types.is_none_or(|ts| ts.contains(&t));

        let mut visited: HashMap<String, (usize, f64)> = HashMap::new();
        visited.insert(start.to_string(), (0, 1.0));
        let mut queue: VecDeque<(usize, usize)> = VecDeque::new();
        queue.push_back((start_pos, 0));

        while let Some((pos, hop)) = queue.pop_front() {
            if hop >= max_hops {
                continue;
            }
            // Clone the link list so the scan survives queue growth.
            let links: Vec<Link> = self.memories[pos].links.clone();
            for link in links {
                if !allowed(link.link_type) {
                    continue;
                }
                let Some(next_pos) = self.indexes.position(&link.target_id) else {
                    continue;
                };
                if visited.contains_key(&link.target_id) {
                    continue;
                }
                visited.insert(link.target_id.clone(), (hop + 1, link.similarity));
                queue.push_back((next_pos, hop + 1));
            }
        }

        let mut nodes: Vec<TraverseNode> = visited
            .into_iter()
            .filter_map(|(id, (hop, similarity))| {
                let pos = self.indexes.position(&id)?;
                let memory = &self.memories[pos];
                Some(TraverseNode {
                    id,
                    hop,
                    similarity,
                    memory: memory.text.clone(),
                    agent: memory.agent.clone(),
                    category: memory.category.clone(),
                })
            })
            .collect();
        nodes.sort_by(|a, b| {
            a.hop.cmp(&b.hop).then_with(|| {
                b.similarity
                    .partial_cmp(&a.similarity)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        });
        Ok(nodes)
    }

    /// Shortest path between two memories over allowed link types.
    pub fn path(&self, from: &str, to: &str, types: Option<&[LinkType]>) -> Result<PathResult> {
        let from_pos = self.position(from)?;
        self.position(to)?;
        let allowed = |t: LinkType| types.is_none_or(|ts| ts.contains(&t));

        let mut parent: HashMap<String, String> = HashMap::new();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(from.to_string());
        let mut queue: VecDeque<usize> = VecDeque::new();
        queue.push_back(from_pos);

        'bfs: while let Some(pos) = queue.pop_front() {
            let current_id = self.memories[pos].id.clone();
            for link in &self.memories[pos].links {
                if !allowed(link.link_type) || visited.contains(&link.target_id) {
                    continue;
                }
                let Some(next_pos) = self.indexes.position(&link.target_id) else {
                    continue;
                };
                visited.insert(link.target_id.clone());
                parent.insert(link.target_id.clone(), current_id.clone());
                if link.target_id == to {
                    break 'bfs;
                }
                queue.push_back(next_pos);
            }
        }

        if !parent.contains_key(to) && from != to {
            return Ok(PathResult {
                found: false,
                hops: 0,
                path: Vec::new(),
            });
        }

        let mut path = vec![to.to_string()];
        while let Some(prev) = parent.get(path.last().map(String::as_str).unwrap_or_default()) {
            path.push(prev.clone());
        }
        path.reverse();
        Ok(PathResult {
            found: true,
            hops: path.len().saturating_sub(1),
            path,
        })
    }

    // ========================================================================
    // CLUSTERS AND ORPHANS
    // ========================================================================

    /// Connected components of size >= `min_size`, largest first, annotated
    /// with a labeled cluster's label when member overlap reaches 50%.
    pub fn graph_clusters(&self, min_size: usize) -> Vec<ClusterView> {
        let mut seen: HashSet<usize> = HashSet::new();
        let mut clusters = Vec::new();

        for start in 0..self.memories.len() {
            if seen.contains(&start) {
                continue;
            }
            let component = self.component_from(start, &mut seen);
            if component.len() < min_size {
                continue;
            }

            let mut agents: HashMap<String, usize> = HashMap::new();
            let mut tag_counts: HashMap<String, usize> = HashMap::new();
            let mut ids = Vec::with_capacity(component.len());
            for &pos in &component {
                let memory = &self.memories[pos];
                ids.push(memory.id.clone());
                *agents.entry(memory.agent.clone()).or_insert(0) += 1;
                for tag in &memory.tags {
                    *tag_counts.entry(tag.clone()).or_insert(0) += 1;
                }
            }
            let mut top_tags: Vec<(String, usize)> = tag_counts.into_iter().collect();
            top_tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            top_tags.truncate(5);

            let label = self.matching_label(&ids);

            clusters.push(ClusterView {
                size: ids.len(),
                ids,
                agents,
                top_tags,
                label,
            });
        }

        clusters.sort_by(|a, b| b.size.cmp(&a.size));
        clusters
    }

    /// Memories with at most `max_links` links, weakest first.
    pub fn orphans(&self, agent: Option<&str>, max_links: usize) -> Vec<OrphanView> {
        let now = self.now();
        let mut orphans: Vec<OrphanView> = self
            .memories
            .iter()
            .filter(|m| agent.is_none_or(|a| m.agent == a))
            .filter(|m| m.links.len() <= max_links)
            .map(|m| OrphanView {
                id: m.id.clone(),
                memory: m.text.clone(),
                agent: m.agent.clone(),
                links: m.links.len(),
                strength: scoring::decay_strength(m, self.config.half_life_days, now),
                age_days: scoring::days_between(m.created_at, now),
            })
            .collect();
        orphans.sort_by(|a, b| {
            a.strength
                .partial_cmp(&b.strength)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        orphans
    }

    // ========================================================================
    // COMPONENT PLUMBING
    // ========================================================================

    /// Undirected component containing `start`, over every link type.
    pub(crate) fn component_from(&self, start: usize, seen: &mut HashSet<usize>) -> Vec<usize> {
        let mut component = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(start);
        seen.insert(start);

        while let Some(pos) = queue.pop_front() {
            component.push(pos);
            for link in &self.memories[pos].links {
                if let Some(next) = self.indexes.position(&link.target_id) {
                    if seen.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
        }
        component
    }

    /// Label of a labeled cluster whose members overlap this component by
    /// at least half.
    fn matching_label(&self, component_ids: &[String]) -> Option<String> {
        let component: HashSet<&String> = component_ids.iter().collect();
        for cluster in &self.clusters {
            if cluster.memory_ids.is_empty() {
                continue;
            }
            let overlap = cluster
                .memory_ids
                .iter()
                .filter(|id| component.contains(id))
                .count();
            if overlap * 2 >= component_ids.len() {
                return Some(cluster.label.clone());
            }
        }
        None
    }
}

/// Memories eligible for auto-compression share a component and none of
/// them is already a digest.
pub(crate) fn component_has_digest(memories: &[Memory], component: &[usize]) -> bool {
    component
        .iter()
        .any(|&pos| memories[pos].category_kind() == crate::memory::Category::Digest)
}
