//! Labeled clusters - user-named groupings of memories
//!
//! Created by hand, promoted from auto-detected components, or labeled in
//! bulk by the chat adapter. `refresh_cluster` re-expands a cluster to the
//! transitive closure of its members' links.

use std::collections::HashSet;

use serde::Deserialize;

use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::memory::LabeledCluster;

use super::MemoryGraph;

// ============================================================================
// AUTO-LABEL REPORT
// ============================================================================

/// Outcome of [`MemoryGraph::auto_label_clusters`]: labels created plus the
/// per-cluster chat failures, surfaced inline rather than failing the pass
#[derive(Debug, Clone, Default)]
pub struct ClusterLabelReport {
    pub created: Vec<LabeledCluster>,
    pub errors: Vec<String>,
}

/// Strict shape the chat adapter must return per cluster
#[derive(Debug, Deserialize)]
struct LabelResponse {
    label: String,
    #[serde(default)]
    description: Option<String>,
}

impl MemoryGraph {
    // ========================================================================
    // CRUD
    // ========================================================================

    /// Create a labeled cluster from explicit member ids.
    pub fn create_cluster(
        &mut self,
        label: &str,
        memory_ids: Vec<String>,
        description: Option<String>,
    ) -> Result<LabeledCluster> {
        if label.trim().is_empty() {
            return Err(EngineError::Invalid("cluster label must not be empty".into()));
        }
        if memory_ids.is_empty() {
            return Err(EngineError::Invalid(
                "cluster requires at least one memory id".into(),
            ));
        }
        for id in &memory_ids {
            self.require(id)?;
        }

        let now = self.now();
        let cluster = LabeledCluster {
            id: self.storage.gen_cluster_id(),
            label: label.trim().to_string(),
            description,
            memory_ids,
            created_at: now,
            updated_at: now,
        };
        self.clusters.push(cluster.clone());
        self.persist_clusters()?;
        self.emit(&EngineEvent::ClusterCreate {
            id: cluster.id.clone(),
        });
        Ok(cluster)
    }

    pub fn list_labeled_clusters(&self) -> Vec<LabeledCluster> {
        self.clusters.clone()
    }

    pub fn get_cluster(&self, cluster_id: &str) -> Result<LabeledCluster> {
        let idx = self.cluster_index(cluster_id)?;
        Ok(self.clusters[idx].clone())
    }

    pub fn delete_cluster(&mut self, cluster_id: &str) -> Result<()> {
        let idx = self.cluster_index(cluster_id)?;
        self.clusters.remove(idx);
        self.persist_clusters()?;
        self.emit(&EngineEvent::ClusterDelete {
            id: cluster_id.to_string(),
        });
        Ok(())
    }

    // ========================================================================
    // REFRESH AND PROMOTION
    // ========================================================================

    /// Expand a cluster to every memory transitively connected to its
    /// current members.
    pub fn refresh_cluster(&mut self, cluster_id: &str) -> Result<LabeledCluster> {
        let idx = self.cluster_index(cluster_id)?;
        let member_ids = self.clusters[idx].memory_ids.clone();

        let mut seen: HashSet<usize> = HashSet::new();
        let mut expanded: Vec<String> = Vec::new();
        for id in &member_ids {
            let Some(pos) = self.indexes.position(id) else {
                continue;
            };
            if seen.contains(&pos) {
                continue;
            }
            for member_pos in self.component_from(pos, &mut seen) {
                expanded.push(self.memories[member_pos].id.clone());
            }
        }

        let now = self.now();
        let cluster = &mut self.clusters[idx];
        cluster.memory_ids = expanded;
        cluster.updated_at = now;
        let projection = cluster.clone();
        self.persist_clusters()?;
        Ok(projection)
    }

    /// Promote the nth auto-detected component to a labeled cluster.
    pub fn label_cluster(
        &mut self,
        index: usize,
        label: &str,
        description: Option<String>,
        min_size: usize,
    ) -> Result<LabeledCluster> {
        let clusters = self.graph_clusters(min_size);
        let cluster = clusters
            .get(index)
            .ok_or_else(|| EngineError::NotFound(format!("cluster {index}")))?;
        let ids = cluster.ids.clone();
        self.create_cluster(label, ids, description)
    }

    /// Ask the chat adapter for a `{label, description}` pair per
    /// auto-detected cluster and create labeled clusters from the answers.
    /// Chat or parse failures are collected per cluster, never fatal.
    pub fn auto_label_clusters(
        &mut self,
        min_size: usize,
        max_clusters: usize,
    ) -> Result<ClusterLabelReport> {
        if self.chat.is_none() {
            return Err(EngineError::AdapterMissing("chat"));
        }

        let detected = self.graph_clusters(min_size);
        let mut report = ClusterLabelReport::default();

        for cluster in detected.into_iter().take(max_clusters) {
            if cluster.label.is_some() {
                continue;
            }
            let sample: Vec<String> = cluster
                .ids
                .iter()
                .take(5)
                .filter_map(|id| self.indexes.position(id))
                .map(|pos| format!("- {}", self.memories[pos].text))
                .collect();
            let prompt = format!(
                "These agent memories form one topic cluster. Reply with ONLY \
                 a JSON object {{\"label\": \"...\", \"description\": \"...\"}} \
                 naming the topic in at most five words.\n\n{}",
                sample.join("\n")
            );

            let chat = self
                .chat
                .as_ref()
                .ok_or(EngineError::AdapterMissing("chat"))?;
            let raw = match chat.chat(&prompt) {
                Ok(raw) => raw,
                Err(err) => {
                    report.errors.push(format!("chat failed: {err}"));
                    continue;
                }
            };
            let parsed: LabelResponse = match serde_json::from_str(raw.trim()) {
                Ok(parsed) => parsed,
                Err(err) => {
                    report
                        .errors
                        .push(format!("label response did not parse: {err}"));
                    continue;
                }
            };
            if parsed.label.trim().is_empty() {
                report.errors.push("label response had an empty label".into());
                continue;
            }

            match self.create_cluster(&parsed.label, cluster.ids.clone(), parsed.description) {
                Ok(created) => report.created.push(created),
                Err(err) => report.errors.push(format!("cluster create failed: {err}")),
            }
        }

        Ok(report)
    }

    // ========================================================================
    // PLUMBING
    // ========================================================================

    fn cluster_index(&self, cluster_id: &str) -> Result<usize> {
        self.clusters
            .iter()
            .position(|c| c.id == cluster_id)
            .ok_or_else(|| EngineError::NotFound(format!("labeled cluster {cluster_id}")))
    }
}
