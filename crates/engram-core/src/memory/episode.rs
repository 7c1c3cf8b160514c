//! Episodes, labeled clusters, and pending conflicts
//!
//! All three are engine-owned groupings over memory ids; none of them own
//! the memories they reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Claim;

// ============================================================================
// TIME RANGE
// ============================================================================

/// Inclusive time range covered by an episode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

// ============================================================================
// EPISODE
// ============================================================================

/// A named, time-ranged grouping of memory ids
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<String>,
    #[serde(default)]
    pub memory_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub time_range: TimeRange,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// LABELED CLUSTER
// ============================================================================

/// A user-named grouping of memory ids
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabeledCluster {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub memory_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// PENDING CONFLICT
// ============================================================================

/// Audit record of a structural contradiction awaiting resolution.
///
/// Only entries with no `resolved_at` are considered open.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingConflict {
    pub id: String,
    pub new_id: String,
    pub existing_id: String,
    pub new_trust: f64,
    pub existing_trust: f64,
    pub new_claim: Claim,
    pub existing_claim: Claim,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

impl PendingConflict {
    /// Open means not yet resolved.
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}
