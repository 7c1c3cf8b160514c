//! The memory record - primary node of the graph
//!
//! Owned exclusively by the engine; external callers receive clones.
//! Persisted form is camelCase JSON with absent optional fields omitted,
//! and the loader tolerates missing optional fields from older files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Category, ClaimScope, CompressionMethod, LinkType, QuarantineReason, Source, Status};

// ============================================================================
// LINKS
// ============================================================================

/// A typed, weighted edge to another memory.
///
/// Links are stored on both endpoints: if A carries `(B, sim, T)` then B
/// carries `(A, sim, T)`. Compaction paths clean broken halves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub target_id: String,
    pub similarity: f64,
    #[serde(rename = "type", default)]
    pub link_type: LinkType,
}

// ============================================================================
// PROVENANCE
// ============================================================================

/// Where the memory came from and how much it is trusted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    #[serde(default)]
    pub source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    /// Count of independent confirmations, at least 1
    #[serde(default = "default_corroboration")]
    pub corroboration: u32,
    /// Computed trust in [0, 1]
    #[serde(default)]
    pub trust: f64,
}

fn default_corroboration() -> u32 {
    1
}

impl Default for Provenance {
    fn default() -> Self {
        Self {
            source: Source::Inference,
            source_id: None,
            corroboration: 1,
            trust: 0.5,
        }
    }
}

// ============================================================================
// CLAIMS
// ============================================================================

/// A structured `(subject, predicate, value)` assertion.
///
/// Claims drive dedup-by-corroboration and structural conflict detection.
/// Absent validity bounds are open (±infinity).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub subject: String,
    pub predicate: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_value: Option<String>,
    #[serde(default)]
    pub scope: ClaimScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default = "default_exclusive")]
    pub exclusive: bool,
}

fn default_exclusive() -> bool {
    true
}

impl Claim {
    /// The value used for conflict comparison: normalized when present.
    pub fn comparable_value(&self) -> &str {
        self.normalized_value.as_deref().unwrap_or(&self.value)
    }

    /// Whether two validity windows overlap; absent bounds are open.
    pub fn window_overlaps(&self, other: &Claim) -> bool {
        let a_from = self.valid_from.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let a_until = self.valid_until.unwrap_or(DateTime::<Utc>::MAX_UTC);
        let b_from = other.valid_from.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let b_until = other.valid_until.unwrap_or(DateTime::<Utc>::MAX_UTC);
        a_from <= b_until && b_from <= a_until
    }
}

// ============================================================================
// QUARANTINE
// ============================================================================

/// Non-destructive hold record for a memory pending operator review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quarantine {
    pub reason: QuarantineReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

// ============================================================================
// COMPRESSION PROVENANCE
// ============================================================================

/// How a digest memory was produced and from what
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Compressed {
    pub source_ids: Vec<String>,
    pub source_count: usize,
    pub method: CompressionMethod,
    pub compressed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<String>,
}

// ============================================================================
// EVOLUTION HISTORY
// ============================================================================

/// One in-place text edit applied by the evolve path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionStep {
    pub from: String,
    pub to: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

// ============================================================================
// MEMORY
// ============================================================================

/// The primary node of the memory graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    /// Opaque unique id, minted by the storage adapter
    pub id: String,
    /// Short agent tag this memory belongs to
    pub agent: String,
    /// The content
    pub text: String,
    /// Category name; open set, see [`Category`] for the known values
    pub category: String,
    /// Importance in [0, 1]
    pub importance: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Wall-clock time of the real-world event the memory refers to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub access_count: u32,
    #[serde(default)]
    pub reinforcements: u32,
    #[serde(default)]
    pub disputes: u32,
    /// SM-2 stability in days; set by reinforce
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stability: Option<f64>,
    /// Days between the two most recent reviews
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_review_interval: Option<f64>,
    #[serde(default)]
    pub provenance: Provenance,
    /// Rounded trust
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quarantine: Option<Quarantine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supersedes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim: Option<Claim>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed: Option<Compressed>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evolution: Vec<EvolutionStep>,
    /// Stamped on archive copies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_reason: Option<String>,
}

impl Memory {
    /// Create a fresh active memory with engine defaults.
    pub fn new(id: String, agent: String, text: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            agent,
            text,
            category: Category::Fact.as_str().to_string(),
            importance: 0.5,
            tags: Vec::new(),
            embedding: None,
            links: Vec::new(),
            created_at: now,
            updated_at: now,
            event_at: None,
            access_count: 0,
            reinforcements: 0,
            disputes: 0,
            stability: None,
            last_review_interval: None,
            provenance: Provenance::default(),
            confidence: 0.5,
            status: Status::Active,
            quarantine: None,
            superseded_by: None,
            supersedes: Vec::new(),
            claim: None,
            compressed: None,
            evolution: Vec::new(),
            archived_at: None,
            archived_reason: None,
        }
    }

    /// Parsed category for the well-known set.
    pub fn category_kind(&self) -> Category {
        Category::parse_name(&self.category)
    }

    /// The time axis used by temporal filters and episode ranges.
    pub fn effective_time(&self) -> DateTime<Utc> {
        self.event_at.unwrap_or(self.created_at)
    }

    /// Bump `updated_at`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// Replace or insert the link to `target_id`, both directions handled
    /// by the engine.
    pub fn upsert_link(&mut self, link: Link) {
        if let Some(existing) = self
            .links
            .iter_mut()
            .find(|l| l.target_id == link.target_id)
        {
            *existing = link;
        } else {
            self.links.push(link);
        }
    }

    /// Remove every link pointing at `target_id`; reports whether any
    /// existed.
    pub fn remove_links_to(&mut self, target_id: &str) -> bool {
        let before = self.links.len();
        self.links.retain(|l| l.target_id != target_id);
        self.links.len() != before
    }

    /// Strip the embedding and stamp archive metadata, producing the copy
    /// that goes to the archive.
    pub fn to_archive_copy(&self, now: DateTime<Utc>, reason: Option<&str>) -> Memory {
        let mut copy = self.clone();
        copy.embedding = None;
        copy.archived_at = Some(now);
        if let Some(r) = reason {
            copy.archived_reason = Some(r.to_string());
        }
        copy
    }
}

// ============================================================================
// TESTS
// ============================================================================
