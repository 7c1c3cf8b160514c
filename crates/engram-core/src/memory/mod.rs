//! Memory module - core types and data structures
//!
//! The memory graph's node model:
//! - Typed, weighted bidirectional links
//! - Provenance with source-derived trust and corroboration
//! - Structured claims for structural conflict detection
//! - SM-2 stability state for the non-legacy decay mode
//! - Bi-temporal timestamps (`created_at` vs `event_at`)

mod episode;
mod record;

pub use episode::{Episode, LabeledCluster, PendingConflict, TimeRange};
pub use record::{
    Claim, Compressed, EvolutionStep, Link, Memory, Provenance, Quarantine,
};

use serde::{Deserialize, Serialize};

// ============================================================================
// CATEGORIES
// ============================================================================

/// Well-known memory categories.
///
/// The category field on [`Memory`] is an open set and stored as a plain
/// string; this enum names the categories the engine treats specially
/// (decay weighting, context section ordering, digest detection).
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[default]
    Fact,
    Decision,
    Preference,
    Insight,
    Finding,
    Event,
    Task,
    OpenThread,
    Digest,
    SessionSnapshot,
    Commitment,
    Blocker,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Fact => "fact",
            Category::Decision => "decision",
            Category::Preference => "preference",
            Category::Insight => "insight",
            Category::Finding => "finding",
            Category::Event => "event",
            Category::Task => "task",
            Category::OpenThread => "open_thread",
            Category::Digest => "digest",
            Category::SessionSnapshot => "session_snapshot",
            Category::Commitment => "commitment",
            Category::Blocker => "blocker",
        }
    }

    /// Parse from a string name; unknown names fall back to `Fact`.
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "fact" => Category::Fact,
            "decision" => Category::Decision,
            "preference" => Category::Preference,
            "insight" => Category::Insight,
            "finding" => Category::Finding,
            "event" => Category::Event,
            "task" => Category::Task,
            "open_thread" => Category::OpenThread,
            "digest" => Category::Digest,
            "session_snapshot" => Category::SessionSnapshot,
            "commitment" => Category::Commitment,
            "blocker" => Category::Blocker,
            _ => Category::Fact,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// STATUS
// ============================================================================

/// Lifecycle status of a memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Active,
    Superseded,
    Quarantined,
    Disputed,
    Archived,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Superseded => "superseded",
            Status::Quarantined => "quarantined",
            Status::Disputed => "disputed",
            Status::Archived => "archived",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Status::Active),
            "superseded" => Ok(Status::Superseded),
            "quarantined" => Ok(Status::Quarantined),
            "disputed" => Ok(Status::Disputed),
            "archived" => Ok(Status::Archived),
            _ => Err(format!("unknown status: {s}")),
        }
    }
}

// ============================================================================
// PROVENANCE SOURCES
// ============================================================================

/// Where a memory came from; drives the base trust weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    UserExplicit,
    System,
    ToolOutput,
    UserImplicit,
    Document,
    #[default]
    Inference,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::UserExplicit => "user_explicit",
            Source::System => "system",
            Source::ToolOutput => "tool_output",
            Source::UserImplicit => "user_implicit",
            Source::Document => "document",
            Source::Inference => "inference",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user_explicit" => Ok(Source::UserExplicit),
            "system" => Ok(Source::System),
            "tool_output" => Ok(Source::ToolOutput),
            "user_implicit" => Ok(Source::UserImplicit),
            "document" => Ok(Source::Document),
            "inference" => Ok(Source::Inference),
            _ => Err(format!("unknown source: {s}")),
        }
    }
}

// ============================================================================
// LINK TYPES
// ============================================================================

/// Type of a graph edge between two memories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    /// Semantically similar (auto-linked at store time)
    Similar,
    /// Source replaces the target after a structural conflict
    Supersedes,
    /// Digest node pointing at a compressed source
    DigestOf,
    /// Source was folded into the target digest
    DigestedInto,
    /// Manually asserted relationship
    #[default]
    Related,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Similar => "similar",
            LinkType::Supersedes => "supersedes",
            LinkType::DigestOf => "digest_of",
            LinkType::DigestedInto => "digested_into",
            LinkType::Related => "related",
        }
    }
}

impl std::fmt::Display for LinkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LinkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "similar" => Ok(LinkType::Similar),
            "supersedes" => Ok(LinkType::Supersedes),
            "digest_of" => Ok(LinkType::DigestOf),
            "digested_into" => Ok(LinkType::DigestedInto),
            "related" => Ok(LinkType::Related),
            _ => Err(format!("unknown link type: {s}")),
        }
    }
}

// ============================================================================
// CLAIM SCOPES
// ============================================================================

/// Scope of a structured claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClaimScope {
    #[default]
    Global,
    Session,
    Temporal,
}

impl ClaimScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimScope::Global => "global",
            ClaimScope::Session => "session",
            ClaimScope::Temporal => "temporal",
        }
    }
}

impl std::str::FromStr for ClaimScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "global" => Ok(ClaimScope::Global),
            "session" => Ok(ClaimScope::Session),
            "temporal" => Ok(ClaimScope::Temporal),
            _ => Err(format!("unknown claim scope: {s}")),
        }
    }
}

// ============================================================================
// QUARANTINE REASONS
// ============================================================================

/// Why a memory was quarantined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineReason {
    /// Incoming claim lost a trust comparison against an existing claim
    TrustInsufficient,
    /// Predicate schema demands operator review for conflicts
    PredicateRequiresReview,
    /// Heuristics flagged the input itself
    SuspiciousInput,
    /// Operator or caller asked for quarantine explicitly
    Manual,
}

impl QuarantineReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuarantineReason::TrustInsufficient => "trust_insufficient",
            QuarantineReason::PredicateRequiresReview => "predicate_requires_review",
            QuarantineReason::SuspiciousInput => "suspicious_input",
            QuarantineReason::Manual => "manual",
        }
    }
}

impl std::str::FromStr for QuarantineReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trust_insufficient" => Ok(QuarantineReason::TrustInsufficient),
            "predicate_requires_review" => Ok(QuarantineReason::PredicateRequiresReview),
            "suspicious_input" => Ok(QuarantineReason::SuspiciousInput),
            "manual" => Ok(QuarantineReason::Manual),
            _ => Err(format!("unknown quarantine reason: {s}")),
        }
    }
}

// ============================================================================
// COMPRESSION METHODS
// ============================================================================

/// How a digest was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    /// Importance-ordered extractive merge, no LLM involved
    #[default]
    Extractive,
    /// One-paragraph summary from the chat adapter
    Llm,
}

impl CompressionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionMethod::Extractive => "extractive",
            CompressionMethod::Llm => "llm",
        }
    }
}

impl std::str::FromStr for CompressionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "extractive" => Ok(CompressionMethod::Extractive),
            "llm" => Ok(CompressionMethod::Llm),
            _ => Err(format!("unknown compression method: {s}")),
        }
    }
}
