//! Engine error taxonomy
//!
//! Validation and capacity checks fire before any mutation. LLM parse
//! failures are isolated to the subroutine that made the call and surfaced
//! as structured results rather than engine-fatal errors.

use thiserror::Error;

// ============================================================================
// STORAGE ERRORS
// ============================================================================

/// Adapter-level I/O failure
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON (de)serialization error
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Database error
    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Adapter rejected the operation
    #[error("storage rejected operation: {0}")]
    Unsupported(String),
}

// ============================================================================
// ENGINE ERRORS
// ============================================================================

/// Engine error type
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input: empty agent, bad character, oversize text, bad ISO
    /// time, ill-formed claim, unknown enum value, unknown predicate option
    #[error("invalid input: {0}")]
    Invalid(String),
    /// Memory limit, batch size limit, or query batch size limit exceeded
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),
    /// Id lookup failed for memory, episode, labeled cluster, or conflict
    #[error("not found: {0}")]
    NotFound(String),
    /// State conflict: resolving an already-resolved conflict, quarantining
    /// a non-active memory
    #[error("conflict: {0}")]
    Conflict(String),
    /// Cosine similarity across different vector sizes
    #[error("dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    /// Adapter I/O failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    /// Operation requires an adapter that was not provided
    #[error("adapter missing: {0}")]
    AdapterMissing(&'static str),
    /// Chat adapter returned a non-conforming response
    #[error("llm response did not parse: {0}")]
    LlmParse(String),
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Short machine-readable kind, used by front ends to pick exit codes
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Invalid(_) => "invalid",
            EngineError::CapacityExceeded(_) => "capacity_exceeded",
            EngineError::NotFound(_) => "not_found",
            EngineError::Conflict(_) => "conflict",
            EngineError::DimensionMismatch { .. } => "dimension_mismatch",
            EngineError::Storage(_) => "storage",
            EngineError::AdapterMissing(_) => "adapter_missing",
            EngineError::LlmParse(_) => "llm_parse",
        }
    }
}
