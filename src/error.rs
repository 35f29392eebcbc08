//! Error types for the hybrid retrieval store.
//!
//! Every error carries enough context (field name, constraint violated) for
//! the caller to act on it. Nothing is swallowed: derivation failures are the
//! one non-fatal class, and those surface through the `Pending` derivation
//! state on the affected row.

use thiserror::Error;

/// Main error type for store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Malformed or disallowed input, rejected before any write.
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Duplicate chunk identity. Chunks are immutable; re-ingestion of the
    /// same fragment must go through `replace_chunk`.
    #[error(
        "chunk ({source_review_id}, {ordinal}) already exists for place '{place_id}'; use replace_chunk to supersede it"
    )]
    Conflict {
        place_id: String,
        source_review_id: String,
        ordinal: u32,
    },

    /// Derived-artifact computation failed. Non-fatal on the write path: the
    /// row commits with prior/empty derived fields and is marked pending.
    #[error("derivation failed for {entity}: {reason}")]
    Derivation { entity: String, reason: String },

    /// An index structure could not serve a query even through its fallback
    /// path. Logged as degraded mode before this is returned.
    #[error("{index} index unavailable: {reason}")]
    IndexUnavailable {
        index: &'static str,
        reason: String,
    },
}

impl StoreError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Stable status code for programmatic handling in API layers.
    pub fn status_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Conflict { .. } => "CONFLICT_ERROR",
            Self::Derivation { .. } => "DERIVATION_FAILURE",
            Self::IndexUnavailable { .. } => "INDEX_UNAVAILABLE",
        }
    }
}

impl From<crate::embedding::EmbeddingError> for StoreError {
    fn from(e: crate::embedding::EmbeddingError) -> Self {
        Self::Derivation {
            entity: "embedding provider".to_string(),
            reason: e.to_string(),
        }
    }
}

impl From<tantivy::TantivyError> for StoreError {
    fn from(e: tantivy::TantivyError) -> Self {
        Self::IndexUnavailable {
            index: "lexical",
            reason: e.to_string(),
        }
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
