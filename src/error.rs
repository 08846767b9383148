//! Error types for stagehand
//!
//! Centralized error handling using thiserror. Only kinds that abort a run
//! live here; recoverable findings (duplicate tasks, dangling references,
//! per-cell generation failures) travel inside a `ValidationReport` and are
//! handled by the repair loop instead of being raised as errors.

use thiserror::Error;

/// Fatal error kinds that end a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Segment spans fail to partition the input exactly
    #[error("Segmentation defect: {0}")]
    Segmentation(String),

    /// Skeleton construction left a declared (role, phase) cell absent
    #[error("Matrix completeness defect: missing cell {0}")]
    Completeness(String),

    /// Sanitizer rejected content on a path; never stripped, never retried
    #[error("Security violation at {path}: matched pattern {pattern:?}")]
    Security { path: String, pattern: String },

    /// Prompt template failed to render
    #[error("Template error: {0}")]
    Template(String),

    /// Invalid internal state (e.g. a dispatch task panicked)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML rendering error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for stagehand operations
pub type Result<T> = std::result::Result<T, PipelineError>;
