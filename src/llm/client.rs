//! Generator trait and request/fragment types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::matrix::{CellPath, TaskDef};

/// A compiled generation request for one cell.
///
/// Pure data: the same cell content and schema version always compile to an
/// identical request, including its id, so requests can be dispatched
/// concurrently and merged order-independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Stable id: hex digest of (path, schema version, prompt).
    pub id: String,
    /// The cell this request targets; the merge key.
    pub path: CellPath,
    /// Fully rendered prompt text.
    pub prompt: String,
    /// Schema contract version the prompt was compiled against.
    pub schema_version: u32,
}

/// A generated subtree targeting one path, before merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFragment {
    /// Declared target path. Must match the request's path.
    pub path: CellPath,
    pub tasks: Vec<TaskDef>,
    /// Id of the request that produced this fragment.
    pub provenance: String,
}

/// Per-request failure from the capability. Recoverable: the repair loop
/// retries the affected path only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationFailure {
    pub path: CellPath,
    pub reason: String,
}

impl std::fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "generation failed for {}: {}", self.path, self.reason)
    }
}

impl std::error::Error for GenerationFailure {}

/// The external completion capability.
///
/// No assumption is made about latency or determinism; implementations must
/// be safe to retry. Each call is independent (fresh context).
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedFragment, GenerationFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_round_trips() {
        let request = GenerationRequest {
            id: "abc123".to_string(),
            path: CellPath::new("trader", "offer"),
            prompt: "extract tasks".to_string(),
            schema_version: 1,
        };
        let json = serde_json::to_string(&request).unwrap();
        let back: GenerationRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_failure_display() {
        let failure = GenerationFailure {
            path: CellPath::new("observer", "settlement"),
            reason: "timed out after 30s".to_string(),
        };
        assert_eq!(
            failure.to_string(),
            "generation failed for observer.settlement: timed out after 30s"
        );
    }
}
