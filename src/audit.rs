//! Audit trail: serializable per-run and per-round records.
//!
//! The core produces these in a deterministic, serializable shape; where
//! they end up on disk is the caller's concern. `JsonlSink` is the thin
//! append-only collaborator for callers that just want a file.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::controller::{PathFailure, RoundOutcome};
use crate::error::Result;
use crate::llm::GenerationRequest;
use crate::matrix::{CellPath, MergedDocument, document::text_digest};
use crate::validate::ValidationReport;

/// Slim echo of a dispatched request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: String,
    pub path: CellPath,
}

/// One record per attempt: what was asked, what landed, what failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub attempt: u32,
    pub at: DateTime<Utc>,
    pub requests: Vec<RequestRecord>,
    /// Paths whose fragments were committed this round.
    pub committed: Vec<CellPath>,
    pub failures: Vec<PathFailure>,
    /// The report that triggered this round (empty for the initial round).
    pub report: ValidationReport,
}

impl RoundRecord {
    pub fn from_round(
        attempt: u32,
        requests: &[GenerationRequest],
        outcome: &RoundOutcome,
        report: ValidationReport,
    ) -> Self {
        Self {
            attempt,
            at: Utc::now(),
            requests: requests
                .iter()
                .map(|r| RequestRecord {
                    id: r.id.clone(),
                    path: r.path.clone(),
                })
                .collect(),
            committed: outcome.committed.iter().map(|f| f.path.clone()).collect(),
            failures: outcome.failures.clone(),
            report,
        }
    }
}

/// Full run log: input, skeleton, rounds, final state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLog {
    pub started_at: DateTime<Utc>,
    pub source_digest: String,
    pub raw_input: String,
    /// Document snapshot before any generation ran.
    pub skeleton: Option<MergedDocument>,
    pub rounds: Vec<RoundRecord>,
    /// Terminal outcome label: `valid`, `exhausted`, or `cancelled`.
    pub outcome: Option<String>,
    /// Digest of the final document.
    pub final_digest: Option<String>,
}

impl RunLog {
    pub fn new(input: &str) -> Self {
        Self {
            started_at: Utc::now(),
            source_digest: text_digest(input),
            raw_input: input.to_string(),
            skeleton: None,
            rounds: Vec::new(),
            outcome: None,
            final_digest: None,
        }
    }

    pub fn record_skeleton(&mut self, document: &MergedDocument) {
        self.skeleton = Some(document.clone());
    }

    pub fn record_round(&mut self, record: RoundRecord) {
        self.rounds.push(record);
    }

    pub fn finish(&mut self, outcome: &str, document: &MergedDocument) -> Result<()> {
        self.outcome = Some(outcome.to_string());
        self.final_digest = Some(document.digest()?);
        Ok(())
    }
}

/// Append-only JSONL sink for audit records.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Append one record as a JSON line, creating the file and parent
    /// directories as needed.
    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{GameMeta, Matrix, PhaseDef, RoleDef};
    use crate::validate::{DocPath, ErrorKind};

    fn document() -> MergedDocument {
        let matrix = Matrix::skeleton(vec![RoleDef::new("trader")], vec![PhaseDef::new("offer", 1)]);
        MergedDocument::from_skeleton(
            GameMeta {
                name: "auction".to_string(),
                description: None,
                schema_version: 1,
                source_digest: text_digest("input"),
            },
            matrix,
            Vec::new(),
        )
    }

    #[test]
    fn test_run_log_lifecycle() {
        let doc = document();
        let mut log = RunLog::new("input text");
        assert_eq!(log.source_digest, text_digest("input text"));

        log.record_skeleton(&doc);
        log.record_round(RoundRecord {
            attempt: 1,
            at: Utc::now(),
            requests: Vec::new(),
            committed: Vec::new(),
            failures: Vec::new(),
            report: ValidationReport::new(),
        });
        log.finish("valid", &doc).unwrap();

        assert_eq!(log.rounds.len(), 1);
        assert_eq!(log.outcome.as_deref(), Some("valid"));
        assert_eq!(log.final_digest, Some(doc.digest().unwrap()));
    }

    #[test]
    fn test_run_log_round_trips() {
        let mut log = RunLog::new("input");
        let mut report = ValidationReport::new();
        report.push(
            DocPath::Cell(CellPath::new("trader", "offer")),
            ErrorKind::DuplicateTask,
            "dup",
        );
        log.record_round(RoundRecord {
            attempt: 1,
            at: Utc::now(),
            requests: vec![RequestRecord {
                id: "r1".to_string(),
                path: CellPath::new("trader", "offer"),
            }],
            committed: vec![CellPath::new("trader", "offer")],
            failures: Vec::new(),
            report,
        });

        let json = serde_json::to_string(&log).unwrap();
        let back: RunLog = serde_json::from_str(&json).unwrap();
        assert_eq!(back, log);
    }

    #[test]
    fn test_jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::new(dir.path().join("runs").join("audit.jsonl"));

        sink.append(&serde_json::json!({"attempt": 1})).unwrap();
        sink.append(&serde_json::json!({"attempt": 2})).unwrap();

        let content = fs::read_to_string(dir.path().join("runs").join("audit.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"attempt\":1"));
    }
}
