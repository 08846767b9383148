//! The merged document: matrix plus top-level game metadata and payoffs.
//!
//! Every generated subtree is tagged with the provenance of the request that
//! produced it, so audit records can tie document content back to specific
//! rounds.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::model::{CellPath, Matrix, TaskDef};
use crate::error::Result;

/// Top-level game metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameMeta {
    /// Game name, extracted from the setup segment or defaulted.
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Schema contract version the document was built against.
    pub schema_version: u32,
    /// Hex digest of the raw input text.
    pub source_digest: String,
}

/// A payoff consequence parsed from a PAYOFFS segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoffEntry {
    pub phase: String,
    pub role: String,
    pub choice: String,
    pub payoff: String,
}

/// Which request last wrote a cell, and in which repair round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub request_id: String,
    pub attempt: u32,
}

/// The full structured document: matrix, metadata, payoffs, provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedDocument {
    pub meta: GameMeta,
    pub matrix: Matrix,
    pub payoffs: Vec<PayoffEntry>,
    /// Per-cell provenance for generated content. Cells still at their
    /// skeleton value have no entry.
    pub provenance: BTreeMap<CellPath, Provenance>,
}

impl MergedDocument {
    /// Wrap a skeleton matrix into a document with no generated content.
    pub fn from_skeleton(meta: GameMeta, matrix: Matrix, payoffs: Vec<PayoffEntry>) -> Self {
        Self {
            meta,
            matrix,
            payoffs,
            provenance: BTreeMap::new(),
        }
    }

    /// Install generated tasks at a path, recording provenance.
    pub fn install(&mut self, path: &CellPath, tasks: Vec<TaskDef>, provenance: Provenance) -> Result<()> {
        self.matrix.replace_cell(path, tasks)?;
        self.provenance.insert(path.clone(), provenance);
        Ok(())
    }

    /// Canonical JSON serialization of one cell, used to check that repair
    /// rounds leave untouched cells byte-identical.
    pub fn cell_fingerprint(&self, path: &CellPath) -> Result<Vec<u8>> {
        let tasks = self.matrix.cell(path).unwrap_or(&[]);
        Ok(serde_json::to_vec(tasks)?)
    }

    /// Hex digest over the canonical JSON form of the whole document.
    pub fn digest(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Render the document as YAML, the final artifact shape.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Digest helper for raw input text.
pub fn text_digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::model::{PhaseDef, RoleDef};

    fn document() -> MergedDocument {
        let matrix = Matrix::skeleton(
            vec![RoleDef::new("trader"), RoleDef::new("observer")],
            vec![PhaseDef::new("offer", 1), PhaseDef::new("settlement", 2)],
        );
        let meta = GameMeta {
            name: "double auction".to_string(),
            description: None,
            schema_version: 1,
            source_digest: text_digest("input"),
        };
        MergedDocument::from_skeleton(meta, matrix, Vec::new())
    }

    #[test]
    fn test_from_skeleton_has_no_provenance() {
        let doc = document();
        assert!(doc.provenance.is_empty());
        assert_eq!(doc.matrix.len(), 4);
    }

    #[test]
    fn test_install_records_provenance() {
        let mut doc = document();
        let path = CellPath::new("trader", "offer");
        doc.install(
            &path,
            vec![TaskDef::new("SubmitOffer")],
            Provenance {
                request_id: "req-1".to_string(),
                attempt: 1,
            },
        )
        .unwrap();

        assert_eq!(doc.matrix.cell(&path).unwrap().len(), 1);
        assert_eq!(doc.provenance[&path].request_id, "req-1");
    }

    #[test]
    fn test_install_on_undeclared_path_fails() {
        let mut doc = document();
        let path = CellPath::new("ghost", "offer");
        let err = doc
            .install(
                &path,
                vec![TaskDef::new("Haunt")],
                Provenance {
                    request_id: "req-2".to_string(),
                    attempt: 1,
                },
            )
            .unwrap_err();
        assert!(matches!(err, crate::error::PipelineError::Completeness(_)));
        assert!(!doc.provenance.contains_key(&path));
    }

    #[test]
    fn test_cell_fingerprint_changes_only_with_content() {
        let mut doc = document();
        let touched = CellPath::new("trader", "offer");
        let untouched = CellPath::new("observer", "offer");

        let before = doc.cell_fingerprint(&untouched).unwrap();
        doc.install(
            &touched,
            vec![TaskDef::new("SubmitOffer")],
            Provenance {
                request_id: "req-3".to_string(),
                attempt: 1,
            },
        )
        .unwrap();

        assert_eq!(doc.cell_fingerprint(&untouched).unwrap(), before);
        assert_ne!(doc.cell_fingerprint(&touched).unwrap(), before);
    }

    #[test]
    fn test_digest_is_deterministic() {
        let a = document();
        let b = document();
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());
    }

    #[test]
    fn test_round_trip_json() {
        let mut doc = document();
        doc.install(
            &CellPath::new("trader", "settlement"),
            vec![TaskDef::new("Settle").with_description("Clear the book")],
            Provenance {
                request_id: "req-4".to_string(),
                attempt: 2,
            },
        )
        .unwrap();

        let json = serde_json::to_string(&doc).unwrap();
        let back: MergedDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(back, doc);
        assert!(back.matrix.missing_cell().is_none());
    }

    #[test]
    fn test_to_yaml_renders() {
        let doc = document();
        let yaml = doc.to_yaml().unwrap();
        assert!(yaml.contains("double auction"));
        assert!(yaml.contains("trader"));
    }
}
