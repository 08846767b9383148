//! Validator: structural and semantic checks over a merged document.
//!
//! Every check runs fully and accumulates findings; nothing short-circuits.
//! The report must be exhaustive so the repair loop can target every broken
//! path in one pass. An empty report means the document is valid.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::matrix::{CellPath, MergedDocument};
use crate::schema::SchemaContract;

/// Recoverable finding kinds. Fatal kinds live in `PipelineError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    MissingField,
    MissingCell,
    DuplicateTask,
    DanglingReference,
    Cycle,
    OrderViolation,
    GenerationFailure,
    MergeConflict,
    SecurityViolation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingField => "missing-field",
            ErrorKind::MissingCell => "missing-cell",
            ErrorKind::DuplicateTask => "duplicate-task",
            ErrorKind::DanglingReference => "dangling-reference",
            ErrorKind::Cycle => "cycle",
            ErrorKind::OrderViolation => "order-violation",
            ErrorKind::GenerationFailure => "generation-failure",
            ErrorKind::MergeConflict => "merge-conflict",
            ErrorKind::SecurityViolation => "security-violation",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Address of a finding: the document root, one cell, or one input segment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocPath {
    Root,
    Cell(CellPath),
    Segment(u32),
}

impl std::fmt::Display for DocPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocPath::Root => write!(f, "$"),
            DocPath::Cell(path) => write!(f, "{}", path),
            DocPath::Segment(id) => write!(f, "segment:{}", id),
        }
    }
}

/// One finding: where, what kind, and a human/LLM-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub path: DocPath,
    pub kind: ErrorKind,
    pub message: String,
}

impl ReportEntry {
    pub fn new(path: DocPath, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            path,
            kind,
            message: message.into(),
        }
    }
}

/// Ordered sequence of findings. Empty means valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub entries: Vec<ReportEntry>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn push(&mut self, path: DocPath, kind: ErrorKind, message: impl Into<String>) {
        self.entries.push(ReportEntry::new(path, kind, message));
    }

    /// Distinct cell paths named in the report, in deterministic order.
    /// These are the repair loop's regeneration targets.
    pub fn cell_paths(&self) -> Vec<CellPath> {
        let mut paths = BTreeSet::new();
        for entry in &self.entries {
            if let DocPath::Cell(path) = &entry.path {
                paths.insert(path.clone());
            }
        }
        paths.into_iter().collect()
    }

    /// Messages addressed to one cell, for repair prompt context.
    pub fn messages_for(&self, path: &CellPath) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| matches!(&e.path, DocPath::Cell(p) if p == path))
            .map(|e| format!("{}: {}", e.kind, e.message))
            .collect()
    }
}

/// Runs the ordered check sequence against a merged document.
pub struct Validator;

impl Validator {
    pub fn validate(document: &MergedDocument, schema: &SchemaContract) -> ValidationReport {
        let mut report = ValidationReport::new();
        Self::check_structure(document, schema, &mut report);
        Self::check_completeness(document, &mut report);
        Self::check_uniqueness(document, &mut report);
        Self::check_references(document, &mut report);
        Self::check_ordering(document, &mut report);
        tracing::debug!(findings = report.len(), "validated document");
        report
    }

    /// Check 1: required top-level fields present and non-empty.
    fn check_structure(document: &MergedDocument, schema: &SchemaContract, report: &mut ValidationReport) {
        for field in &schema.required_fields {
            let present = match field.as_str() {
                "name" => !document.meta.name.trim().is_empty(),
                "roles" => !document.matrix.roles.is_empty(),
                "phases" => !document.matrix.phases.is_empty(),
                _ => true,
            };
            if !present {
                report.push(
                    DocPath::Root,
                    ErrorKind::MissingField,
                    format!("required field {:?} is missing or empty", field),
                );
            }
        }
    }

    /// Check 2: every declared (role, phase) pair has exactly one cell, and
    /// no cell exists for an undeclared pair. Generation must not have
    /// removed or invented cells.
    fn check_completeness(document: &MergedDocument, report: &mut ValidationReport) {
        let matrix = &document.matrix;
        for role in &matrix.roles {
            for phase in &matrix.phases {
                let path = CellPath::new(&role.name, &phase.name);
                if matrix.cell(&path).is_none() {
                    report.push(
                        DocPath::Cell(path),
                        ErrorKind::MissingCell,
                        "declared pair has no cell",
                    );
                }
            }
        }
        for (path, _) in matrix.iter() {
            if !matrix.has_role(&path.role) || !matrix.has_phase(&path.phase) {
                report.push(
                    DocPath::Cell(path.clone()),
                    ErrorKind::MissingCell,
                    "cell exists for an undeclared role or phase",
                );
            }
        }
    }

    /// Check 3: task names unique within each cell.
    fn check_uniqueness(document: &MergedDocument, report: &mut ValidationReport) {
        for (path, tasks) in document.matrix.iter() {
            let mut seen = BTreeSet::new();
            for task in tasks {
                if !seen.insert(task.name.as_str()) {
                    report.push(
                        DocPath::Cell(path.clone()),
                        ErrorKind::DuplicateTask,
                        format!("task {:?} appears more than once in this cell", task.name),
                    );
                }
            }
        }
    }

    /// Check 4: task transitions resolve to declared phases and the phase
    /// transition graph is acyclic.
    fn check_references(document: &MergedDocument, report: &mut ValidationReport) {
        let matrix = &document.matrix;

        // Dangling references, and the phase graph for cycle detection.
        let mut edges: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (path, tasks) in matrix.iter() {
            for task in tasks {
                let Some(target) = task.transition.as_deref() else {
                    continue;
                };
                if matrix.has_phase(target) {
                    edges.entry(path.phase.as_str()).or_default().insert(target);
                } else {
                    report.push(
                        DocPath::Cell(path.clone()),
                        ErrorKind::DanglingReference,
                        format!("task {:?} transitions to undeclared phase {:?}", task.name, target),
                    );
                }
            }
        }

        let cyclic = Self::cyclic_phases(&edges);
        if cyclic.is_empty() {
            return;
        }
        for (path, tasks) in matrix.iter() {
            if !cyclic.contains(path.phase.as_str()) {
                continue;
            }
            for task in tasks {
                if let Some(target) = task.transition.as_deref() {
                    if cyclic.contains(target) {
                        report.push(
                            DocPath::Cell(path.clone()),
                            ErrorKind::Cycle,
                            format!("task {:?} participates in a phase reference cycle", task.name),
                        );
                    }
                }
            }
        }
    }

    /// Phases sitting on a cycle of the transition graph: members of a
    /// strongly connected component of size > 1, or phases with a self-loop.
    fn cyclic_phases<'a>(edges: &BTreeMap<&'a str, BTreeSet<&'a str>>) -> BTreeSet<&'a str> {
        let mut cyclic = BTreeSet::new();
        for (&phase, targets) in edges {
            if targets.contains(phase) {
                cyclic.insert(phase);
                continue;
            }
            // Depth-first walk looking for a path back to `phase`.
            let mut stack: Vec<&str> = targets.iter().copied().collect();
            let mut visited = BTreeSet::new();
            while let Some(current) = stack.pop() {
                if current == phase {
                    cyclic.insert(phase);
                    break;
                }
                if !visited.insert(current) {
                    continue;
                }
                if let Some(next) = edges.get(current) {
                    stack.extend(next.iter().copied());
                }
            }
        }
        cyclic
    }

    /// Check 5: phase order values form a total order with no ties.
    fn check_ordering(document: &MergedDocument, report: &mut ValidationReport) {
        let mut by_order: BTreeMap<u32, Vec<&str>> = BTreeMap::new();
        for phase in &document.matrix.phases {
            by_order.entry(phase.order).or_default().push(&phase.name);
        }
        for (order, names) in by_order {
            if names.len() > 1 {
                report.push(
                    DocPath::Root,
                    ErrorKind::OrderViolation,
                    format!("phases {:?} share order {}", names, order),
                );
            }
        }
    }
}
