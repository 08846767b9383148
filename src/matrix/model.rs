//! Core matrix model: roles, phases, tasks, and the cell grid.
//!
//! The matrix is keyed by `(role, phase)` pairs. Completeness is the load-
//! bearing invariant: once roles and phases are declared, every pair has
//! exactly one cell. An empty task list is a first-class value; an absent
//! cell is always a defect.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// A declared role (participant kind) in the game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDef {
    /// Role name, unique across the document.
    pub name: String,
}

impl RoleDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A declared phase with its position in the deterministic phase sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseDef {
    /// Phase name, unique across the document.
    pub name: String,
    /// Position in the phase sequence. Must be a total order with no ties.
    pub order: u32,
}

impl PhaseDef {
    pub fn new(name: impl Into<String>, order: u32) -> Self {
        Self {
            name: name.into(),
            order,
        }
    }
}

/// A task a role performs in a phase.
///
/// Task names are unique within a cell; the same name may appear in other
/// cells. `transition` optionally names the phase this task hands off to,
/// which the validator resolves against the declared phase set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<String>,
}

impl TaskDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            transition: None,
        }
    }

    /// Set the task description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the phase this task transitions to.
    pub fn with_transition(mut self, phase: impl Into<String>) -> Self {
        self.transition = Some(phase.into());
        self
    }
}

/// Stable address of one cell: a `(role, phase)` pair.
///
/// Serializes as `role.phase` so it can key JSON maps and appear verbatim
/// in validation reports and audit records.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct CellPath {
    pub role: String,
    pub phase: String,
}

impl CellPath {
    pub fn new(role: impl Into<String>, phase: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            phase: phase.into(),
        }
    }
}

impl std::fmt::Display for CellPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.role, self.phase)
    }
}

impl From<CellPath> for String {
    fn from(path: CellPath) -> Self {
        path.to_string()
    }
}

impl TryFrom<String> for CellPath {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        match s.split_once('.') {
            Some((role, phase)) if !role.is_empty() && !phase.is_empty() => {
                Ok(CellPath::new(role, phase))
            }
            _ => Err(format!("invalid cell path: {:?}", s)),
        }
    }
}

/// The Role x Phase -> tasks mapping.
///
/// Constructed complete: `Matrix::skeleton` inserts an empty task list for
/// every declared pair, so downstream stages treat "no task" as data rather
/// than a missing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matrix {
    pub roles: Vec<RoleDef>,
    pub phases: Vec<PhaseDef>,
    cells: BTreeMap<CellPath, Vec<TaskDef>>,
}

impl Matrix {
    /// Build a complete skeleton from declared roles and phases.
    ///
    /// Every `(role, phase)` pair gets an explicit empty cell.
    pub fn skeleton(roles: Vec<RoleDef>, phases: Vec<PhaseDef>) -> Self {
        let mut cells = BTreeMap::new();
        for role in &roles {
            for phase in &phases {
                cells.insert(CellPath::new(&role.name, &phase.name), Vec::new());
            }
        }
        Self { roles, phases, cells }
    }

    /// All cell paths in deterministic (sorted) order.
    pub fn paths(&self) -> impl Iterator<Item = &CellPath> {
        self.cells.keys()
    }

    /// Look up a cell. `None` means the path was never declared.
    pub fn cell(&self, path: &CellPath) -> Option<&[TaskDef]> {
        self.cells.get(path).map(Vec::as_slice)
    }

    /// Append a task to a declared cell.
    pub fn push_task(&mut self, path: &CellPath, task: TaskDef) -> Result<()> {
        match self.cells.get_mut(path) {
            Some(tasks) => {
                tasks.push(task);
                Ok(())
            }
            None => Err(PipelineError::Completeness(path.to_string())),
        }
    }

    /// Replace a declared cell's task list wholesale.
    pub fn replace_cell(&mut self, path: &CellPath, tasks: Vec<TaskDef>) -> Result<()> {
        match self.cells.get_mut(path) {
            Some(cell) => {
                *cell = tasks;
                Ok(())
            }
            None => Err(PipelineError::Completeness(path.to_string())),
        }
    }

    /// Whether a role name is declared.
    pub fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|r| r.name == name)
    }

    /// Whether a phase name is declared.
    pub fn has_phase(&self, name: &str) -> bool {
        self.phases.iter().any(|p| p.name == name)
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True when no roles or phases are declared.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Verify every declared pair has exactly one cell, returning the first
    /// missing path if not. The skeleton constructor makes this impossible;
    /// this re-check guards against generation removing cells.
    pub fn missing_cell(&self) -> Option<CellPath> {
        for role in &self.roles {
            for phase in &self.phases {
                let path = CellPath::new(&role.name, &phase.name);
                if !self.cells.contains_key(&path) {
                    return Some(path);
                }
            }
        }
        None
    }

    /// Iterate `(path, tasks)` pairs in deterministic order.
    pub fn iter(&self) -> impl Iterator<Item = (&CellPath, &Vec<TaskDef>)> {
        self.cells.iter()
    }
}
