//! Matrix builder: derives a complete skeleton from topic segments.
//!
//! Roles and phases come from ROLES/PHASES segments; task cells are
//! populated from structured MECHANICS/PAYOFFS lines. Every declared
//! `(role, phase)` pair gets a cell before generation runs, so "no task"
//! is data, not a missing key. Narrative mechanics text that does not
//! parse into structured tasks is kept per cell as pending material for
//! the prompt compiler.

use std::collections::BTreeMap;

use crate::error::{PipelineError, Result};
use crate::matrix::{CellPath, Matrix, PayoffEntry, PhaseDef, RoleDef, TaskDef};
use crate::segment::{Segment, Topic};

/// Builder output: the skeleton plus everything the later stages need.
#[derive(Debug, Clone)]
pub struct Blueprint {
    pub matrix: Matrix,
    /// Game name from the setup segment, or a default.
    pub name: String,
    pub description: Option<String>,
    pub payoffs: Vec<PayoffEntry>,
    /// Narrative text per cell that still needs generation.
    pub pending: BTreeMap<CellPath, String>,
}

/// Builds a complete matrix skeleton from ordered segments.
pub struct MatrixBuilder;

impl MatrixBuilder {
    pub fn build(segments: &[Segment]) -> Result<Blueprint> {
        let roles = Self::collect_defs(segments, Topic::Roles)
            .into_iter()
            .map(|(name, _)| RoleDef::new(name))
            .collect::<Vec<_>>();

        let phases = Self::collect_defs(segments, Topic::Phases)
            .into_iter()
            .map(|(name, order)| PhaseDef::new(name, order))
            .collect::<Vec<_>>();

        let mut matrix = Matrix::skeleton(roles, phases);
        let mut pending: BTreeMap<CellPath, String> = BTreeMap::new();
        let mut payoffs = Vec::new();

        for segment in segments {
            match segment.topic {
                Topic::Mechanics => {
                    Self::apply_cell_lines(segment.body(), &mut matrix, &mut pending);
                }
                Topic::Payoffs => {
                    for line in segment.body().lines() {
                        if let Some(entry) = Self::parse_payoff(line) {
                            payoffs.push(entry);
                        } else {
                            Self::apply_cell_line(line, &mut matrix, &mut pending);
                        }
                    }
                }
                _ => {}
            }
        }

        // Skeleton construction makes this unreachable; kept as the stated
        // pre-generation completeness gate.
        if let Some(path) = matrix.missing_cell() {
            return Err(PipelineError::Completeness(path.to_string()));
        }

        let (name, description) = Self::extract_meta(segments);
        tracing::debug!(
            roles = matrix.roles.len(),
            phases = matrix.phases.len(),
            pending = pending.len(),
            "built matrix skeleton"
        );

        Ok(Blueprint {
            matrix,
            name,
            description,
            payoffs,
            pending,
        })
    }

    /// Collect unique list entries (name, order) from all segments of a topic.
    ///
    /// List items look like `- name`, `* name`, or `2. name`; an explicit
    /// number becomes the order, otherwise entries are numbered by
    /// appearance. Duplicate names keep their first occurrence.
    fn collect_defs(segments: &[Segment], topic: Topic) -> Vec<(String, u32)> {
        let mut defs: Vec<(String, u32)> = Vec::new();
        let mut next_order = 1u32;
        for segment in segments.iter().filter(|s| s.topic == topic) {
            for line in segment.body().lines() {
                let Some((name, explicit)) = Self::parse_list_item(line) else {
                    continue;
                };
                if defs.iter().any(|(existing, _)| *existing == name) {
                    continue;
                }
                let order = explicit.unwrap_or(next_order);
                next_order = order + 1;
                defs.push((name, order));
            }
        }
        defs
    }

    /// Parse one list item line into `(name, explicit_order)`.
    fn parse_list_item(line: &str) -> Option<(String, Option<u32>)> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        let (rest, explicit) = if let Some(rest) = trimmed.strip_prefix('-').or_else(|| trimmed.strip_prefix('*')) {
            (rest, None)
        } else if let Some((num, rest)) = trimmed.split_once('.') {
            let order = num.trim().parse::<u32>().ok()?;
            (rest, Some(order))
        } else {
            return None;
        };

        // `- dictator: splits the pot` keeps only the name part.
        let name = rest.split(':').next().unwrap_or(rest).trim();
        if name.is_empty() {
            return None;
        }
        Some((name.to_string(), explicit))
    }

    fn apply_cell_lines(body: &str, matrix: &mut Matrix, pending: &mut BTreeMap<CellPath, String>) {
        for line in body.lines() {
            Self::apply_cell_line(line, matrix, pending);
        }
    }

    /// Apply one `role.phase: ...` line: structured task lists go straight
    /// into the cell, narrative text becomes pending generation material.
    fn apply_cell_line(line: &str, matrix: &mut Matrix, pending: &mut BTreeMap<CellPath, String>) {
        let trimmed = line.trim();
        let Some((path_part, rest)) = trimmed.split_once(':') else {
            return;
        };
        let Ok(path) = CellPath::try_from(path_part.trim().to_string()) else {
            return;
        };
        if !matrix.has_role(&path.role) || !matrix.has_phase(&path.phase) {
            tracing::warn!(path = %path, "cell line references undeclared role or phase");
            return;
        }

        match Self::parse_task_list(rest) {
            Some(tasks) => {
                for task in tasks {
                    // Path declared above, push cannot fail.
                    let _ = matrix.push_task(&path, task);
                }
            }
            None => {
                let slot = pending.entry(path).or_default();
                if !slot.is_empty() {
                    slot.push('\n');
                }
                slot.push_str(rest.trim());
            }
        }
    }

    /// Parse `TaskA, TaskB -> phase` style task lists. Returns `None` when
    /// any piece is not identifier-like, meaning the text is narrative.
    fn parse_task_list(rest: &str) -> Option<Vec<TaskDef>> {
        let mut tasks = Vec::new();
        for piece in rest.split(',') {
            let piece = piece.trim();
            if piece.is_empty() {
                return None;
            }
            let (name, transition) = match piece.split_once("->") {
                Some((name, phase)) => (name.trim(), Some(phase.trim())),
                None => (piece, None),
            };
            if !Self::is_identifier(name) || !transition.is_none_or(Self::is_identifier) {
                return None;
            }
            let mut task = TaskDef::new(name);
            if let Some(phase) = transition {
                task = task.with_transition(phase);
            }
            tasks.push(task);
        }
        if tasks.is_empty() { None } else { Some(tasks) }
    }

    fn is_identifier(s: &str) -> bool {
        !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    }

    /// Parse a payoff line: `role.phase: choice => payoff`.
    fn parse_payoff(line: &str) -> Option<PayoffEntry> {
        let (path_part, rest) = line.trim().split_once(':')?;
        let path = CellPath::try_from(path_part.trim().to_string()).ok()?;
        let (choice, payoff) = rest.split_once("=>")?;
        Some(PayoffEntry {
            phase: path.phase,
            role: path.role,
            choice: choice.trim().to_string(),
            payoff: payoff.trim().to_string(),
        })
    }

    /// Game name and description from the first SETUP segment, falling back
    /// to the leading OTHER segment.
    fn extract_meta(segments: &[Segment]) -> (String, Option<String>) {
        let source = segments
            .iter()
            .find(|s| s.topic == Topic::Setup)
            .map(Segment::body)
            .or_else(|| segments.iter().find(|s| s.topic == Topic::Other).map(Segment::body));

        let Some(body) = source else {
            return ("untitled game".to_string(), None);
        };

        let mut lines = body.lines().map(str::trim).filter(|l| !l.is_empty());
        let name = lines
            .next()
            .map(|l| l.trim_end_matches('.').to_string())
            .unwrap_or_else(|| "untitled game".to_string());
        let description: Vec<&str> = lines.collect();
        let description = if description.is_empty() {
            None
        } else {
            Some(description.join(" "))
        };
        (name, description)
    }
}
