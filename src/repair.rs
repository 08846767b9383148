//! Repair loop: bounded, targeted regeneration of failing paths.
//!
//! State machine RUNNING -> (VALID | EXHAUSTED). Each round validates the
//! document, rebuilds requests for the distinct cell paths in the report
//! (carrying the findings as prompt feedback), re-dispatches only those
//! paths, and commits the merged result. Cells not named in the report are
//! never regenerated, which keeps repairs non-regressing. Exhaustion after
//! `max_attempts` rounds is a surfaced outcome, not a crash.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::audit::{RoundRecord, RunLog};
use crate::controller::{GenerationController, PathFailure};
use crate::error::Result;
use crate::llm::Generator;
use crate::matrix::MergedDocument;
use crate::prompt::PromptCompiler;
use crate::schema::SchemaContract;
use crate::validate::{DocPath, ValidationReport, Validator};

/// One round's report, kept for the caller and the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub report: ValidationReport,
}

/// Repair loop state. Single-writer: only the loop controller mutates it,
/// and only between dispatch rounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub attempt: u32,
    pub max_attempts: u32,
    pub history: Vec<AttemptRecord>,
}

impl RunState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            history: Vec::new(),
        }
    }

    fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// How a run ended. Never an unhandled failure: the caller always gets the
/// document back, with the report and history when it is not valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Validation passed; the document is final.
    Valid(MergedDocument),
    /// The attempt budget ran out with findings remaining. Human-review
    /// boundary: the caller may edit and resubmit.
    Exhausted {
        document: MergedDocument,
        report: ValidationReport,
        history: Vec<AttemptRecord>,
    },
    /// The run was cancelled between rounds.
    Cancelled {
        document: MergedDocument,
        report: ValidationReport,
        history: Vec<AttemptRecord>,
    },
}

impl RunOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, RunOutcome::Valid(_))
    }

    pub fn document(&self) -> &MergedDocument {
        match self {
            RunOutcome::Valid(document) => document,
            RunOutcome::Exhausted { document, .. } => document,
            RunOutcome::Cancelled { document, .. } => document,
        }
    }
}

/// Cooperative cancellation flag, checked between rounds. In-flight
/// generation calls are abandoned, never awaited to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bounded iterative repair controller.
pub struct RepairLoop<G> {
    controller: GenerationController<G>,
    compiler: PromptCompiler,
    schema: SchemaContract,
    max_attempts: u32,
}

impl<G: Generator + 'static> RepairLoop<G> {
    pub fn new(
        controller: GenerationController<G>,
        compiler: PromptCompiler,
        schema: SchemaContract,
        max_attempts: u32,
    ) -> Self {
        Self {
            controller,
            compiler,
            schema,
            max_attempts,
        }
    }

    /// Run to VALID or EXHAUSTED.
    ///
    /// `carried` holds per-path failures from the round that produced
    /// `document` (initial generation), so timed-out or conflicted paths are
    /// retried even when the document itself validates.
    pub async fn run(
        &self,
        document: MergedDocument,
        carried: Vec<PathFailure>,
        cancel: &CancelFlag,
        log: &mut RunLog,
    ) -> Result<RunOutcome> {
        let mut state = RunState::new(self.max_attempts);
        let mut document = document;
        let mut carried = carried;

        loop {
            let mut report = Validator::validate(&document, &self.schema);
            for failure in carried.drain(..) {
                report.push(DocPath::Cell(failure.path), failure.kind, failure.message);
            }

            if report.is_empty() {
                tracing::info!(attempts = state.attempt, "document valid");
                return Ok(RunOutcome::Valid(document));
            }
            if state.exhausted() {
                tracing::warn!(
                    attempts = state.attempt,
                    findings = report.len(),
                    "repair budget exhausted"
                );
                return Ok(RunOutcome::Exhausted {
                    document,
                    report,
                    history: state.history,
                });
            }
            if cancel.is_cancelled() {
                tracing::info!(attempts = state.attempt, "run cancelled between rounds");
                return Ok(RunOutcome::Cancelled {
                    document,
                    report,
                    history: state.history,
                });
            }

            state.attempt += 1;
            let targets = report.cell_paths();
            tracing::debug!(attempt = state.attempt, targets = targets.len(), "repair round");

            let mut requests = Vec::with_capacity(targets.len());
            for path in &targets {
                let messages = report.messages_for(path);
                requests.push(self.compiler.compile_repair(path, &document, &messages)?);
            }

            let outcome = self.controller.run_round(&document, requests.clone(), state.attempt).await?;
            log.record_round(RoundRecord::from_round(
                state.attempt,
                &requests,
                &outcome,
                report.clone(),
            ));
            document = outcome.document;
            carried = outcome.failures;
            state.history.push(AttemptRecord {
                attempt: state.attempt,
                report,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{StubBehavior, StubGenerator};
    use crate::matrix::document::text_digest;
    use crate::matrix::{CellPath, GameMeta, Matrix, PhaseDef, Provenance, RoleDef, TaskDef};
    use crate::sanitize::PatternSanitizer;
    use crate::validate::ErrorKind;

    fn document() -> MergedDocument {
        let matrix = Matrix::skeleton(
            vec![RoleDef::new("trader"), RoleDef::new("observer")],
            vec![PhaseDef::new("offer", 1), PhaseDef::new("settlement", 2)],
        );
        MergedDocument::from_skeleton(
            GameMeta {
                name: "double auction".to_string(),
                description: None,
                schema_version: 1,
                source_digest: text_digest("x"),
            },
            matrix,
            Vec::new(),
        )
    }

    fn repair_loop(stub: StubGenerator, max_attempts: u32) -> (RepairLoop<StubGenerator>, Arc<StubGenerator>) {
        let generator = Arc::new(stub);
        let controller = GenerationController::new(Arc::clone(&generator), Arc::new(PatternSanitizer::new()));
        let schema = SchemaContract::v1();
        let compiler = PromptCompiler::new(schema.clone()).unwrap();
        (RepairLoop::new(controller, compiler, schema, max_attempts), generator)
    }

    #[tokio::test]
    async fn test_valid_document_needs_zero_generation_calls() {
        let (repair, generator) = repair_loop(StubGenerator::new(), 3);
        let outcome = repair.run(document(), Vec::new(), &CancelFlag::new(), &mut RunLog::new("test")).await.unwrap();

        assert!(outcome.is_valid());
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_broken_cell_is_repaired() {
        let path = CellPath::new("trader", "offer");
        let mut doc = document();
        doc.install(
            &path,
            vec![TaskDef::new("Bid"), TaskDef::new("Bid")],
            Provenance {
                request_id: "seed".to_string(),
                attempt: 0,
            },
        )
        .unwrap();

        let stub = StubGenerator::new().with_tasks(path.clone(), vec![TaskDef::new("Bid"), TaskDef::new("Ask")]);
        let (repair, generator) = repair_loop(stub, 3);

        let outcome = repair.run(doc, Vec::new(), &CancelFlag::new(), &mut RunLog::new("test")).await.unwrap();
        let RunOutcome::Valid(fixed) = outcome else {
            panic!("expected valid outcome");
        };
        assert_eq!(fixed.matrix.cell(&path).unwrap().len(), 2);
        assert_eq!(generator.calls(), 1);
        assert_eq!(fixed.provenance[&path].attempt, 1);
    }

    #[tokio::test]
    async fn test_repair_does_not_perturb_other_cells() {
        let broken = CellPath::new("trader", "offer");
        let healthy = CellPath::new("observer", "settlement");

        let mut doc = document();
        doc.install(
            &broken,
            vec![TaskDef::new("Bid"), TaskDef::new("Bid")],
            Provenance {
                request_id: "seed".to_string(),
                attempt: 0,
            },
        )
        .unwrap();
        doc.install(
            &healthy,
            vec![TaskDef::new("Watch")],
            Provenance {
                request_id: "seed".to_string(),
                attempt: 0,
            },
        )
        .unwrap();

        let before = doc.cell_fingerprint(&healthy).unwrap();

        let stub = StubGenerator::new().with_tasks(broken.clone(), vec![TaskDef::new("Bid")]);
        let (repair, generator) = repair_loop(stub, 3);
        let outcome = repair.run(doc, Vec::new(), &CancelFlag::new(), &mut RunLog::new("test")).await.unwrap();

        assert!(outcome.is_valid());
        assert_eq!(outcome.document().cell_fingerprint(&healthy).unwrap(), before);
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_always_failing_cell_exhausts_in_exactly_max_attempts() {
        let path = CellPath::new("trader", "offer");
        let mut doc = document();
        doc.install(
            &path,
            vec![TaskDef::new("Bid"), TaskDef::new("Bid")],
            Provenance {
                request_id: "seed".to_string(),
                attempt: 0,
            },
        )
        .unwrap();

        // Every regeneration still violates uniqueness.
        let stub = StubGenerator::new().with_tasks(path.clone(), vec![TaskDef::new("Bid"), TaskDef::new("Bid")]);
        let (repair, generator) = repair_loop(stub, 3);

        let outcome = repair.run(doc, Vec::new(), &CancelFlag::new(), &mut RunLog::new("test")).await.unwrap();
        let RunOutcome::Exhausted { report, history, .. } = outcome else {
            panic!("expected exhausted outcome");
        };

        assert_eq!(generator.calls(), 3);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].attempt, 1);
        assert_eq!(history[2].attempt, 3);
        assert_eq!(report.cell_paths(), vec![path]);
    }

    #[tokio::test]
    async fn test_carried_failure_is_retried_even_when_document_validates() {
        let path = CellPath::new("observer", "settlement");
        let stub = StubGenerator::new().with_tasks(path.clone(), vec![TaskDef::new("Settle")]);
        let (repair, generator) = repair_loop(stub, 3);

        let carried = vec![PathFailure {
            path: path.clone(),
            kind: ErrorKind::GenerationFailure,
            message: "timed out after 30s".to_string(),
        }];

        let outcome = repair.run(document(), carried, &CancelFlag::new(), &mut RunLog::new("test")).await.unwrap();
        let RunOutcome::Valid(fixed) = outcome else {
            panic!("expected valid outcome");
        };
        assert_eq!(fixed.matrix.cell(&path).unwrap()[0].name, "Settle");
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_surfaces_state() {
        let path = CellPath::new("trader", "offer");
        let mut doc = document();
        doc.install(
            &path,
            vec![TaskDef::new("Bid"), TaskDef::new("Bid")],
            Provenance {
                request_id: "seed".to_string(),
                attempt: 0,
            },
        )
        .unwrap();

        let cancel = CancelFlag::new();
        cancel.cancel();

        let (repair, generator) = repair_loop(StubGenerator::new(), 3);
        let outcome = repair.run(doc, Vec::new(), &cancel, &mut RunLog::new("test")).await.unwrap();

        let RunOutcome::Cancelled { report, history, .. } = outcome else {
            panic!("expected cancelled outcome");
        };
        assert!(!report.is_empty());
        assert!(history.is_empty());
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_repair_request_carries_error_context() {
        // A failing first repair captures the feedback path; the scripted
        // second response succeeds so the loop terminates.
        let path = CellPath::new("trader", "offer");
        let mut doc = document();
        doc.install(
            &path,
            vec![TaskDef::new("Bid").with_transition("nowhere")],
            Provenance {
                request_id: "seed".to_string(),
                attempt: 0,
            },
        )
        .unwrap();

        let stub = StubGenerator::new()
            .script(path.clone(), StubBehavior::Fail("refused".to_string()))
            .script(path.clone(), StubBehavior::Tasks(vec![TaskDef::new("Bid")]));
        let (repair, generator) = repair_loop(stub, 5);

        let outcome = repair.run(doc, Vec::new(), &CancelFlag::new(), &mut RunLog::new("test")).await.unwrap();
        assert!(outcome.is_valid());
        assert_eq!(generator.calls(), 2);
    }

    #[test]
    fn test_run_state_serializes() {
        let mut state = RunState::new(3);
        state.attempt = 1;
        state.history.push(AttemptRecord {
            attempt: 1,
            report: ValidationReport::new(),
        });
        let json = serde_json::to_string(&state).unwrap();
        let back: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
