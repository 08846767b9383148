//! End-to-end pipeline: raw text in, validated document (or surfaced
//! failure) out.
//!
//! Wires the stages together: segment, build skeleton, compile and dispatch
//! initial generation for cells with pending narrative text, then hand off
//! to the repair loop. Every exit carries the document; nothing is raised
//! past the caller unhandled.

use std::sync::Arc;
use std::time::Duration;

use crate::audit::{RoundRecord, RunLog};
use crate::builder::MatrixBuilder;
use crate::controller::{ControllerConfig, GenerationController};
use crate::error::{PipelineError, Result};
use crate::llm::Generator;
use crate::matrix::{GameMeta, MergedDocument, document::text_digest};
use crate::prompt::PromptCompiler;
use crate::repair::{CancelFlag, RepairLoop, RunOutcome};
use crate::sanitize::{PatternSanitizer, Sanitizer};
use crate::schema::SchemaContract;
use crate::segment::Segmenter;
use crate::validate::{ValidationReport, Validator};

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Repair round budget.
    pub max_attempts: u32,
    /// Per-request generation timeout.
    pub request_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// A finished run: the outcome plus its audit log.
#[derive(Debug)]
pub struct PipelineRun {
    pub outcome: RunOutcome,
    pub log: RunLog,
}

/// The full translation pipeline.
pub struct Pipeline<G> {
    generator: Arc<G>,
    sanitizer: Arc<dyn Sanitizer>,
    schema: SchemaContract,
    config: PipelineConfig,
}

impl<G: Generator + 'static> Pipeline<G> {
    pub fn new(generator: Arc<G>) -> Self {
        Self {
            generator,
            sanitizer: Arc::new(PatternSanitizer::new()),
            schema: SchemaContract::v1(),
            config: PipelineConfig::default(),
        }
    }

    pub fn with_sanitizer(mut self, sanitizer: Arc<dyn Sanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn with_schema(mut self, schema: SchemaContract) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the pipeline on raw input text.
    pub async fn run(&self, input: &str) -> Result<PipelineRun> {
        self.run_with_cancel(input, &CancelFlag::new()).await
    }

    /// Run with a cancellation flag checked between rounds.
    pub async fn run_with_cancel(&self, input: &str, cancel: &CancelFlag) -> Result<PipelineRun> {
        let mut log = RunLog::new(input);

        // Input screening happens before anything reaches the compiler.
        if let Some(pattern) = self.sanitizer.screen(input) {
            return Err(PipelineError::Security {
                path: "$".to_string(),
                pattern,
            });
        }

        let segments = Segmenter::segment(input)?;
        let blueprint = MatrixBuilder::build(&segments)?;
        let meta = GameMeta {
            name: blueprint.name.clone(),
            description: blueprint.description.clone(),
            schema_version: self.schema.version,
            source_digest: text_digest(input),
        };
        let mut document = MergedDocument::from_skeleton(meta, blueprint.matrix.clone(), blueprint.payoffs.clone());
        log.record_skeleton(&document);

        let compiler = PromptCompiler::new(self.schema.clone())?;
        let controller = GenerationController::new(Arc::clone(&self.generator), Arc::clone(&self.sanitizer))
            .with_config(ControllerConfig {
                request_timeout: self.config.request_timeout,
            });

        // Initial generation, only for cells with unstructured source text.
        let mut carried = Vec::new();
        if !blueprint.pending.is_empty() {
            let mut requests = Vec::with_capacity(blueprint.pending.len());
            for (path, source) in &blueprint.pending {
                requests.push(compiler.compile_cell(path, &document, source)?);
            }
            tracing::info!(cells = requests.len(), "initial generation round");
            let outcome = controller.run_round(&document, requests.clone(), 0).await?;
            log.record_round(RoundRecord::from_round(0, &requests, &outcome, ValidationReport::new()));
            document = outcome.document;
            carried = outcome.failures;
        }

        let repair = RepairLoop::new(controller, compiler, self.schema.clone(), self.config.max_attempts);
        let outcome = repair.run(document, carried, cancel, &mut log).await?;

        let label = match &outcome {
            RunOutcome::Valid(_) => "valid",
            RunOutcome::Exhausted { .. } => "exhausted",
            RunOutcome::Cancelled { .. } => "cancelled",
        };
        log.finish(label, outcome.document())?;
        Ok(PipelineRun { outcome, log })
    }

    /// Human-review hook: validate an edited document without generation.
    pub fn resume(&self, document: MergedDocument) -> RunOutcome {
        let report = Validator::validate(&document, &self.schema);
        if report.is_empty() {
            RunOutcome::Valid(document)
        } else {
            RunOutcome::Exhausted {
                document,
                report,
                history: Vec::new(),
            }
        }
    }
}
