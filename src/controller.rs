//! Generation-merge controller: dispatches compiled requests concurrently
//! and merges returned fragments into the document.
//!
//! The merge is keyed by each fragment's declared path and is independent of
//! completion order: results are collected, sorted, and conflict-checked
//! before a single commit step installs the whole round. Two fragments
//! targeting one path with different content is a conflict on that path,
//! never last-write-wins. A failing cell leaves its pre-generation value in
//! place; one bad cell never aborts the batch.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::error::{PipelineError, Result};
use crate::llm::{GeneratedFragment, GenerationRequest, Generator};
use crate::matrix::{CellPath, MergedDocument, Provenance, TaskDef};
use crate::sanitize::Sanitizer;
use crate::validate::ErrorKind;

/// Controller tuning.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Per-request timeout. Expiry is a per-path failure, not a run abort.
    pub request_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// A recoverable per-path failure recorded during a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathFailure {
    pub path: CellPath,
    pub kind: ErrorKind,
    pub message: String,
}

/// Result of one dispatch round.
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    /// The document with this round's fragments committed.
    pub document: MergedDocument,
    /// Fragments that were installed, in path order.
    pub committed: Vec<GeneratedFragment>,
    /// Per-path failures: generation errors, timeouts, merge conflicts.
    pub failures: Vec<PathFailure>,
}

enum Completion {
    Fragment(GeneratedFragment),
    Failed(String),
}

/// Dispatches requests to the generation capability and merges fragments.
pub struct GenerationController<G> {
    generator: Arc<G>,
    sanitizer: Arc<dyn Sanitizer>,
    config: ControllerConfig,
}

impl<G: Generator + 'static> GenerationController<G> {
    pub fn new(generator: Arc<G>, sanitizer: Arc<dyn Sanitizer>) -> Self {
        Self {
            generator,
            sanitizer,
            config: ControllerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Dispatch all requests concurrently and commit the merged result.
    ///
    /// `attempt` is recorded in the provenance of every installed fragment.
    pub async fn run_round(
        &self,
        document: &MergedDocument,
        requests: Vec<GenerationRequest>,
        attempt: u32,
    ) -> Result<RoundOutcome> {
        self.screen_outbound(&requests)?;
        let requested: BTreeSet<CellPath> = requests.iter().map(|r| r.path.clone()).collect();

        tracing::debug!(requests = requests.len(), attempt, "dispatching generation round");
        let mut completions = self.dispatch(requests).await?;

        // Sort by (path, request id) so the merge below never depends on
        // completion order.
        completions.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

        let mut accepted: BTreeMap<CellPath, GeneratedFragment> = BTreeMap::new();
        let mut conflicted: BTreeSet<CellPath> = BTreeSet::new();
        let mut failures: Vec<PathFailure> = Vec::new();

        for (request_path, request_id, completion) in completions {
            let fragment = match completion {
                Completion::Fragment(fragment) => fragment,
                Completion::Failed(reason) => {
                    failures.push(PathFailure {
                        path: request_path,
                        kind: ErrorKind::GenerationFailure,
                        message: reason,
                    });
                    continue;
                }
            };

            if fragment.path != request_path {
                failures.push(PathFailure {
                    path: request_path.clone(),
                    kind: ErrorKind::GenerationFailure,
                    message: format!(
                        "fragment for request {} declared path {} instead of {}",
                        request_id, fragment.path, request_path
                    ),
                });
                continue;
            }

            self.screen_inbound(&fragment)?;

            if conflicted.contains(&fragment.path) {
                continue;
            }
            match accepted.get(&fragment.path) {
                None => {
                    accepted.insert(fragment.path.clone(), fragment);
                }
                Some(existing) if existing.tasks == fragment.tasks => {}
                Some(existing) => {
                    failures.push(PathFailure {
                        path: fragment.path.clone(),
                        kind: ErrorKind::MergeConflict,
                        message: format!(
                            "divergent fragments for one path: {} vs {}",
                            summarize(&existing.tasks),
                            summarize(&fragment.tasks)
                        ),
                    });
                    conflicted.insert(fragment.path.clone());
                    accepted.remove(&fragment.path);
                }
            }
        }

        debug_assert!(accepted.keys().all(|p| requested.contains(p)));

        // Commit: install every accepted fragment into a fresh copy of the
        // document in one step. Conflicted and failed paths keep their
        // pre-round value.
        let mut next = document.clone();
        let mut committed = Vec::with_capacity(accepted.len());
        for (path, fragment) in accepted {
            next.install(
                &path,
                fragment.tasks.clone(),
                Provenance {
                    request_id: fragment.provenance.clone(),
                    attempt,
                },
            )?;
            committed.push(fragment);
        }

        tracing::debug!(
            committed = committed.len(),
            failures = failures.len(),
            "generation round merged"
        );
        Ok(RoundOutcome {
            document: next,
            committed,
            failures,
        })
    }

    /// Run every request concurrently with a per-request timeout.
    async fn dispatch(
        &self,
        requests: Vec<GenerationRequest>,
    ) -> Result<Vec<(CellPath, String, Completion)>> {
        let mut join_set = JoinSet::new();
        for request in requests {
            let generator = Arc::clone(&self.generator);
            let limit = self.config.request_timeout;
            join_set.spawn(async move {
                let path = request.path.clone();
                let id = request.id.clone();
                let completion = match timeout(limit, generator.generate(request)).await {
                    Ok(Ok(fragment)) => Completion::Fragment(fragment),
                    Ok(Err(failure)) => Completion::Failed(failure.reason),
                    Err(_) => Completion::Failed(format!("timed out after {:?}", limit)),
                };
                (path, id, completion)
            });
        }

        let mut completions = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let entry = joined.map_err(|e| PipelineError::InvalidState(format!("dispatch task failed: {}", e)))?;
            completions.push(entry);
        }
        Ok(completions)
    }

    fn screen_outbound(&self, requests: &[GenerationRequest]) -> Result<()> {
        for request in requests {
            if let Some(pattern) = self.sanitizer.screen(&request.prompt) {
                return Err(PipelineError::Security {
                    path: request.path.to_string(),
                    pattern,
                });
            }
        }
        Ok(())
    }

    fn screen_inbound(&self, fragment: &GeneratedFragment) -> Result<()> {
        for task in &fragment.tasks {
            let mut text = task.name.clone();
            if let Some(description) = &task.description {
                text.push('\n');
                text.push_str(description);
            }
            if let Some(pattern) = self.sanitizer.screen(&text) {
                return Err(PipelineError::Security {
                    path: fragment.path.to_string(),
                    pattern,
                });
            }
        }
        Ok(())
    }
}

fn summarize(tasks: &[TaskDef]) -> String {
    let names: Vec<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
    format!("[{}]", names.join(", "))
}
