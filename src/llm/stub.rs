//! Deterministic scripted generator for tests.
//!
//! Behaviors are scripted per path and consumed in order, so a test can make
//! a path fail once and then succeed, or always produce invalid content.
//! The call counter backs the zero-generation idempotence checks.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::client::{GeneratedFragment, GenerationFailure, GenerationRequest, Generator};
use crate::matrix::{CellPath, TaskDef};

/// One scripted response for a path.
#[derive(Debug, Clone)]
pub enum StubBehavior {
    /// Return these tasks.
    Tasks(Vec<TaskDef>),
    /// Fail with this reason.
    Fail(String),
    /// Sleep, then return these tasks. Used to trigger request timeouts.
    Delay(Duration, Vec<TaskDef>),
    /// Return tasks declared for a different path than requested.
    Mistargeted(CellPath, Vec<TaskDef>),
}

/// Scripted, deterministic [`Generator`] implementation.
#[derive(Default)]
pub struct StubGenerator {
    scripts: Mutex<HashMap<CellPath, VecDeque<StubBehavior>>>,
    calls: AtomicUsize,
}

impl StubGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a behavior for a path. Behaviors are consumed in order; the
    /// last one repeats once the queue is down to a single entry.
    pub fn script(self, path: CellPath, behavior: StubBehavior) -> Self {
        self.scripts.lock().unwrap().entry(path).or_default().push_back(behavior);
        self
    }

    /// Shorthand: always respond to `path` with `tasks`.
    pub fn with_tasks(self, path: CellPath, tasks: Vec<TaskDef>) -> Self {
        self.script(path, StubBehavior::Tasks(tasks))
    }

    /// Total number of generate calls made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_behavior(&self, path: &CellPath) -> Option<StubBehavior> {
        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts.get_mut(path)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl Generator for StubGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedFragment, GenerationFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let Some(behavior) = self.next_behavior(&request.path) else {
            return Err(GenerationFailure {
                path: request.path,
                reason: "no scripted response".to_string(),
            });
        };

        match behavior {
            StubBehavior::Tasks(tasks) => Ok(GeneratedFragment {
                path: request.path,
                tasks,
                provenance: request.id,
            }),
            StubBehavior::Fail(reason) => Err(GenerationFailure {
                path: request.path,
                reason,
            }),
            StubBehavior::Delay(duration, tasks) => {
                tokio::time::sleep(duration).await;
                Ok(GeneratedFragment {
                    path: request.path,
                    tasks,
                    provenance: request.id,
                })
            }
            StubBehavior::Mistargeted(path, tasks) => Ok(GeneratedFragment {
                path,
                tasks,
                provenance: request.id,
            }),
        }
    }
}
