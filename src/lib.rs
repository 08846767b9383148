//! Stagehand - natural-language game descriptions to structured configuration
//!
//! Stagehand turns free-text descriptions of multi-agent economic games into a
//! validated role/phase/task matrix. Deterministic stages (segmentation,
//! skeleton building, prompt compilation, validation) bracket the
//! non-deterministic generation step, and a bounded repair loop regenerates
//! only the cells that fail validation.

pub mod audit;
pub mod builder;
pub mod controller;
pub mod error;
pub mod llm;
pub mod matrix;
pub mod pipeline;
pub mod prompt;
pub mod repair;
pub mod sanitize;
pub mod schema;
pub mod segment;
pub mod validate;

pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, PipelineConfig, PipelineRun};
pub use repair::{CancelFlag, RunOutcome};
