//! Prompt templates and deterministic request compilation.

pub mod compile;
pub mod render;

pub use compile::PromptCompiler;
pub use render::PromptRenderer;
