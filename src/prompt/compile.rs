//! Prompt compiler: turns a matrix cell into a generation request.
//!
//! Compilation is a pure function of the cell content and the schema
//! contract: identical inputs always produce an identical request, id
//! included. Template selection is an explicit per-path table lookup with a
//! default, never name-pattern matching.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::render::PromptRenderer;
use crate::error::Result;
use crate::llm::GenerationRequest;
use crate::matrix::{CellPath, MergedDocument};
use crate::schema::SchemaContract;

const DEFAULT_TEMPLATE: &str = "cell";

const CELL_TEMPLATE: &str = "\
You are extracting the tasks one role performs in one phase of an economic game.

Game: {{game}}
Role: {{role}}
Phase: {{phase}}
Declared phases: {{phases}}

Source material for this cell:
{{source}}

Respond with ONLY a JSON array matching this shape (schema v{{version}}):
{{fragment_shape}}

Task names must be unique within the cell. A transition, if present, must
name one of the declared phases. Return [] if the role does nothing in this
phase.
";

/// Enumerated bindings recognized by cell templates.
#[derive(Debug, Serialize)]
struct CellBindings<'a> {
    game: &'a str,
    role: &'a str,
    phase: &'a str,
    phases: String,
    source: &'a str,
    fragment_shape: &'a str,
    version: u32,
}

/// Compiles deterministic generation requests per cell.
pub struct PromptCompiler {
    renderer: PromptRenderer,
    schema: SchemaContract,
    /// Explicit `(role, phase)` to template-name table.
    routes: BTreeMap<CellPath, String>,
}

impl PromptCompiler {
    pub fn new(schema: SchemaContract) -> Result<Self> {
        let mut renderer = PromptRenderer::new();
        renderer.register(DEFAULT_TEMPLATE, CELL_TEMPLATE)?;
        Ok(Self {
            renderer,
            schema,
            routes: BTreeMap::new(),
        })
    }

    /// Register an additional named template.
    pub fn with_template(mut self, name: &str, template: &str) -> Result<Self> {
        self.renderer.register(name, template)?;
        Ok(self)
    }

    /// Route a specific cell to a registered template.
    pub fn route(mut self, path: CellPath, template: impl Into<String>) -> Self {
        self.routes.insert(path, template.into());
        self
    }

    fn template_for(&self, path: &CellPath) -> &str {
        self.routes.get(path).map_or(DEFAULT_TEMPLATE, String::as_str)
    }

    fn bindings<'a>(&'a self, path: &'a CellPath, document: &'a MergedDocument, source: &'a str) -> CellBindings<'a> {
        let phases = document
            .matrix
            .phases
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        CellBindings {
            game: &document.meta.name,
            role: &path.role,
            phase: &path.phase,
            phases,
            source,
            fragment_shape: &self.schema.fragment_shape,
            version: self.schema.version,
        }
    }

    /// Compile the initial request for a cell from its pending source text.
    pub fn compile_cell(&self, path: &CellPath, document: &MergedDocument, source: &str) -> Result<GenerationRequest> {
        let bindings = self.bindings(path, document, source);
        let prompt = self.renderer.render(self.template_for(path), &bindings)?;
        Ok(self.finish(path, prompt))
    }

    /// Compile a repair request: the cell's current content as source, plus
    /// the validation messages for this path as feedback context.
    pub fn compile_repair(
        &self,
        path: &CellPath,
        document: &MergedDocument,
        messages: &[String],
    ) -> Result<GenerationRequest> {
        let current = serde_json::to_string_pretty(document.matrix.cell(path).unwrap_or(&[]))?;
        let source = format!("Current cell content (rejected by validation):\n{}", current);
        let bindings = self.bindings(path, document, &source);
        let feedback = messages
            .iter()
            .map(|m| format!("- {}", m))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = self
            .renderer
            .render_with_feedback(self.template_for(path), &bindings, &feedback)?;
        Ok(self.finish(path, prompt))
    }

    /// Seal the request with its content-derived id.
    fn finish(&self, path: &CellPath, prompt: String) -> GenerationRequest {
        let mut hasher = Sha256::new();
        hasher.update(path.to_string().as_bytes());
        hasher.update([0]);
        hasher.update(self.schema.version.to_le_bytes());
        hasher.update([0]);
        hasher.update(prompt.as_bytes());
        let id = hex::encode(&hasher.finalize()[..8]);
        GenerationRequest {
            id,
            path: path.clone(),
            prompt,
            schema_version: self.schema.version,
        }
    }
}
