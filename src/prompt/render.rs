//! Prompt renderer: Handlebars templates with explicit bindings.
//!
//! Rendering is a pure function of `(template, bindings)`. Templates are
//! registered by name up front; there is no global template-resolution
//! state.

use handlebars::Handlebars;
use serde::Serialize;

use crate::error::{PipelineError, Result};

/// Renders prompt templates using Handlebars templating.
pub struct PromptRenderer {
    handlebars: Handlebars<'static>,
}

impl Default for PromptRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptRenderer {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        // Prompts are plain text; never HTML-escape bindings.
        handlebars.register_escape_fn(handlebars::no_escape);
        Self { handlebars }
    }

    /// Register a named template for later rendering.
    pub fn register(&mut self, name: &str, template: &str) -> Result<()> {
        self.handlebars
            .register_template_string(name, template)
            .map_err(|e| PipelineError::Template(format!("failed to register template {:?}: {}", name, e)))
    }

    /// Render a registered template with the given bindings.
    pub fn render<T: Serialize>(&self, name: &str, bindings: &T) -> Result<String> {
        self.handlebars
            .render(name, bindings)
            .map_err(|e| PipelineError::Template(format!("failed to render template {:?}: {}", name, e)))
    }

    /// Render a registered template and append a feedback section, used for
    /// repair requests carrying validation messages.
    pub fn render_with_feedback<T: Serialize>(&self, name: &str, bindings: &T, feedback: &str) -> Result<String> {
        let rendered = self.render(name, bindings)?;
        if feedback.is_empty() {
            return Ok(rendered);
        }
        Ok(format!(
            "{}\n\n---\n\n## Previous Attempt Feedback\n\n{}",
            rendered, feedback
        ))
    }

    /// Check if a named template is registered.
    pub fn has_template(&self, name: &str) -> bool {
        self.handlebars.get_template(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn renderer_with(name: &str, template: &str) -> PromptRenderer {
        let mut renderer = PromptRenderer::new();
        renderer.register(name, template).unwrap();
        renderer
    }

    #[test]
    fn test_render_simple() {
        let renderer = renderer_with("greeting", "Hello, {{name}}!");
        let mut bindings = HashMap::new();
        bindings.insert("name".to_string(), "World".to_string());

        let result = renderer.render("greeting", &bindings).unwrap();
        assert_eq!(result, "Hello, World!");
    }

    #[test]
    fn test_render_is_pure() {
        let renderer = renderer_with("cell", "Role: {{role}}, Phase: {{phase}}");
        let bindings = serde_json::json!({"role": "trader", "phase": "offer"});

        let first = renderer.render("cell", &bindings).unwrap();
        let second = renderer.render("cell", &bindings).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_render_missing_binding_is_empty() {
        let renderer = renderer_with("greeting", "Hello, {{name}}!");
        let bindings: HashMap<String, String> = HashMap::new();
        assert_eq!(renderer.render("greeting", &bindings).unwrap(), "Hello, !");
    }

    #[test]
    fn test_render_does_not_escape() {
        let renderer = renderer_with("raw", "Text: {{text}}");
        let bindings = serde_json::json!({"text": "a < b && c > d"});
        assert_eq!(renderer.render("raw", &bindings).unwrap(), "Text: a < b && c > d");
    }

    #[test]
    fn test_render_unknown_template_fails() {
        let renderer = PromptRenderer::new();
        let bindings: HashMap<String, String> = HashMap::new();
        let err = renderer.render("nope", &bindings).unwrap_err();
        assert!(matches!(err, PipelineError::Template(_)));
    }

    #[test]
    fn test_render_with_feedback_empty() {
        let renderer = renderer_with("cell", "base prompt");
        let bindings: HashMap<String, String> = HashMap::new();
        let result = renderer.render_with_feedback("cell", &bindings, "").unwrap();
        assert_eq!(result, "base prompt");
    }

    #[test]
    fn test_render_with_feedback_appends_section() {
        let renderer = renderer_with("cell", "base prompt");
        let bindings: HashMap<String, String> = HashMap::new();
        let result = renderer
            .render_with_feedback("cell", &bindings, "duplicate-task: \"Bid\" repeated")
            .unwrap();
        assert!(result.starts_with("base prompt"));
        assert!(result.contains("## Previous Attempt Feedback"));
        assert!(result.contains("duplicate-task"));
    }

    #[test]
    fn test_has_template() {
        let renderer = renderer_with("cell", "x");
        assert!(renderer.has_template("cell"));
        assert!(!renderer.has_template("other"));
    }
}
