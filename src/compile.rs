//! Two-pass compile: outer render, YAML parse, loop expansion, serialize
//!
//! 1. OUTER render of the raw template text with the global values; loop
//!    variables are not known yet and survive verbatim, statement blocks run
//!    here
//! 2. YAML parse
//! 3. Loop expansion with strict rendering of every task
//! 4. YAML serialize

use serde_yaml::Value;
use tracing::debug;

use crate::error::{Result, TektoncError};
use crate::expand::{Expander, TaskNaming};
use crate::scope::{kind_of, Scope};
use crate::template::{RenderMode, TemplateRenderer, RENDERER};

/// Template compiler
pub struct Compiler<'r> {
    renderer: &'r TemplateRenderer,
    naming: TaskNaming,
}

impl Default for Compiler<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler<'static> {
    pub fn new() -> Self {
        Self {
            renderer: &RENDERER,
            naming: TaskNaming::default(),
        }
    }
}

impl<'r> Compiler<'r> {
    pub fn with_naming(mut self, naming: TaskNaming) -> Self {
        self.naming = naming;
        self
    }

    /// Outer pass over the raw template text
    pub fn render_outer(&self, template_src: &str, globals: &Scope) -> Result<String> {
        Ok(self
            .renderer
            .render(template_src, globals, RenderMode::PreserveUnknown)?
            .into_owned())
    }

    /// Render, parse and expand into a pipeline document
    pub fn compile(&self, template_src: &str, globals: &Scope) -> Result<Value> {
        let rendered = self.render_outer(template_src, globals)?;
        debug!(bytes = rendered.len(), "outer render complete");

        let doc: Value = serde_yaml::from_str(&rendered)?;
        if !doc.is_mapping() {
            return Err(TektoncError::NotAMapping {
                found: kind_of(&doc).to_string(),
            });
        }

        Expander::with_renderer(self.renderer)
            .with_naming(self.naming)
            .expand_document(&doc, globals)
    }

    /// Compile and serialize to YAML text
    pub fn compile_to_string(&self, template_src: &str, globals: &Scope) -> Result<String> {
        let expanded = self.compile(template_src, globals)?;
        Ok(serde_yaml::to_string(&expanded)?)
    }
}

/// Compile with the default settings
pub fn compile(template_src: &str, globals: &Scope) -> Result<Value> {
    Compiler::new().compile(template_src, globals)
}
