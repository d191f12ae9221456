//! Prompt templates for provider calls.

use anyhow::Result;
use minijinja::{Environment, context};

const DEBUG_TEMPLATE: &str = include_str!("prompts/debug.md");
const GENERATE_TEMPLATE: &str = include_str!("prompts/generate.md");

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("debug", DEBUG_TEMPLATE)
            .expect("debug template should be valid");
        env.add_template("generate", GENERATE_TEMPLATE)
            .expect("generate template should be valid");
        Self { env }
    }

    /// Render the remediation prompt embedding the error and the full script.
    pub fn render_debug(&self, script: &str, error: &str) -> Result<String> {
        let template = self.env.get_template("debug")?;
        let rendered = template.render(context! {
            error => error.trim(),
            script => script,
        })?;
        Ok(rendered)
    }

    /// Render the generation prompt for a plain-language description.
    pub fn render_generate(&self, description: &str) -> Result<String> {
        let template = self.env.get_template("generate")?;
        let rendered = template.render(context! {
            description => description.trim(),
        })?;
        Ok(rendered)
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}
