//! AI-assisted script repair with a rule-based fallback.
//!
//! The debug client never fails: when the provider call errors (no
//! credentials, network, quota), it degrades to a small table of textual
//! heuristics and, failing that, returns the script unchanged. An unchanged
//! script is a valid outcome — the loop still advances and retries, since
//! the prior failure may have been environmental.

use tracing::{debug, instrument, warn};

use crate::core::modules::is_safe_module_name;
use crate::core::scene::strip_code_fences;
use crate::provider::ProviderRegistry;
use crate::provider::prompt::PromptEngine;

/// How the returned script was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixSource {
    Provider,
    Heuristic,
}

/// Result of one debug pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugOutcome {
    pub script: String,
    pub changed: bool,
    pub via: FixSource,
}

/// Client that turns (script, error) into a candidate replacement script.
pub struct DebugClient<'a> {
    registry: &'a ProviderRegistry,
    engine: PromptEngine,
}

impl<'a> DebugClient<'a> {
    pub fn new(registry: &'a ProviderRegistry) -> Self {
        Self {
            registry,
            engine: PromptEngine::new(),
        }
    }

    /// Produce a candidate replacement for a failing script.
    #[instrument(skip_all)]
    pub fn debug(&self, script: &str, error_text: &str) -> DebugOutcome {
        match self.try_provider(script, error_text) {
            Ok(fixed) => {
                let changed = fixed != script;
                debug!(changed, "provider returned candidate script");
                DebugOutcome {
                    script: fixed,
                    changed,
                    via: FixSource::Provider,
                }
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "provider debugging failed, using basic correction");
                let fixed = basic_correction(script, error_text);
                let changed = fixed != script;
                DebugOutcome {
                    script: fixed,
                    changed,
                    via: FixSource::Heuristic,
                }
            }
        }
    }

    fn try_provider(&self, script: &str, error_text: &str) -> anyhow::Result<String> {
        let backend = self
            .registry
            .active()
            .ok_or_else(|| anyhow::anyhow!("no provider with credentials configured"))?;
        let prompt = self.engine.render_debug(script, error_text)?;
        let raw = backend.generate(&prompt)?;
        Ok(strip_code_fences(&raw))
    }
}

/// Purely textual fixes for common failure signatures. No semantic
/// understanding; returns the original script when no heuristic matches.
fn basic_correction(script: &str, error_text: &str) -> String {
    // Render binary missing from the environment: not a script defect.
    if error_text.contains("'manim' is not recognized") {
        return script.to_string();
    }

    if let Some(rest) = error_text.split("No module named").nth(1) {
        let module = rest
            .trim()
            .trim_start_matches(['\'', '"'])
            .split(['\'', '"', '\n', ' '])
            .next()
            .unwrap_or("");
        if !module.is_empty() && is_safe_module_name(module) {
            return format!("import {module}\n\n{script}");
        }
    }

    script.to_string()
}
