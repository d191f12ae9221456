//! Script generation through the provider registry.

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument};

use crate::core::scene::{extract_scene_class, strip_code_fences};
use crate::core::types::Script;
use crate::provider::ProviderRegistry;
use crate::provider::prompt::PromptEngine;

/// Generate a pending script from a plain-language description.
///
/// Unlike debugging, generation has no heuristic fallback: without a usable
/// provider there is nothing sensible to return, so the error surfaces.
#[instrument(skip_all)]
pub fn generate_script(
    registry: &ProviderRegistry,
    engine: &PromptEngine,
    description: &str,
) -> Result<Script> {
    let backend = registry
        .active()
        .ok_or_else(|| anyhow!("no provider with credentials configured"))?;

    let prompt = engine.render_generate(description)?;
    let raw = backend
        .generate(&prompt)
        .with_context(|| format!("generate script via provider '{}'", backend.name()))?;
    let content = strip_code_fences(&raw);
    if content.is_empty() {
        return Err(anyhow!(
            "provider '{}' returned an empty script",
            backend.name()
        ));
    }

    let mut script = Script::from_text(content);
    script.scene_class = extract_scene_class(&script.content);
    info!(
        script_id = %script.id,
        scene = script.scene_class.as_deref().unwrap_or("<none>"),
        provider = backend.name(),
        "generated script"
    );
    Ok(script)
}
