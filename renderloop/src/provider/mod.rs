//! Text-generation provider boundary.
//!
//! The [`TextGenerator`] trait is the single capability the rest of the
//! system sees: `prompt in, text out`. Backends are selected at registry
//! construction time; nothing downstream branches on backend identity.

pub mod http;
pub mod prompt;

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

use crate::io::config::{ProviderConfig, ProviderKind};
use crate::provider::http::{GeminiBackend, OpenAiChatBackend};

/// Opaque text-generation capability.
pub trait TextGenerator {
    /// Send a prompt, get the raw response text.
    fn generate(&self, prompt: &str) -> Result<String>;

    /// Display name for logs.
    fn name(&self) -> &str;
}

/// Ordered collection of usable providers.
///
/// Credential presence is resolved eagerly at construction: entries without
/// a usable key are skipped with a warning instead of failing at call time.
/// The remainder is ordered by ascending priority; the first entry is the
/// active provider.
pub struct ProviderRegistry {
    backends: Vec<Box<dyn TextGenerator + Send + Sync>>,
}

impl ProviderRegistry {
    /// Build a registry from configuration.
    pub fn from_config(configs: &[ProviderConfig], timeout: Duration) -> Self {
        let mut ordered: Vec<&ProviderConfig> =
            configs.iter().filter(|cfg| cfg.enabled).collect();
        ordered.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));

        let mut backends: Vec<Box<dyn TextGenerator + Send + Sync>> = Vec::new();
        for cfg in ordered {
            let Some(api_key) = resolve_credential(cfg) else {
                warn!(provider = %cfg.name, "skipping provider without credentials");
                continue;
            };
            let backend: Box<dyn TextGenerator + Send + Sync> = match cfg.kind {
                ProviderKind::OpenaiChat => {
                    // Validated at config load: openai_chat always has an endpoint.
                    let Some(endpoint) = cfg.endpoint.clone() else {
                        warn!(provider = %cfg.name, "skipping openai_chat provider without endpoint");
                        continue;
                    };
                    Box::new(OpenAiChatBackend::new(
                        cfg.name.clone(),
                        endpoint,
                        cfg.model.clone(),
                        api_key,
                        timeout,
                    ))
                }
                ProviderKind::Gemini => Box::new(GeminiBackend::new(
                    cfg.name.clone(),
                    cfg.endpoint.clone(),
                    cfg.model.clone(),
                    api_key,
                    timeout,
                )),
            };
            debug!(provider = %backend.name(), "registered provider");
            backends.push(backend);
        }

        Self { backends }
    }

    /// Build a registry directly from backends (tests, embedding callers).
    pub fn from_backends(backends: Vec<Box<dyn TextGenerator + Send + Sync>>) -> Self {
        Self { backends }
    }

    /// The provider that will serve requests: first by ascending priority
    /// among those with valid credentials.
    pub fn active(&self) -> Option<&(dyn TextGenerator + Send + Sync)> {
        self.backends.first().map(Box::as_ref)
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }
}

fn resolve_credential(cfg: &ProviderConfig) -> Option<String> {
    if let Some(key) = &cfg.api_key
        && !key.trim().is_empty()
    {
        return Some(key.clone());
    }
    if let Some(var) = &cfg.api_key_env {
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => return Some(key),
            _ => return None,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(name: &str, priority: i32, api_key: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            kind: ProviderKind::Gemini,
            model: "gemini-2.5-flash".to_string(),
            endpoint: None,
            api_key: api_key.map(str::to_string),
            api_key_env: None,
            priority,
            enabled: true,
        }
    }

    #[test]
    fn registry_orders_by_priority() {
        let configs = vec![
            provider("fallback", 20, Some("k2")),
            provider("primary", 1, Some("k1")),
        ];
        let registry = ProviderRegistry::from_config(&configs, Duration::from_secs(5));
        assert_eq!(registry.names(), vec!["primary", "fallback"]);
        assert_eq!(registry.active().map(|b| b.name()), Some("primary"));
    }

    #[test]
    fn registry_skips_missing_credentials() {
        let configs = vec![
            provider("no-key", 1, None),
            provider("with-key", 5, Some("k")),
        ];
        let registry = ProviderRegistry::from_config(&configs, Duration::from_secs(5));
        assert_eq!(registry.names(), vec!["with-key"]);
    }

    #[test]
    fn registry_skips_disabled_providers() {
        let mut disabled = provider("off", 1, Some("k"));
        disabled.enabled = false;
        let registry =
            ProviderRegistry::from_config(&[disabled], Duration::from_secs(5));
        assert!(registry.is_empty());
        assert!(registry.active().is_none());
    }
}
