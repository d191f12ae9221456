//! Service configuration stored in `renderloop.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::container::ContainerTarget;

/// Service configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    pub container: ContainerConfig,

    /// Host directory that receives rendered artifacts and run records.
    pub media_root: PathBuf,

    /// Host directory for staged script files. Defaults to the system temp
    /// directory when unset.
    pub staging_dir: Option<PathBuf>,

    /// Default attempt budget for a run.
    pub max_attempts_default: u32,

    /// Total per-attempt wall-clock budget in seconds (staging + render +
    /// artifact retrieval).
    pub attempt_timeout_secs: u64,

    /// Timeout for a single AI provider request in seconds.
    pub provider_timeout_secs: u64,

    /// Truncate captured container stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    pub quality: QualityConfig,

    /// Text-generation providers, tried by ascending `priority`.
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContainerConfig {
    /// Name of the container that hosts the render environment.
    pub name: String,
    /// Working directory inside the container.
    pub working_dir: String,
    /// Python interpreter used to invoke the render module.
    pub python: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            name: "manim-runner".to_string(),
            working_dir: "/manim".to_string(),
            python: "python".to_string(),
        }
    }
}

/// Render quality selection. The tag must match the directory the render
/// command derives from the flag, because the artifact path check depends on
/// it exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QualityConfig {
    /// Flag passed to the render command (e.g. `-qm`).
    pub flag: String,
    /// Directory tag the render command writes under (e.g. `720p30`).
    pub tag: String,
    /// Artifact file extension.
    pub ext: String,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            flag: "-qm".to_string(),
            tag: "720p30".to_string(),
            ext: "mp4".to_string(),
        }
    }
}

/// Wire-format family of a provider backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-style chat completions endpoint.
    OpenaiChat,
    /// Gemini-style generateContent endpoint.
    Gemini,
}

/// One configured text-generation provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    pub model: String,
    /// Full endpoint URL. Required for `openai_chat`; optional override for
    /// `gemini`.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Inline credential. Prefer `api_key_env`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable holding the credential.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_priority() -> i32 {
    10
}

fn default_enabled() -> bool {
    true
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            container: ContainerConfig::default(),
            media_root: PathBuf::from("media"),
            staging_dir: None,
            max_attempts_default: 100,
            attempt_timeout_secs: 10 * 60,
            provider_timeout_secs: 120,
            output_limit_bytes: 200_000,
            quality: QualityConfig::default(),
            providers: Vec::new(),
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.container.name.trim().is_empty() {
            return Err(anyhow!("container.name must be non-empty"));
        }
        if self.container.working_dir.trim().is_empty() {
            return Err(anyhow!("container.working_dir must be non-empty"));
        }
        if self.max_attempts_default == 0 {
            return Err(anyhow!("max_attempts_default must be > 0"));
        }
        if self.attempt_timeout_secs == 0 {
            return Err(anyhow!("attempt_timeout_secs must be > 0"));
        }
        if self.provider_timeout_secs == 0 {
            return Err(anyhow!("provider_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        for field in [&self.quality.flag, &self.quality.tag, &self.quality.ext] {
            if field.trim().is_empty() {
                return Err(anyhow!("quality.flag, quality.tag, quality.ext must be non-empty"));
            }
        }
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(anyhow!("provider name must be non-empty"));
            }
            if provider.kind == ProviderKind::OpenaiChat && provider.endpoint.is_none() {
                return Err(anyhow!(
                    "provider '{}' is openai_chat and requires an endpoint",
                    provider.name
                ));
            }
        }
        Ok(())
    }

    pub fn target(&self) -> ContainerTarget {
        ContainerTarget {
            name: self.container.name.clone(),
            working_dir: self.container.working_dir.clone(),
        }
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RenderConfig::default()`.
pub fn load_config(path: &Path) -> Result<RenderConfig> {
    if !path.exists() {
        let cfg = RenderConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RenderConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RenderConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
