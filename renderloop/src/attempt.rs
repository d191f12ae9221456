//! One staged execution attempt inside the container.
//!
//! Stages the script on the host, copies it in, invokes the render command,
//! and retrieves the artifact. Success requires both a zero exit code and
//! the artifact landing at its deterministic path — the runtime is not
//! fully deterministic about partial writes, so a clean exit alone is not
//! trusted.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::budget::remaining_budget;
use crate::core::scene::extract_scene_class;
use crate::core::types::FailureKind;
use crate::io::config::RenderConfig;
use crate::io::container::{CommandResult, ContainerRuntime};
use crate::io::staging::{StagedScript, remove_staged, stage_script};

/// Parameters for a single attempt.
#[derive(Debug, Clone)]
pub struct AttemptRequest<'a> {
    pub run_id: &'a str,
    pub attempt_number: u32,
    pub script: &'a str,
    /// Wall-clock deadline shared by every command in this attempt.
    pub deadline: Instant,
}

/// Outcome of one attempt, before the loop records it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    Success {
        /// Artifact location relative to the media root.
        output_rel: String,
        /// Host path the artifact was copied to.
        output_path: PathBuf,
        log: String,
    },
    Failure {
        kind: FailureKind,
        error: String,
        log: String,
    },
}

/// Execute one attempt. Returns `Err` only for faults outside the normal
/// classification (staging I/O, expired budget); the caller folds those
/// into the attempt as `ExecutionFailed`.
#[instrument(skip_all, fields(run_id = %request.run_id, attempt = request.attempt_number))]
pub fn run_attempt<R: ContainerRuntime>(
    runtime: &R,
    cfg: &RenderConfig,
    request: &AttemptRequest<'_>,
) -> Result<AttemptResult> {
    // Staging failures are classification, not errors: a script with no
    // scene declaration goes straight to remediation without dispatching
    // any command.
    let Some(scene_class) = extract_scene_class(request.script) else {
        debug!("no scene declaration found");
        return Ok(AttemptResult::Failure {
            kind: FailureKind::NoEntryPoint,
            error: "no scene class declaration found in script".to_string(),
            log: String::new(),
        });
    };

    let staged = stage_script(
        &cfg.staging_dir(),
        &cfg.container.working_dir,
        request.run_id,
        request.attempt_number,
        request.script,
    )?;

    let result = dispatch(runtime, cfg, request, &staged, &scene_class);
    // The staged file is owned by this attempt alone; release it on every
    // exit path. The loop's run-scoped sweep backstops this.
    remove_staged(&staged.path);
    result
}

fn dispatch<R: ContainerRuntime>(
    runtime: &R,
    cfg: &RenderConfig,
    request: &AttemptRequest<'_>,
    staged: &StagedScript,
    scene_class: &str,
) -> Result<AttemptResult> {
    let target = cfg.target();

    if !runtime.copy_in(&target, &staged.path, &staged.container_path) {
        return Ok(AttemptResult::Failure {
            kind: FailureKind::RuntimeUnavailable,
            error: format!(
                "failed to copy script into container '{}' at {}",
                target.name, staged.container_path
            ),
            log: String::new(),
        });
    }

    let timeout = remaining_budget(request.deadline)?;
    let file_name = format!("{}.py", staged.base_name);
    let argv = vec![
        cfg.container.python.clone(),
        "-m".to_string(),
        "manim".to_string(),
        file_name,
        scene_class.to_string(),
        cfg.quality.flag.clone(),
    ];
    info!(scene = scene_class, "invoking render command");
    let result = runtime.run_command(&target, &argv, Some(&target.working_dir), timeout);
    let log = result.combined_log();

    // Load-bearing path convention: the render command writes its artifact
    // to videos/<base>/<quality>/<Scene>.<ext> under the working directory.
    let output_rel = format!(
        "videos/{}/{}/{}.{}",
        staged.base_name, cfg.quality.tag, scene_class, cfg.quality.ext
    );

    if !result.succeeded {
        return Ok(AttemptResult::Failure {
            kind: classify_command_failure(&result),
            error: command_error_text(&result),
            log,
        });
    }

    let host_path = cfg.media_root.join(&output_rel);
    if let Some(parent) = host_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create artifact dir {}", parent.display()))?;
    }
    let container_artifact = format!("{}/{}", target.working_dir, output_rel);
    let copied = runtime.copy_out(&target, &container_artifact, &host_path);

    if copied && host_path.exists() {
        info!(artifact = %host_path.display(), "render succeeded");
        return Ok(AttemptResult::Success {
            output_rel,
            output_path: host_path,
            log,
        });
    }

    warn!(artifact = %container_artifact, "render exited cleanly but artifact is missing");
    Ok(AttemptResult::Failure {
        kind: FailureKind::ExecutionFailed,
        error: format!("no output artifact produced at {output_rel}"),
        log,
    })
}

fn classify_command_failure(result: &CommandResult) -> FailureKind {
    // A synthetic result (container unreachable or never started) carries no
    // exit code.
    if result.exit_code.is_none() {
        FailureKind::RuntimeUnavailable
    } else {
        FailureKind::ExecutionFailed
    }
}

fn command_error_text(result: &CommandResult) -> String {
    let stderr = result.stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    match result.exit_code {
        Some(code) => format!("render command exited with status {code}"),
        None => "container runtime unavailable".to_string(),
    }
}
