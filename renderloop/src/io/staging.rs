//! Host-side staging and cleanup of per-attempt script files.
//!
//! Staged files are named `scene_<run-id>_<attempt>.py` so that every
//! command names exactly the file it expects, attempts of one run never
//! collide with another run's, and cleanup can purge by run identifier.
//! Staged files are exclusively owned by the attempt that created them.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::scene::strip_code_fences;
use crate::io::container::{ContainerRuntime, ContainerTarget};

/// A script staged on the host, ready to copy into the container.
#[derive(Debug, Clone)]
pub struct StagedScript {
    pub path: PathBuf,
    /// File stem; the render command derives the artifact directory from it.
    pub base_name: String,
    /// Destination path inside the container.
    pub container_path: String,
}

/// Stable file stem for one attempt of one run.
pub fn staged_base_name(run_id: &str, attempt: u32) -> String {
    format!("scene_{run_id}_{attempt}")
}

/// Write the script to the staging directory, stripping any fenced-code
/// wrappers that survived upstream cleanup.
pub fn stage_script(
    staging_dir: &Path,
    working_dir: &str,
    run_id: &str,
    attempt: u32,
    content: &str,
) -> Result<StagedScript> {
    let base_name = staged_base_name(run_id, attempt);
    let file_name = format!("{base_name}.py");
    let path = staging_dir.join(&file_name);

    fs::create_dir_all(staging_dir)
        .with_context(|| format!("create staging dir {}", staging_dir.display()))?;
    let cleaned = strip_code_fences(content);
    fs::write(&path, cleaned).with_context(|| format!("write staged script {}", path.display()))?;
    debug!(path = %path.display(), "staged script");

    Ok(StagedScript {
        path,
        base_name,
        container_path: format!("{working_dir}/{file_name}"),
    })
}

/// Remove one staged file. Idempotent: a missing file is a no-op, and
/// failures are logged, never returned, so cleanup cannot mask the
/// execution outcome.
pub fn remove_staged(path: &Path) {
    if !path.exists() {
        return;
    }
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed staged script"),
        Err(err) => warn!(path = %path.display(), err = %err, "failed to remove staged script"),
    }
}

/// Remove every staged file belonging to a run from the staging directory.
/// Best-effort and idempotent; continues past individual deletion failures.
pub fn sweep_host_staging(staging_dir: &Path, run_id: &str) {
    let prefix = format!("scene_{run_id}");
    let entries = match fs::read_dir(staging_dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(dir = %staging_dir.display(), err = %err, "staging dir not readable, nothing to sweep");
            return;
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(&prefix) && name.ends_with(".py") {
            remove_staged(&entry.path());
        }
    }
}

/// Best-effort purge of this run's staged scripts inside the container.
pub fn purge_container_temps<R: ContainerRuntime>(
    runtime: &R,
    target: &ContainerTarget,
    run_id: &str,
    timeout: Duration,
) {
    let pattern = format!("{}/scene_{run_id}*.py", target.working_dir);
    let argv = vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("rm -f {pattern}"),
    ];
    let result = runtime.run_command(target, &argv, None, timeout);
    if !result.succeeded {
        warn!(
            container = %target.name,
            pattern = %pattern,
            stderr = %result.stderr.trim(),
            "container temp purge failed"
        );
    }
}
