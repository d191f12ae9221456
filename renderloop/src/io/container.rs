//! Container runtime adapter over the docker CLI.
//!
//! The [`ContainerRuntime`] trait decouples the execution loop from the
//! actual container backend. Tests use scripted runtimes that return
//! predetermined results without spawning processes. No business logic
//! lives here: every operation shells out and reports a structured result.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::process::run_command_with_timeout;

/// Identifies the execution sandbox. Running state is never cached here;
/// [`ContainerRuntime::ensure_running`] re-checks on every use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerTarget {
    pub name: String,
    pub working_dir: String,
}

/// Structured result of a command executed inside the container.
///
/// All execution outcomes flow through this type, including failures to
/// reach the container at all: those carry `exit_code: None` and the start
/// error in `stderr`, so callers classify every failure uniformly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the command never ran (container unreachable or start
    /// failed).
    pub exit_code: Option<i32>,
    pub succeeded: bool,
}

impl CommandResult {
    /// Synthetic failed result for a container that could not be started.
    pub fn start_failure(message: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            exit_code: None,
            succeeded: false,
        }
    }

    pub fn combined_log(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Abstraction over the container backend.
pub trait ContainerRuntime {
    /// Whether the target is currently running. Absence is reported as
    /// `false` plus a diagnostic, never as an error: "not running" is an
    /// expected transient state the caller must handle.
    fn is_running(&self, target: &ContainerTarget) -> bool;

    /// Start the target if needed. Idempotent: a no-op success when the
    /// target is already running.
    fn ensure_running(&self, target: &ContainerTarget) -> Result<()>;

    /// Execute `argv` inside the target, ensuring it is running first. A
    /// start failure yields a synthetic failed [`CommandResult`] rather
    /// than an error.
    fn run_command(
        &self,
        target: &ContainerTarget,
        argv: &[String],
        workdir: Option<&str>,
        timeout: Duration,
    ) -> CommandResult;

    /// Best-effort host-to-container file copy. Failure logs and returns
    /// `false`, never raises.
    fn copy_in(&self, target: &ContainerTarget, host_path: &Path, container_path: &str) -> bool;

    /// Best-effort container-to-host file copy. Failure logs and returns
    /// `false`, never raises.
    fn copy_out(&self, target: &ContainerTarget, container_path: &str, host_path: &Path) -> bool;
}

/// Timeout for control-plane docker calls (inspect, start, cp).
const CONTROL_TIMEOUT: Duration = Duration::from_secs(60);

/// Container runtime backed by the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    /// Truncate captured command output beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl DockerCli {
    pub fn new(output_limit_bytes: usize) -> Self {
        Self { output_limit_bytes }
    }

    fn inspect_running(&self, name: &str) -> Result<bool> {
        let mut cmd = Command::new("docker");
        cmd.args(["container", "inspect", "-f", "{{.State.Running}}", name]);
        let output = run_command_with_timeout(cmd, CONTROL_TIMEOUT, self.output_limit_bytes)
            .context("docker container inspect")?;
        if !output.status.success() {
            return Err(anyhow!(
                "container '{name}' does not exist or is not accessible: {}",
                output.stderr_lossy().trim()
            ));
        }
        Ok(output.stdout_lossy().trim() == "true")
    }
}

impl ContainerRuntime for DockerCli {
    fn is_running(&self, target: &ContainerTarget) -> bool {
        match self.inspect_running(&target.name) {
            Ok(running) => running,
            Err(err) => {
                warn!(container = %target.name, err = %err, "container status check failed");
                false
            }
        }
    }

    #[instrument(skip_all, fields(container = %target.name))]
    fn ensure_running(&self, target: &ContainerTarget) -> Result<()> {
        if self.is_running(target) {
            debug!("container already running");
            return Ok(());
        }

        info!("starting container");
        let mut cmd = Command::new("docker");
        cmd.args(["start", &target.name]);
        let output = run_command_with_timeout(cmd, CONTROL_TIMEOUT, self.output_limit_bytes)
            .context("docker start")?;
        if !output.status.success() {
            return Err(anyhow!(
                "failed to start container '{}': {}",
                target.name,
                output.stderr_lossy().trim()
            ));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(container = %target.name, timeout_secs = timeout.as_secs()))]
    fn run_command(
        &self,
        target: &ContainerTarget,
        argv: &[String],
        workdir: Option<&str>,
        timeout: Duration,
    ) -> CommandResult {
        if let Err(err) = self.ensure_running(target) {
            warn!(err = %err, "container unavailable for command");
            return CommandResult::start_failure(format!("{err:#}"));
        }

        let mut cmd = Command::new("docker");
        cmd.arg("exec");
        if let Some(dir) = workdir {
            cmd.args(["-w", dir]);
        }
        cmd.arg(&target.name);
        cmd.args(argv);

        debug!(argv = ?argv, "executing command in container");
        let output = match run_command_with_timeout(cmd, timeout, self.output_limit_bytes) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %err, "docker exec could not be spawned");
                return CommandResult::start_failure(format!("docker exec failed: {err:#}"));
            }
        };

        let mut stderr = output.stderr_lossy();
        if output.timed_out {
            stderr.push_str(&format!(
                "\ncommand timed out after {}s\n",
                timeout.as_secs()
            ));
        }
        // A timed-out child dies by signal and has no exit code; report the
        // conventional 124 so the failure classifies as an execution failure,
        // not an unreachable container.
        let exit_code = if output.timed_out {
            Some(124)
        } else {
            output.status.code()
        };
        CommandResult {
            stdout: output.stdout_lossy(),
            stderr,
            exit_code,
            succeeded: output.status.success() && !output.timed_out,
        }
    }

    fn copy_in(&self, target: &ContainerTarget, host_path: &Path, container_path: &str) -> bool {
        let dest = format!("{}:{}", target.name, container_path);
        docker_cp(
            &host_path.display().to_string(),
            &dest,
            self.output_limit_bytes,
        )
    }

    fn copy_out(&self, target: &ContainerTarget, container_path: &str, host_path: &Path) -> bool {
        let src = format!("{}:{}", target.name, container_path);
        docker_cp(
            &src,
            &host_path.display().to_string(),
            self.output_limit_bytes,
        )
    }
}

fn docker_cp(src: &str, dest: &str, output_limit_bytes: usize) -> bool {
    let mut cmd = Command::new("docker");
    cmd.args(["cp", src, dest]);
    match run_command_with_timeout(cmd, CONTROL_TIMEOUT, output_limit_bytes) {
        Ok(output) if output.status.success() => true,
        Ok(output) => {
            warn!(
                src,
                dest,
                stderr = %output.stderr_lossy().trim(),
                "docker cp failed"
            );
            false
        }
        Err(err) => {
            warn!(src, dest, err = %err, "docker cp could not be spawned");
            false
        }
    }
}
