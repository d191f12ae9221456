//! Missing-dependency remediation inside the container.
//!
//! Validation happens before anything reaches the runtime adapter: an
//! unsafe name fails closed and is never part of an install command.

use std::fmt;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::core::modules::{extract_missing_modules, is_safe_module_name};
use crate::io::config::RenderConfig;
use crate::io::container::ContainerRuntime;

/// Why a single install did not happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallError {
    /// Name failed the safety check and never reached the runtime adapter.
    UnsafeName { name: String },
    /// Install command ran and exited non-zero (or never started).
    CommandFailed { name: String, stderr: String },
}

impl fmt::Display for InstallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsafeName { name } => write!(f, "unsafe module name '{name}'"),
            Self::CommandFailed { name, stderr } => {
                write!(f, "install of '{name}' failed: {}", stderr.trim())
            }
        }
    }
}

impl std::error::Error for InstallError {}

/// Outcome of a detect-and-install pass. Partial success is success at this
/// layer; the loop above decides whether it warrants a retry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub installed: Vec<String>,
    pub failed: Vec<(String, InstallError)>,
}

impl InstallReport {
    pub fn any_installed(&self) -> bool {
        !self.installed.is_empty()
    }
}

/// Install one module in the container. Validates first; success iff the
/// install command exits zero.
pub fn install_dependency<R: ContainerRuntime>(
    runtime: &R,
    cfg: &RenderConfig,
    name: &str,
    timeout: Duration,
) -> Result<(), InstallError> {
    if !is_safe_module_name(name) {
        return Err(InstallError::UnsafeName {
            name: name.to_string(),
        });
    }

    let argv = vec!["pip".to_string(), "install".to_string(), name.to_string()];
    let result = runtime.run_command(&cfg.target(), &argv, None, timeout);
    if result.succeeded {
        info!(module = name, "installed missing dependency");
        Ok(())
    } else {
        Err(InstallError::CommandFailed {
            name: name.to_string(),
            stderr: result.stderr,
        })
    }
}

/// Scan error text for missing modules and install each one, continuing
/// through individual failures.
#[instrument(skip_all)]
pub fn detect_and_install<R: ContainerRuntime>(
    runtime: &R,
    cfg: &RenderConfig,
    error_text: &str,
    timeout: Duration,
) -> InstallReport {
    let mut report = InstallReport::default();
    let modules = extract_missing_modules(error_text);
    if modules.is_empty() {
        return report;
    }

    info!(modules = ?modules, "detected missing modules");
    for module in modules {
        match install_dependency(runtime, cfg, &module, timeout) {
            Ok(()) => report.installed.push(module),
            Err(err) => {
                warn!(module = %module, err = %err, "dependency install failed");
                report.failed.push((module, err));
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::container::CommandResult;
    use crate::test_support::ScriptedRuntime;

    fn ok_result() -> CommandResult {
        CommandResult {
            stdout: "installed".to_string(),
            stderr: String::new(),
            exit_code: Some(0),
            succeeded: true,
        }
    }

    fn failed_result(stderr: &str) -> CommandResult {
        CommandResult {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code: Some(1),
            succeeded: false,
        }
    }

    #[test]
    fn install_runs_pip_with_module_argv() {
        let runtime = ScriptedRuntime::new(vec![ok_result()]);
        let cfg = RenderConfig::default();

        install_dependency(&runtime, &cfg, "numpy", Duration::from_secs(5)).expect("install");

        let commands = runtime.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0], vec!["pip", "install", "numpy"]);
    }

    /// Unsafe names fail closed: nothing reaches the runtime adapter.
    #[test]
    fn install_rejects_unsafe_name_before_any_command() {
        let runtime = ScriptedRuntime::new(Vec::new());
        let cfg = RenderConfig::default();

        let err = install_dependency(&runtime, &cfg, "requests; rm -rf /", Duration::from_secs(5))
            .expect_err("unsafe");
        assert!(matches!(err, InstallError::UnsafeName { .. }));
        assert!(runtime.commands().is_empty());
    }

    #[test]
    fn detect_and_install_continues_past_failures() {
        let runtime = ScriptedRuntime::new(vec![failed_result("no matching distribution"), ok_result()]);
        let cfg = RenderConfig::default();

        let report = detect_and_install(
            &runtime,
            &cfg,
            "No module named 'pandas'\nNo module named 'numpy'",
            Duration::from_secs(5),
        );

        assert_eq!(report.installed, vec!["numpy"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "pandas");
        assert!(report.any_installed());
    }

    #[test]
    fn detect_and_install_is_empty_for_unrelated_errors() {
        let runtime = ScriptedRuntime::new(Vec::new());
        let cfg = RenderConfig::default();

        let report = detect_and_install(
            &runtime,
            &cfg,
            "NameError: name 'circle' is not defined",
            Duration::from_secs(5),
        );
        assert!(!report.any_installed());
        assert!(runtime.commands().is_empty());
    }
}
