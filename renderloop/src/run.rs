//! The bounded execution-retry loop.
//!
//! Drives staged attempts against the container, classifies failures, and
//! applies remediation between attempts: deterministic dependency installs
//! are always tried before the costlier AI rewrite, every iteration, because
//! a regenerated script can reintroduce the same missing import. Every exit
//! path cleans up staged resources.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::attempt::{AttemptRequest, AttemptResult, run_attempt};
use crate::core::types::{
    AttemptOutcome, ExecutionAttempt, ExecutionRun, FailureKind, InvalidInputError, RunOutcome,
    RunResult, Script, ScriptInput, ScriptStatus,
};
use crate::debug::DebugClient;
use crate::deps::detect_and_install;
use crate::io::config::RenderConfig;
use crate::io::container::ContainerRuntime;
use crate::io::staging::{purge_container_temps, sweep_host_staging};
use crate::sink::{RecordSink, ScriptStore, notify_attempt, notify_completed};

/// Timeout for best-effort cleanup commands in the container.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Cooperative cancellation signal, observed at iteration boundaries.
///
/// Cancellation never interrupts an in-flight command; it prevents the next
/// iteration from starting, and cleanup still runs.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-call knobs for `execute`.
#[derive(Debug, Clone)]
pub struct ExecuteParams {
    pub max_attempts: u32,
    pub cancel: CancelToken,
}

impl ExecuteParams {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            cancel: CancelToken::new(),
        }
    }
}

/// Collaborators the loop drives. All failures inside them surface as data;
/// none may abort the loop.
pub struct ExecuteEnv<'a, R: ContainerRuntime> {
    pub runtime: &'a R,
    pub debugger: &'a DebugClient<'a>,
    pub store: &'a dyn ScriptStore,
    pub sink: &'a dyn RecordSink,
}

/// Run the retry loop for one script.
///
/// Returns `Err` only for malformed input (checked before any attempt is
/// recorded); once the loop starts, the caller always receives a
/// [`RunResult`] carrying the best-known script text, the terminal error,
/// and the full attempt history.
#[instrument(skip_all, fields(max_attempts = params.max_attempts))]
pub fn execute<R: ContainerRuntime>(
    env: &ExecuteEnv<'_, R>,
    cfg: &RenderConfig,
    input: ScriptInput,
    params: &ExecuteParams,
) -> Result<RunResult> {
    let script = resolve_input(input, env.store)?;
    let mut run = ExecutionRun::new(script);
    info!(run_id = %run.run_id, script_id = %run.script.id, "starting execution run");
    run.script.status = ScriptStatus::Executing;

    let mut current_script = run.script.content.clone();
    let mut success_path = None;

    while run.attempts_used() < params.max_attempts {
        if params.cancel.is_cancelled() {
            info!(run_id = %run.run_id, "cancellation observed, stopping before next attempt");
            run.outcome = Some(RunOutcome::Cancelled);
            break;
        }

        let attempt_number = run.next_attempt_number();
        debug!(attempt = attempt_number, "starting attempt");
        run.script.scene_class = crate::core::scene::extract_scene_class(&current_script);

        let started_at = Utc::now();
        let deadline = Instant::now() + cfg.attempt_timeout();
        let request = AttemptRequest {
            run_id: &run.run_id,
            attempt_number,
            script: &current_script,
            deadline,
        };

        // Fault barrier: an unexpected error inside the attempt is recorded
        // as that attempt's failure and retried like any other, instead of
        // unwinding the run.
        let result = match run_attempt(env.runtime, cfg, &request) {
            Ok(result) => result,
            Err(err) => {
                warn!(attempt = attempt_number, err = %format!("{err:#}"), "attempt failed outside normal classification");
                AttemptResult::Failure {
                    kind: FailureKind::ExecutionFailed,
                    error: format!("{err:#}"),
                    log: String::new(),
                }
            }
        };

        let (outcome, log, failure) = match result {
            AttemptResult::Success {
                output_rel,
                output_path,
                log,
            } => {
                success_path = Some(output_path);
                (AttemptOutcome::Success { output_rel }, log, None)
            }
            AttemptResult::Failure { kind, error, log } => (
                AttemptOutcome::Failure {
                    kind,
                    error: error.clone(),
                },
                log,
                Some(error),
            ),
        };

        run.record(ExecutionAttempt {
            attempt_number,
            script_snapshot: current_script.clone(),
            outcome,
            log,
            started_at,
            completed_at: Utc::now(),
        });
        if let Some(recorded) = run.attempts.last() {
            notify_attempt(env.sink, &run, recorded);
        }
        cleanup(env.runtime, cfg, &run.run_id);

        let Some(error) = failure else {
            info!(run_id = %run.run_id, attempt = attempt_number, "run succeeded");
            run.outcome = Some(RunOutcome::Succeeded);
            break;
        };
        warn!(attempt = attempt_number, error = %error, "attempt failed");

        if run.attempts_used() >= params.max_attempts {
            break;
        }

        // Cheap deterministic remediation first: if anything installed,
        // retry the same script without spending an AI call.
        let report = detect_and_install(env.runtime, cfg, &error, cfg.attempt_timeout());
        if report.any_installed() {
            info!(installed = ?report.installed, "installed missing dependencies, retrying unchanged script");
            continue;
        }

        run.script.status = ScriptStatus::Debugging;
        let fix = env.debugger.debug(&current_script, &error);
        if fix.changed {
            info!(via = ?fix.via, "debugger produced a modified script");
        } else {
            debug!(via = ?fix.via, "debugger left script unchanged, retrying anyway");
        }
        current_script = fix.script;
        run.script.status = ScriptStatus::Executing;
    }

    // Cleanup runs once more at loop exit; both calls are idempotent.
    cleanup(env.runtime, cfg, &run.run_id);
    finalize(env, run, current_script, success_path)
}

fn finalize<R: ContainerRuntime>(
    env: &ExecuteEnv<'_, R>,
    mut run: ExecutionRun,
    current_script: String,
    success_path: Option<std::path::PathBuf>,
) -> Result<RunResult> {
    let outcome = run.outcome.unwrap_or(RunOutcome::Exhausted);
    run.outcome = Some(outcome);
    // The run record keeps the best-known script text, even if it never
    // executed successfully.
    run.script.content = current_script;

    let (success, error) = match outcome {
        RunOutcome::Succeeded => {
            run.script.status = ScriptStatus::Successful;
            (true, None)
        }
        RunOutcome::Exhausted => {
            run.script.status = ScriptStatus::Failed;
            let error = run
                .last_error()
                .map(str::to_string)
                .unwrap_or_else(|| "no attempts were made".to_string());
            (false, Some(error))
        }
        RunOutcome::Cancelled => {
            run.script.status = ScriptStatus::Failed;
            let error = format!(
                "execution cancelled after {} attempt(s)",
                run.attempts_used()
            );
            (false, Some(error))
        }
    };

    notify_completed(env.sink, &run);
    let attempts_used = run.attempts_used();
    Ok(RunResult {
        success,
        output_path: success_path,
        error,
        attempts_used,
        run,
    })
}

fn resolve_input(input: ScriptInput, store: &dyn ScriptStore) -> Result<Script> {
    match input {
        ScriptInput::Text(content) => Ok(Script::from_text(content)),
        ScriptInput::Payload { content, id } => Ok(match id {
            Some(id) => Script::with_id(id, content),
            None => Script::from_text(content),
        }),
        ScriptInput::Handle(id) => {
            let script = store
                .fetch(&id)?
                .ok_or_else(|| InvalidInputError::unknown_handle(&id))?;
            Ok(script)
        }
    }
}

fn cleanup<R: ContainerRuntime>(runtime: &R, cfg: &RenderConfig, run_id: &str) {
    sweep_host_staging(&cfg.staging_dir(), run_id);
    purge_container_temps(runtime, &cfg.target(), run_id, CLEANUP_TIMEOUT);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::container::CommandResult;
    use crate::provider::ProviderRegistry;
    use crate::test_support::{
        MemoryStore, RecordingSink, ScriptedGenerator, ScriptedRuntime, scripted_registry,
    };

    // No trailing newline: debug output passes through fence stripping,
    // which trims, and the unchanged-script assertions compare exact text.
    const SCRIPT: &str = "from manim import *\n\nclass Square(Scene):\n    def construct(self):\n        pass";

    fn test_config(temp: &tempfile::TempDir) -> RenderConfig {
        RenderConfig {
            media_root: temp.path().join("media"),
            staging_dir: Some(temp.path().join("staging")),
            ..RenderConfig::default()
        }
    }

    fn ok_result() -> CommandResult {
        CommandResult {
            stdout: "rendered".to_string(),
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

    fn no_provider() -> ProviderRegistry {
        ProviderRegistry::from_backends(Vec::new())
    }

    /// Valid entry point, first execution exits 0 with the
    /// artifact present.
    #[test]
    fn first_attempt_success_stops_the_loop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = test_config(&temp);
        let runtime = ScriptedRuntime::new(vec![ok_result()]).with_artifact(b"video");
        let registry = no_provider();
        let debugger = DebugClient::new(&registry);
        let sink = RecordingSink::new();
        let env = ExecuteEnv {
            runtime: &runtime,
            debugger: &debugger,
            store: &crate::sink::NoScriptStore,
            sink: &sink,
        };

        let result = execute(
            &env,
            &cfg,
            ScriptInput::Text(SCRIPT.to_string()),
            &ExecuteParams::new(5),
        )
        .expect("execute");

        assert!(result.success);
        assert_eq!(result.attempts_used, 1);
        assert!(result.error.is_none());
        assert!(result.output_path.as_ref().is_some_and(|p| p.exists()));
        assert_eq!(result.run.outcome, Some(RunOutcome::Succeeded));
        assert_eq!(result.run.script.status, ScriptStatus::Successful);
        assert!(result.run.error_history.is_empty());
        // No further attempt was recorded after the success.
        assert_eq!(result.run.attempts.len(), 1);
        assert_eq!(sink.completed_count(), 1);
    }

    /// Every attempt fails with a non-dependency error:
    /// the budget is exhausted exactly, and the terminal error is the last
    /// attempt's.
    #[test]
    fn exhaustion_reports_last_error_and_full_history() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = test_config(&temp);
        let runtime = ScriptedRuntime::new(vec![
            failed_result("error one"),
            failed_result("error two"),
            failed_result("error three"),
        ]);
        // Debugger always "fixes" via provider with the same text.
        let registry = scripted_registry(ScriptedGenerator::always(SCRIPT));
        let debugger = DebugClient::new(&registry);
        let sink = RecordingSink::new();
        let env = ExecuteEnv {
            runtime: &runtime,
            debugger: &debugger,
            store: &crate::sink::NoScriptStore,
            sink: &sink,
        };

        let result = execute(
            &env,
            &cfg,
            ScriptInput::Text(SCRIPT.to_string()),
            &ExecuteParams::new(3),
        )
        .expect("execute");

        assert!(!result.success);
        assert_eq!(result.attempts_used, 3);
        assert_eq!(result.error.as_deref(), Some("error three"));
        assert_eq!(result.run.outcome, Some(RunOutcome::Exhausted));
        assert_eq!(
            result.run.error_history,
            vec!["error one", "error two", "error three"]
        );
        // Attempt numbers are gap-free.
        let numbers: Vec<u32> = result.run.attempts.iter().map(|a| a.attempt_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(sink.attempt_count(), 3);
        assert_eq!(sink.completed_count(), 1);
    }

    /// A missing-module failure whose install succeeds
    /// retries with the identical script and no AI call.
    #[test]
    fn dependency_fix_retries_same_script_before_ai() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = test_config(&temp);
        // Call order: failing render, pip install, successful render.
        let runtime = ScriptedRuntime::new(vec![
            failed_result("ModuleNotFoundError: No module named 'requests'"),
            ok_result(),
            ok_result(),
        ])
        .with_artifact(b"video");
        // A provider that would rewrite the script if it were consulted.
        let registry = scripted_registry(ScriptedGenerator::always("class Wrong(Scene): pass"));
        let debugger = DebugClient::new(&registry);
        let sink = RecordingSink::new();
        let env = ExecuteEnv {
            runtime: &runtime,
            debugger: &debugger,
            store: &crate::sink::NoScriptStore,
            sink: &sink,
        };

        let result = execute(
            &env,
            &cfg,
            ScriptInput::Text(SCRIPT.to_string()),
            &ExecuteParams::new(5),
        )
        .expect("execute");

        assert!(result.success);
        assert_eq!(result.attempts_used, 2);
        // The retried script is byte-identical to the failed one.
        assert_eq!(
            result.run.attempts[0].script_snapshot,
            result.run.attempts[1].script_snapshot
        );
        assert_eq!(result.run.error_history.len(), 1);
        // The install command ran between the two render commands.
        let installs = runtime.install_commands();
        assert_eq!(installs, vec![vec!["pip", "install", "requests"]]);
    }

    #[test]
    fn debugger_output_replaces_script_even_when_unchanged() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = test_config(&temp);
        let runtime = ScriptedRuntime::new(vec![
            failed_result("NameError: name 'circle' is not defined"),
            failed_result("NameError: name 'circle' is not defined"),
        ]);
        let registry = scripted_registry(ScriptedGenerator::always(SCRIPT));
        let debugger = DebugClient::new(&registry);
        let sink = RecordingSink::new();
        let env = ExecuteEnv {
            runtime: &runtime,
            debugger: &debugger,
            store: &crate::sink::NoScriptStore,
            sink: &sink,
        };

        let result = execute(
            &env,
            &cfg,
            ScriptInput::Text(SCRIPT.to_string()),
            &ExecuteParams::new(2),
        )
        .expect("execute");

        assert!(!result.success);
        assert_eq!(result.attempts_used, 2);
        // The unchanged debug output still advanced the loop.
        assert_eq!(result.run.attempts[1].script_snapshot, SCRIPT);
    }

    /// A script with no scene declaration is retryable: the AI debugger gets
    /// a chance to supply one, and no container command is dispatched for
    /// the failing attempt.
    #[test]
    fn no_entry_point_goes_to_debugger_without_dispatch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = test_config(&temp);
        let runtime = ScriptedRuntime::new(vec![ok_result()]).with_artifact(b"v");
        let registry = scripted_registry(ScriptedGenerator::always(SCRIPT));
        let debugger = DebugClient::new(&registry);
        let sink = RecordingSink::new();
        let env = ExecuteEnv {
            runtime: &runtime,
            debugger: &debugger,
            store: &crate::sink::NoScriptStore,
            sink: &sink,
        };

        let result = execute(
            &env,
            &cfg,
            ScriptInput::Text("print('no scene here')\n".to_string()),
            &ExecuteParams::new(3),
        )
        .expect("execute");

        assert!(result.success);
        assert_eq!(result.attempts_used, 2);
        let first = &result.run.attempts[0];
        assert!(matches!(
            first.outcome,
            AttemptOutcome::Failure {
                kind: FailureKind::NoEntryPoint,
                ..
            }
        ));
        // Only the second attempt's render reached the container.
        assert_eq!(runtime.render_commands().len(), 1);
    }

    /// Malformed input fails before any attempt is recorded.
    #[test]
    fn invalid_input_fails_before_any_attempt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = test_config(&temp);
        let runtime = ScriptedRuntime::new(Vec::new());
        let registry = no_provider();
        let debugger = DebugClient::new(&registry);
        let sink = RecordingSink::new();
        let env = ExecuteEnv {
            runtime: &runtime,
            debugger: &debugger,
            store: &crate::sink::NoScriptStore,
            sink: &sink,
        };

        let err = execute(
            &env,
            &cfg,
            ScriptInput::Handle("missing".to_string()),
            &ExecuteParams::new(3),
        )
        .expect_err("unknown handle");

        assert!(err.downcast_ref::<InvalidInputError>().is_some());
        assert_eq!(sink.attempt_count(), 0);
        assert_eq!(sink.completed_count(), 0);
        assert!(runtime.commands().is_empty());
    }

    #[test]
    fn handle_resolves_through_the_store() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = test_config(&temp);
        let runtime = ScriptedRuntime::new(vec![ok_result()]).with_artifact(b"v");
        let registry = no_provider();
        let debugger = DebugClient::new(&registry);
        let sink = RecordingSink::new();
        let store = MemoryStore::with_script(Script::with_id("s-42", SCRIPT));
        let env = ExecuteEnv {
            runtime: &runtime,
            debugger: &debugger,
            store: &store,
            sink: &sink,
        };

        let result = execute(
            &env,
            &cfg,
            ScriptInput::Handle("s-42".to_string()),
            &ExecuteParams::new(3),
        )
        .expect("execute");

        assert!(result.success);
        assert_eq!(result.run.script.id, "s-42");
    }

    #[test]
    fn cancellation_stops_before_next_attempt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = test_config(&temp);
        let runtime = ScriptedRuntime::new(vec![failed_result("boom")]);
        let registry = scripted_registry(ScriptedGenerator::always(SCRIPT));
        let debugger = DebugClient::new(&registry);
        let sink = RecordingSink::new();
        let env = ExecuteEnv {
            runtime: &runtime,
            debugger: &debugger,
            store: &crate::sink::NoScriptStore,
            sink: &sink,
        };

        let params = ExecuteParams::new(10);
        // Cancel before the run starts: the loop observes it at the first
        // iteration boundary and records no attempts.
        params.cancel.cancel();

        let result = execute(
            &env,
            &cfg,
            ScriptInput::Text(SCRIPT.to_string()),
            &params,
        )
        .expect("execute");

        assert!(!result.success);
        assert_eq!(result.attempts_used, 0);
        assert_eq!(result.run.outcome, Some(RunOutcome::Cancelled));
        assert!(result.error.as_deref().is_some_and(|e| e.contains("cancelled")));
        // Completion is still reported to the sink.
        assert_eq!(sink.completed_count(), 1);
    }

    /// Sink failures must never abort the loop.
    #[test]
    fn failing_sink_does_not_stop_the_run() {
        struct FailingSink;
        impl RecordSink for FailingSink {
            fn on_attempt_recorded(
                &self,
                _run: &ExecutionRun,
                _attempt: &ExecutionAttempt,
            ) -> Result<()> {
                anyhow::bail!("sink down")
            }
            fn on_run_completed(&self, _run: &ExecutionRun) -> Result<()> {
                anyhow::bail!("sink down")
            }
        }

        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = test_config(&temp);
        let runtime = ScriptedRuntime::new(vec![ok_result()]).with_artifact(b"v");
        let registry = no_provider();
        let debugger = DebugClient::new(&registry);
        let env = ExecuteEnv {
            runtime: &runtime,
            debugger: &debugger,
            store: &crate::sink::NoScriptStore,
            sink: &FailingSink,
        };

        let result = execute(
            &env,
            &cfg,
            ScriptInput::Text(SCRIPT.to_string()),
            &ExecuteParams::new(3),
        )
        .expect("execute");

        assert!(result.success);
    }

    #[test]
    fn payload_input_keeps_caller_id() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = test_config(&temp);
        let runtime = ScriptedRuntime::new(vec![ok_result()]).with_artifact(b"v");
        let registry = no_provider();
        let debugger = DebugClient::new(&registry);
        let sink = RecordingSink::new();
        let env = ExecuteEnv {
            runtime: &runtime,
            debugger: &debugger,
            store: &crate::sink::NoScriptStore,
            sink: &sink,
        };

        let result = execute(
            &env,
            &cfg,
            ScriptInput::Payload {
                content: SCRIPT.to_string(),
                id: Some("caller-7".to_string()),
            },
            &ExecuteParams::new(3),
        )
        .expect("execute");

        assert_eq!(result.run.script.id, "caller-7");
    }
}
