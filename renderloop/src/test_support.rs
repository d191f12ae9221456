//! Test-only scripted doubles for the container and provider seams.
//!
//! `ScriptedRuntime` serves queued command results in call order without
//! spawning processes; cleanup purges (`sh -c rm ...`) always succeed and
//! are tracked separately so they never consume scripted results.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::core::types::{ExecutionAttempt, ExecutionRun, Script};
use crate::io::container::{CommandResult, ContainerRuntime, ContainerTarget};
use crate::provider::{ProviderRegistry, TextGenerator};
use crate::sink::{RecordSink, ScriptStore};

/// Container runtime that replays a queue of command results.
pub struct ScriptedRuntime {
    running: bool,
    copy_in_ok: bool,
    /// When set, `copy_out` writes these bytes to the host path and reports
    /// success.
    artifact: Option<Vec<u8>>,
    results: Mutex<VecDeque<CommandResult>>,
    commands: Mutex<Vec<Vec<String>>>,
    cleanups: Mutex<Vec<Vec<String>>>,
    copy_in_calls: Mutex<usize>,
}

impl ScriptedRuntime {
    /// Queue of results served to render/install commands, in call order.
    pub fn new(results: Vec<CommandResult>) -> Self {
        Self {
            running: true,
            copy_in_ok: true,
            artifact: None,
            results: Mutex::new(results.into()),
            commands: Mutex::new(Vec::new()),
            cleanups: Mutex::new(Vec::new()),
            copy_in_calls: Mutex::new(0),
        }
    }

    pub fn with_artifact(mut self, bytes: &[u8]) -> Self {
        self.artifact = Some(bytes.to_vec());
        self
    }

    pub fn with_copy_in_failure(mut self) -> Self {
        self.copy_in_ok = false;
        self
    }

    pub fn stopped(mut self) -> Self {
        self.running = false;
        self
    }

    /// All recorded render/install argv, in call order.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().expect("commands lock").clone()
    }

    pub fn render_commands(&self) -> Vec<Vec<String>> {
        self.commands()
            .into_iter()
            .filter(|argv| argv.first().map(String::as_str) != Some("pip"))
            .collect()
    }

    pub fn install_commands(&self) -> Vec<Vec<String>> {
        self.commands()
            .into_iter()
            .filter(|argv| argv.first().map(String::as_str) == Some("pip"))
            .collect()
    }

    pub fn cleanup_commands(&self) -> Vec<Vec<String>> {
        self.cleanups.lock().expect("cleanups lock").clone()
    }

    pub fn copy_in_calls(&self) -> usize {
        *self.copy_in_calls.lock().expect("copy_in lock")
    }
}

fn is_cleanup(argv: &[String]) -> bool {
    argv.first().map(String::as_str) == Some("sh")
}

impl ContainerRuntime for ScriptedRuntime {
    fn is_running(&self, _target: &ContainerTarget) -> bool {
        self.running
    }

    fn ensure_running(&self, target: &ContainerTarget) -> Result<()> {
        if self.running {
            Ok(())
        } else {
            Err(anyhow!("container '{}' is not running", target.name))
        }
    }

    fn run_command(
        &self,
        target: &ContainerTarget,
        argv: &[String],
        _workdir: Option<&str>,
        _timeout: Duration,
    ) -> CommandResult {
        if is_cleanup(argv) {
            self.cleanups
                .lock()
                .expect("cleanups lock")
                .push(argv.to_vec());
            return CommandResult {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: Some(0),
                succeeded: true,
            };
        }

        if !self.running {
            return CommandResult::start_failure(format!(
                "container '{}' is not running",
                target.name
            ));
        }

        self.commands
            .lock()
            .expect("commands lock")
            .push(argv.to_vec());
        self.results
            .lock()
            .expect("results lock")
            .pop_front()
            .unwrap_or_else(|| CommandResult {
                stdout: String::new(),
                stderr: "no scripted result".to_string(),
                exit_code: Some(1),
                succeeded: false,
            })
    }

    fn copy_in(&self, _target: &ContainerTarget, _host_path: &Path, _container_path: &str) -> bool {
        *self.copy_in_calls.lock().expect("copy_in lock") += 1;
        self.copy_in_ok
    }

    fn copy_out(&self, _target: &ContainerTarget, _container_path: &str, host_path: &Path) -> bool {
        match &self.artifact {
            Some(bytes) => fs::write(host_path, bytes).is_ok(),
            None => false,
        }
    }
}

enum ScriptedResponses {
    Queue(Mutex<VecDeque<Result<String, String>>>),
    Always(String),
}

/// Text generator that replays scripted responses.
pub struct ScriptedGenerator {
    responses: ScriptedResponses,
}

impl ScriptedGenerator {
    /// Serve each response once, in order; further calls error.
    pub fn with_responses(responses: Vec<Result<String, String>>) -> Self {
        Self {
            responses: ScriptedResponses::Queue(Mutex::new(responses.into())),
        }
    }

    /// Serve the same text on every call.
    pub fn always(text: &str) -> Self {
        Self {
            responses: ScriptedResponses::Always(text.to_string()),
        }
    }
}

impl TextGenerator for ScriptedGenerator {
    fn generate(&self, _prompt: &str) -> Result<String> {
        match &self.responses {
            ScriptedResponses::Always(text) => Ok(text.clone()),
            ScriptedResponses::Queue(queue) => match queue
                .lock()
                .expect("responses lock")
                .pop_front()
            {
                Some(Ok(text)) => Ok(text),
                Some(Err(message)) => Err(anyhow!(message)),
                None => Err(anyhow!("no scripted response left")),
            },
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Wrap a single scripted generator in a registry.
pub fn scripted_registry(generator: ScriptedGenerator) -> ProviderRegistry {
    ProviderRegistry::from_backends(vec![Box::new(generator)])
}

/// Sink that records everything it is notified of.
#[derive(Default)]
pub struct RecordingSink {
    attempts: Mutex<Vec<ExecutionAttempt>>,
    completed: Mutex<Vec<ExecutionRun>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().expect("attempts lock").len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.lock().expect("completed lock").len()
    }

    pub fn completed_runs(&self) -> Vec<ExecutionRun> {
        self.completed.lock().expect("completed lock").clone()
    }
}

impl RecordSink for RecordingSink {
    fn on_attempt_recorded(&self, _run: &ExecutionRun, attempt: &ExecutionAttempt) -> Result<()> {
        self.attempts
            .lock()
            .expect("attempts lock")
            .push(attempt.clone());
        Ok(())
    }

    fn on_run_completed(&self, run: &ExecutionRun) -> Result<()> {
        self.completed
            .lock()
            .expect("completed lock")
            .push(run.clone());
        Ok(())
    }
}

/// In-memory script store keyed by id.
#[derive(Default)]
pub struct MemoryStore {
    scripts: HashMap<String, Script>,
}

impl MemoryStore {
    pub fn with_script(script: Script) -> Self {
        let mut scripts = HashMap::new();
        scripts.insert(script.id.clone(), script);
        Self { scripts }
    }
}

impl ScriptStore for MemoryStore {
    fn fetch(&self, id: &str) -> Result<Option<Script>> {
        Ok(self.scripts.get(id).cloned())
    }
}
