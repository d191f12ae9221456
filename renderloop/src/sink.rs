//! Persistence boundary for attempt and run records.
//!
//! Sinks are fire-and-forget: the orchestrator notifies through helpers
//! that log failures and continue, so a broken sink can never abort a run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;

use crate::core::types::{ExecutionAttempt, ExecutionRun, Script};

/// Receives attempt and run records for persistence.
pub trait RecordSink {
    fn on_attempt_recorded(&self, run: &ExecutionRun, attempt: &ExecutionAttempt) -> Result<()>;
    fn on_run_completed(&self, run: &ExecutionRun) -> Result<()>;
}

/// Resolves script handles to stored scripts.
pub trait ScriptStore {
    fn fetch(&self, id: &str) -> Result<Option<Script>>;
}

/// Sink that drops everything.
pub struct NoopSink;

impl RecordSink for NoopSink {
    fn on_attempt_recorded(&self, _run: &ExecutionRun, _attempt: &ExecutionAttempt) -> Result<()> {
        Ok(())
    }

    fn on_run_completed(&self, _run: &ExecutionRun) -> Result<()> {
        Ok(())
    }
}

/// Store that knows no scripts; every handle is an unknown handle.
pub struct NoScriptStore;

impl ScriptStore for NoScriptStore {
    fn fetch(&self, _id: &str) -> Result<Option<Script>> {
        Ok(None)
    }
}

/// On-disk sink writing per-run records under `<root>/<run-id>/`.
///
/// Each attempt lands in `attempt-<n>.json` as it is finalized; the full run
/// is written to `run.json` at completion. These are product artifacts:
/// always written, independent of `RUST_LOG`.
pub struct RunLogSink {
    root: PathBuf,
}

impl RunLogSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn run_dir(&self, run: &ExecutionRun) -> PathBuf {
        self.root.join(&run.run_id)
    }
}

impl RecordSink for RunLogSink {
    fn on_attempt_recorded(&self, run: &ExecutionRun, attempt: &ExecutionAttempt) -> Result<()> {
        let dir = self.run_dir(run);
        let path = dir.join(format!("attempt-{}.json", attempt.attempt_number));
        write_json(&path, attempt)
    }

    fn on_run_completed(&self, run: &ExecutionRun) -> Result<()> {
        let path = self.run_dir(run).join("run.json");
        write_json(&path, run)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create record dir {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write record {}", path.display()))
}

/// Notify the sink of a finalized attempt, logging instead of failing.
pub(crate) fn notify_attempt(sink: &dyn RecordSink, run: &ExecutionRun, attempt: &ExecutionAttempt) {
    if let Err(err) = sink.on_attempt_recorded(run, attempt) {
        warn!(
            run_id = %run.run_id,
            attempt = attempt.attempt_number,
            err = %format!("{err:#}"),
            "record sink failed on attempt"
        );
    }
}

/// Notify the sink of a completed run, logging instead of failing.
pub(crate) fn notify_completed(sink: &dyn RecordSink, run: &ExecutionRun) {
    if let Err(err) = sink.on_run_completed(run) {
        warn!(
            run_id = %run.run_id,
            err = %format!("{err:#}"),
            "record sink failed on run completion"
        );
    }
}
