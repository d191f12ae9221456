//! Shared data model for execution runs.
//!
//! These types define stable contracts between the orchestration loop, the
//! container adapter, and the record sink. They carry no I/O and are the
//! shapes the sink persists, so serialized output must remain stable.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Caller-supplied script input, resolved exactly once at `execute` entry.
///
/// Anything that is not text, a record handle, or a `{content}`-shaped
/// payload is rejected up front with [`InvalidInputError`] before any
/// attempt is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptInput {
    /// Raw script text.
    Text(String),
    /// Identifier of a script persisted elsewhere, resolved via `ScriptStore`.
    Handle(String),
    /// Structured payload carrying the script text and an optional id.
    Payload { content: String, id: Option<String> },
}

impl ScriptInput {
    /// Parse a JSON value into a tagged input.
    ///
    /// Accepts a JSON string, an object with a string `content` field
    /// (optional `id`), or an object with a string `handle` / `script_id`
    /// field. Everything else is an [`InvalidInputError`].
    pub fn from_json(value: &Value) -> Result<Self, InvalidInputError> {
        match value {
            Value::String(text) => Ok(Self::Text(text.clone())),
            Value::Object(map) => {
                if let Some(content) = map.get("content").and_then(Value::as_str) {
                    let id = map.get("id").and_then(Value::as_str).map(str::to_string);
                    return Ok(Self::Payload {
                        content: content.to_string(),
                        id,
                    });
                }
                for key in ["handle", "script_id"] {
                    if let Some(handle) = map.get(key).and_then(Value::as_str) {
                        return Ok(Self::Handle(handle.to_string()));
                    }
                }
                Err(InvalidInputError::new(
                    "object input must carry a string 'content', 'handle', or 'script_id' field",
                ))
            }
            other => Err(InvalidInputError::new(format!(
                "expected script text, a handle, or a content payload, got {}",
                json_type_name(other)
            ))),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Malformed caller request. The only fatal, non-retried condition: surfaced
/// before the loop starts, with no attempt recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidInputError {
    pub reason: String,
}

impl InvalidInputError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn unknown_handle(id: &str) -> Self {
        Self::new(format!("no script found for handle '{id}'"))
    }
}

impl fmt::Display for InvalidInputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid script input: {}", self.reason)
    }
}

impl std::error::Error for InvalidInputError {}

/// Lifecycle status of a script, mutated only by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptStatus {
    Pending,
    Executing,
    Debugging,
    Successful,
    Failed,
}

/// A unit of generated source text plus metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub id: String,
    pub content: String,
    /// Extracted entry-point name; `None` until computed by the loop.
    pub scene_class: Option<String>,
    pub status: ScriptStatus,
}

impl Script {
    /// Wrap raw text in a pending script with a fresh id.
    pub fn from_text(content: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), content)
    }

    pub fn with_id(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            scene_class: None,
            status: ScriptStatus::Pending,
        }
    }
}

/// Retryable failure classification for one attempt.
///
/// `InvalidInput` and `Exhausted` are terminal conditions of the whole run
/// and never appear on an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Script text lacks a recognizable scene declaration; no command was
    /// dispatched.
    NoEntryPoint,
    /// Container target could not be reached or started.
    RuntimeUnavailable,
    /// Command ran but exited non-zero, or the output artifact was missing.
    ExecutionFailed,
}

/// Outcome of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success {
        /// Artifact location relative to the media root.
        output_rel: String,
    },
    Failure {
        kind: FailureKind,
        error: String,
    },
}

/// One pass through the retry loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    /// 1-based, strictly increasing within a run.
    pub attempt_number: u32,
    /// The exact text executed this attempt.
    pub script_snapshot: String,
    pub outcome: AttemptOutcome,
    /// Combined stdout/stderr capture (bounded by the output limit).
    pub log: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionAttempt {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Success { .. })
    }
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Succeeded,
    Exhausted,
    Cancelled,
}

/// The aggregate of all attempts for one submitted script.
///
/// Owned exclusively by the orchestrator for the duration of one `execute`
/// call, then handed to the record sink at completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRun {
    pub run_id: String,
    pub script: Script,
    /// Append-only, ordered by `attempt_number`.
    pub attempts: Vec<ExecutionAttempt>,
    /// One entry per failed attempt, order preserved even after a fix is
    /// applied.
    pub error_history: Vec<String>,
    pub outcome: Option<RunOutcome>,
}

impl ExecutionRun {
    pub fn new(script: Script) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            script,
            attempts: Vec::new(),
            error_history: Vec::new(),
            outcome: None,
        }
    }

    /// Number the next attempt. Gap-free and strictly increasing because
    /// attempts are only ever appended via [`ExecutionRun::record`].
    pub fn next_attempt_number(&self) -> u32 {
        self.attempts.len() as u32 + 1
    }

    /// Append a finalized attempt, extending the error history on failure.
    pub fn record(&mut self, attempt: ExecutionAttempt) {
        if let AttemptOutcome::Failure { error, .. } = &attempt.outcome {
            self.error_history.push(error.clone());
        }
        self.attempts.push(attempt);
    }

    pub fn attempts_used(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn last_error(&self) -> Option<&str> {
        self.error_history.last().map(String::as_str)
    }
}

/// Final result of `execute`, always returned to the caller; never a bare
/// error once a run has started.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub success: bool,
    /// Host path of the rendered artifact, present on success.
    pub output_path: Option<PathBuf>,
    /// Terminal error message, present on failure.
    pub error: Option<String>,
    pub attempts_used: u32,
    pub run: ExecutionRun,
}
