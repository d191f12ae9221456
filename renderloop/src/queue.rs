//! Bounded submission queue for execution runs.
//!
//! A single worker thread owns the runtime, registry, store, and sink, and
//! serializes runs against the one configured container target: attempts of
//! different runs mutate shared container-side state and must not overlap.
//! Submission failures (queue full, worker gone) are explicit errors rather
//! than work lost in a detached thread.

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};
use std::thread::{self, JoinHandle};

use tracing::{error, info, warn};

use crate::core::types::ScriptInput;
use crate::debug::DebugClient;
use crate::io::config::RenderConfig;
use crate::io::container::ContainerRuntime;
use crate::provider::ProviderRegistry;
use crate::run::{CancelToken, ExecuteEnv, ExecuteParams, execute};
use crate::sink::{RecordSink, ScriptStore};

/// Why a submission was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// The queue is at capacity; the caller should back off or reject.
    QueueFull,
    /// The worker has shut down and will accept no more runs.
    WorkerGone,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "run queue is full"),
            Self::WorkerGone => write!(f, "run queue worker has shut down"),
        }
    }
}

impl std::error::Error for SubmitError {}

struct Job {
    input: ScriptInput,
    max_attempts: u32,
}

/// Handle to the worker thread and its submission channel.
pub struct RunQueue {
    sender: Option<SyncSender<Job>>,
    worker: Option<JoinHandle<()>>,
    cancel: CancelToken,
}

impl RunQueue {
    /// Start the worker with its owned collaborators.
    pub fn spawn<R>(
        runtime: R,
        cfg: RenderConfig,
        registry: ProviderRegistry,
        store: Arc<dyn ScriptStore + Send + Sync>,
        sink: Arc<dyn RecordSink + Send + Sync>,
        capacity: usize,
    ) -> Self
    where
        R: ContainerRuntime + Send + 'static,
    {
        let (sender, receiver) = sync_channel::<Job>(capacity);
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();
        let worker = thread::spawn(move || {
            worker_loop(&receiver, &runtime, &cfg, &registry, &*store, &*sink, &worker_cancel);
        });

        Self {
            sender: Some(sender),
            worker: Some(worker),
            cancel,
        }
    }

    /// Enqueue a run. Never blocks: a full queue is the caller's problem to
    /// handle, not a silent stall.
    pub fn submit(&self, input: ScriptInput, max_attempts: u32) -> Result<(), SubmitError> {
        let Some(sender) = &self.sender else {
            return Err(SubmitError::WorkerGone);
        };
        sender
            .try_send(Job {
                input,
                max_attempts,
            })
            .map_err(|err| match err {
                TrySendError::Full(_) => SubmitError::QueueFull,
                TrySendError::Disconnected(_) => SubmitError::WorkerGone,
            })
    }

    /// Abort: the in-flight run stops at its next iteration boundary and
    /// queued jobs are dropped. Pair with [`RunQueue::shutdown`] to wait.
    pub fn cancel_all(&self) {
        self.cancel.cancel();
    }

    /// Stop accepting work and wait for the worker to drain what was
    /// already accepted. Further submissions report
    /// [`SubmitError::WorkerGone`].
    pub fn shutdown(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            error!("run queue worker panicked");
        }
    }
}

impl Drop for RunQueue {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            error!("run queue worker panicked");
        }
    }
}

fn worker_loop<R: ContainerRuntime>(
    receiver: &Receiver<Job>,
    runtime: &R,
    cfg: &RenderConfig,
    registry: &ProviderRegistry,
    store: &(dyn ScriptStore + Send + Sync),
    sink: &(dyn RecordSink + Send + Sync),
    cancel: &CancelToken,
) {
    let debugger = DebugClient::new(registry);
    let env = ExecuteEnv {
        runtime,
        debugger: &debugger,
        store,
        sink,
    };

    while let Ok(job) = receiver.recv() {
        if cancel.is_cancelled() {
            info!("queue cancelled, dropping remaining jobs");
            break;
        }
        let params = ExecuteParams {
            max_attempts: job.max_attempts,
            cancel: cancel.clone(),
        };
        match execute(&env, cfg, job.input, &params) {
            Ok(result) if result.success => {
                info!(
                    run_id = %result.run.run_id,
                    attempts = result.attempts_used,
                    "queued run succeeded"
                );
            }
            Ok(result) => {
                warn!(
                    run_id = %result.run.run_id,
                    attempts = result.attempts_used,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "queued run failed"
                );
            }
            Err(err) => {
                // Invalid input: the run never started; nothing for the sink.
                warn!(err = %format!("{err:#}"), "queued run rejected");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::container::CommandResult;
    use crate::sink::NoScriptStore;
    use crate::test_support::RecordingSink;

    fn queue_with_sink(
        results: Vec<CommandResult>,
        capacity: usize,
    ) -> (RunQueue, Arc<RecordingSink>, tempfile::TempDir) {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = RenderConfig {
            media_root: temp.path().join("media"),
            staging_dir: Some(temp.path().join("staging")),
            ..RenderConfig::default()
        };
        let runtime = crate::test_support::ScriptedRuntime::new(results).with_artifact(b"v");
        let sink = Arc::new(RecordingSink::new());
        let queue = RunQueue::spawn(
            runtime,
            cfg,
            ProviderRegistry::from_backends(Vec::new()),
            Arc::new(NoScriptStore),
            sink.clone(),
            capacity,
        );
        (queue, sink, temp)
    }

    const SCRIPT: &str = "class A(Scene):\n    def construct(self):\n        pass\n";

    #[test]
    fn submitted_run_reaches_the_sink() {
        let (mut queue, sink, _temp) = queue_with_sink(
            vec![CommandResult {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: Some(0),
                succeeded: true,
            }],
            4,
        );

        queue
            .submit(ScriptInput::Text(SCRIPT.to_string()), 3)
            .expect("submit");
        queue.shutdown();

        assert_eq!(sink.completed_count(), 1);
        let runs = sink.completed_runs();
        assert_eq!(runs[0].attempts_used(), 1);
    }

    #[test]
    fn submit_after_shutdown_reports_worker_gone() {
        let (mut queue, _sink, _temp) = queue_with_sink(Vec::new(), 1);
        queue.shutdown();

        let err = queue
            .submit(ScriptInput::Text(SCRIPT.to_string()), 1)
            .expect_err("worker gone");
        assert_eq!(err, SubmitError::WorkerGone);
    }

    #[test]
    fn full_queue_reports_queue_full() {
        // No worker draining the channel: the first job fills capacity 1,
        // the second must be rejected rather than silently dropped.
        let (sender, receiver) = sync_channel::<Job>(1);
        let queue = RunQueue {
            sender: Some(sender),
            worker: None,
            cancel: CancelToken::new(),
        };

        queue
            .submit(ScriptInput::Text(SCRIPT.to_string()), 1)
            .expect("first submit fits");
        let err = queue
            .submit(ScriptInput::Text(SCRIPT.to_string()), 1)
            .expect_err("queue full");
        assert_eq!(err, SubmitError::QueueFull);
        drop(receiver);
    }
}
