//! Batch submission and the poll-until-terminal loop.

use at_types::{
    DispatchError, DispatchResult, ExecutionHandle, ExecutionStatus, TaskDescriptor, TaskResult,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::workflow::{ExecutionDescription, WorkflowEngine};

/// Poll cadence for one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Wait before the first status query; engines need a moment to leave
    /// SUBMITTED.
    pub settle_delay: Duration,
    /// Wait between status queries while the execution is pending.
    pub poll_interval: Duration,
    /// Overall budget measured from submission. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(7),
            poll_interval: Duration::from_secs(1),
            timeout: None,
        }
    }
}

impl PollConfig {
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A batch that reached SUCCEEDED, with its decoded results.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedBatch {
    pub handle: ExecutionHandle,
    pub results: Vec<TaskResult>,
}

/// Submits batches to a [`WorkflowEngine`] and waits for them to settle.
#[derive(Debug)]
pub struct BatchExecutor<E> {
    engine: E,
    poll: PollConfig,
    cancel: CancelSignal,
}

impl<E: WorkflowEngine> BatchExecutor<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            poll: PollConfig::default(),
            cancel: CancelSignal::never(),
        }
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn poll_config(&self) -> &PollConfig {
        &self.poll
    }

    /// Submit the batch as one execution and block until it is terminal.
    ///
    /// Every call starts a brand-new execution under a fresh name.
    pub async fn submit_and_wait(&self, tasks: &[TaskDescriptor]) -> DispatchResult<CompletedBatch> {
        let started = Instant::now();
        let mut handle = self.submit(tasks).await?;
        let results = self.wait(&mut handle, started, tasks.len()).await?;
        Ok(CompletedBatch { handle, results })
    }

    /// Start a new execution. Failures are reported as-is, never retried here.
    pub async fn submit(&self, tasks: &[TaskDescriptor]) -> DispatchResult<ExecutionHandle> {
        let name = Uuid::new_v4().to_string();
        let payload = serde_json::to_string(tasks).map_err(|e| DispatchError::SubmissionFailed {
            name: name.clone(),
            message: format!("could not serialize batch: {e}"),
        })?;

        let execution_id = self.engine.start(&name, payload).await?;
        info!(
            execution_id = %execution_id,
            name = %name,
            tasks = tasks.len(),
            "batch submitted"
        );
        Ok(ExecutionHandle::new(execution_id, name))
    }

    /// Poll `handle` until it reaches a terminal status.
    async fn wait(
        &self,
        handle: &mut ExecutionHandle,
        started: Instant,
        expected: usize,
    ) -> DispatchResult<Vec<TaskResult>> {
        let deadline = self.poll.timeout.map(|t| started + t);

        self.pause(handle, started, deadline, self.poll.settle_delay)
            .await?;

        loop {
            let description = self
                .guarded(handle, started, deadline, self.engine.describe(&handle.execution_id))
                .await??;
            if !handle.record_status(description.status.clone()) {
                warn!(
                    execution_id = %handle.execution_id,
                    recorded = %handle.status,
                    reported = %description.status,
                    "ignoring status regression"
                );
            }

            match &description.status {
                ExecutionStatus::Submitted | ExecutionStatus::Running => {
                    debug!(
                        execution_id = %handle.execution_id,
                        status = %description.status,
                        "execution pending"
                    );
                    self.pause(handle, started, deadline, self.poll.poll_interval)
                        .await?;
                }
                ExecutionStatus::Succeeded => {
                    info!(
                        execution_id = %handle.execution_id,
                        elapsed_secs = started.elapsed().as_secs(),
                        "execution succeeded"
                    );
                    return decode_output(&handle.execution_id, &description, expected);
                }
                ExecutionStatus::Failed | ExecutionStatus::TimedOut | ExecutionStatus::Aborted => {
                    warn!(
                        execution_id = %handle.execution_id,
                        status = %description.status,
                        "execution did not succeed"
                    );
                    return Err(DispatchError::ExecutionFailed {
                        status: description.status.clone(),
                        details: description.raw.clone(),
                    });
                }
                ExecutionStatus::Unknown(raw) => {
                    warn!(execution_id = %handle.execution_id, status = %raw, "unexpected execution status");
                    return Err(DispatchError::UnexpectedStatus {
                        status: raw.clone(),
                    });
                }
            }
        }
    }

    /// Sleep for `duration`, bounded by the deadline and the cancel signal.
    async fn pause(
        &self,
        handle: &ExecutionHandle,
        started: Instant,
        deadline: Option<Instant>,
        duration: Duration,
    ) -> DispatchResult<()> {
        let wake = Instant::now() + duration;
        match deadline {
            Some(deadline) if wake >= deadline => {
                self.guarded(handle, started, Some(deadline), std::future::pending::<()>())
                    .await
            }
            _ => {
                self.guarded(handle, started, None, tokio::time::sleep_until(wake))
                    .await
            }
        }
    }

    /// Run `fut` unless the deadline passes or cancellation fires first.
    async fn guarded<F: Future>(
        &self,
        handle: &ExecutionHandle,
        started: Instant,
        deadline: Option<Instant>,
        fut: F,
    ) -> DispatchResult<F::Output> {
        let deadline_reached = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!(execution_id = %handle.execution_id, "wait cancelled");
                Err(DispatchError::Cancelled {
                    execution_id: handle.execution_id.clone(),
                })
            }
            _ = deadline_reached => {
                warn!(execution_id = %handle.execution_id, "execution deadline exceeded");
                Err(DispatchError::DeadlineExceeded {
                    execution_id: handle.execution_id.clone(),
                    waited_secs: started.elapsed().as_secs(),
                })
            }
            output = fut => Ok(output),
        }
    }
}

fn decode_output(
    execution_id: &str,
    description: &ExecutionDescription,
    expected: usize,
) -> DispatchResult<Vec<TaskResult>> {
    let malformed = |message: String| DispatchError::MalformedOutput {
        execution_id: execution_id.to_string(),
        message,
    };

    let output = description
        .output
        .as_deref()
        .ok_or_else(|| malformed("succeeded without an output payload".to_string()))?;
    let results: Vec<TaskResult> =
        serde_json::from_str(output).map_err(|e| malformed(e.to_string()))?;
    if results.len() != expected {
        return Err(malformed(format!(
            "expected {expected} results, got {}",
            results.len()
        )));
    }
    Ok(results)
}
