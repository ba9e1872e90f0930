//! Workflow engine abstraction.

use async_trait::async_trait;
use at_types::{DispatchResult, ExecutionStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Snapshot returned by a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionDescription {
    pub status: ExecutionStatus,
    /// Serialized output; only present once the execution has succeeded.
    pub output: Option<String>,
    /// Full engine record, kept for diagnostics.
    pub raw: serde_json::Value,
}

/// Remote engine that fans a batch out to workers and reports one aggregate
/// status for it.
///
/// Implementations may talk to a real orchestration service over HTTP (see
/// [`crate::http::HttpWorkflowEngine`]) or evaluate tasks in-process (see
/// [`crate::simulated::SimulatedEngine`]).
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Start a new execution under a unique `name`. Returns the execution id.
    async fn start(&self, name: &str, payload: String) -> DispatchResult<String>;

    /// Query the current status of an execution. Safe to repeat.
    async fn describe(&self, execution_id: &str) -> DispatchResult<ExecutionDescription>;
}

#[async_trait]
impl<T: WorkflowEngine + ?Sized> WorkflowEngine for Arc<T> {
    async fn start(&self, name: &str, payload: String) -> DispatchResult<String> {
        (**self).start(name, payload).await
    }

    async fn describe(&self, execution_id: &str) -> DispatchResult<ExecutionDescription> {
        (**self).describe(execution_id).await
    }
}

#[async_trait]
impl<T: WorkflowEngine + ?Sized> WorkflowEngine for Box<T> {
    async fn start(&self, name: &str, payload: String) -> DispatchResult<String> {
        (**self).start(name, payload).await
    }

    async fn describe(&self, execution_id: &str) -> DispatchResult<ExecutionDescription> {
        (**self).describe(execution_id).await
    }
}
