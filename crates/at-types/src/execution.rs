//! Remote execution status and handle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregate status of one remote execution, as reported by the workflow engine.
///
/// Status strings outside the known set are preserved in [`ExecutionStatus::Unknown`]
/// so the driver can report them verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ExecutionStatus {
    Submitted,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Aborted,
    Unknown(String),
}

impl ExecutionStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "SUBMITTED" => Self::Submitted,
            "RUNNING" => Self::Running,
            "SUCCEEDED" => Self::Succeeded,
            "FAILED" => Self::Failed,
            "TIMED_OUT" => Self::TimedOut,
            "ABORTED" => Self::Aborted,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Submitted => "SUBMITTED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::TimedOut => "TIMED_OUT",
            Self::Aborted => "ABORTED",
            Self::Unknown(raw) => raw,
        }
    }

    /// Terminal statuses never change once observed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::Aborted
        )
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Submitted | Self::Running)
    }
}

impl From<String> for ExecutionStatus {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<ExecutionStatus> for String {
    fn from(status: ExecutionStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-side view of a submitted execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionHandle {
    /// Engine-assigned identifier used for status queries.
    pub execution_id: String,
    /// Unique name the execution was started under.
    pub name: String,
    pub status: ExecutionStatus,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionHandle {
    pub fn new(execution_id: String, name: String) -> Self {
        Self {
            execution_id,
            name,
            status: ExecutionStatus::Submitted,
            submitted_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Record a polled status. Returns `false` (and leaves the handle alone)
    /// once a terminal status has been recorded, or when `status` would move
    /// the handle back to SUBMITTED.
    pub fn record_status(&mut self, status: ExecutionStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        if status == ExecutionStatus::Submitted && self.status != ExecutionStatus::Submitted {
            return false;
        }
        if status.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.status = status;
        true
    }
}
