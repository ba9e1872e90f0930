use thiserror::Error;

use crate::execution::ExecutionStatus;

/// Main error type for anneal-tune
#[derive(Error, Debug)]
pub enum AtError {
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Aggregation precondition violated: {0}")]
    AggregationPrecondition(#[from] AggregationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Study store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Search cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AtError {
    /// Whether re-running the same evaluation might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Dispatch(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Errors that must abort a whole search run instead of failing one trial.
    ///
    /// Besides cancellation and local I/O, this covers engine contract
    /// violations: an unknown status, unusable output, or results the
    /// aggregator rejects. Only transient remote failures and rejected
    /// proposals are skipped.
    pub fn is_fatal_for_search(&self) -> bool {
        matches!(
            self,
            Self::Dispatch(
                DispatchError::Cancelled { .. }
                    | DispatchError::UnexpectedStatus { .. }
                    | DispatchError::MalformedOutput { .. }
            ) | Self::AggregationPrecondition(_)
                | Self::Cancelled(_)
                | Self::Store(_)
                | Self::Io(_)
        )
    }
}

/// Errors raised while submitting a batch or waiting for it to settle.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Submission of execution {name} failed: {message}")]
    SubmissionFailed { name: String, message: String },

    #[error("Transport error while polling {execution_id}: {message}")]
    Transport {
        execution_id: String,
        message: String,
    },

    #[error("Execution finished with status {status}: {details}")]
    ExecutionFailed {
        status: ExecutionStatus,
        details: serde_json::Value,
    },

    #[error("Unexpected execution status: {status}")]
    UnexpectedStatus { status: String },

    #[error("Malformed output from execution {execution_id}: {message}")]
    MalformedOutput {
        execution_id: String,
        message: String,
    },

    #[error("Execution {execution_id} did not settle within {waited_secs} seconds")]
    DeadlineExceeded {
        execution_id: String,
        waited_secs: u64,
    },

    #[error("Wait for execution {execution_id} was cancelled")]
    Cancelled { execution_id: String },
}

impl DispatchError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SubmissionFailed { .. }
                | Self::Transport { .. }
                | Self::ExecutionFailed { .. }
                | Self::DeadlineExceeded { .. }
        )
    }
}

/// Reasons a batch of results cannot be summarized.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    #[error("cannot summarize an empty batch")]
    EmptyBatch,

    #[error("seed {seed} reported score {score}; scores must be finite and positive")]
    NonPositiveScore { seed: u64, score: f64 },
}

/// Invalid solver or driver configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {field}: {message}")]
    InvalidField { field: String, message: String },

    #[error("missing parameter: {field}")]
    MissingField { field: String },
}

impl ConfigError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Study store failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Study not found: {study}")]
    NotFound { study: String },

    #[error(
        "Concurrent modification of study {study}: expected trial index {expected}, store is at {actual}"
    )]
    Conflict {
        study: String,
        expected: usize,
        actual: usize,
    },

    #[error("Corrupt trial record in study {study}: {message}")]
    Corrupt { study: String, message: String },
}

/// Result type alias for anneal-tune operations
pub type AtResult<T> = Result<T, AtError>;

/// Result alias for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Result alias for study store operations.
pub type StoreResult<T> = Result<T, StoreError>;
