//! Persistent study history.
//!
//! A study is the ordered list of trials run for one
//! `(problem_dimension, sample_count)` pair. Every [`SearchLoop`] holds an
//! `Arc<dyn StudyStore>`; two backends are provided:
//!
//! | Backend | Description |
//! |---------|-------------|
//! | [`MemoryStudyStore`] | `BTreeMap` behind a read-write lock, lost on exit |
//! | [`SqliteStudyStore`] | `SQLite` file in WAL mode, shared across processes |
//!
//! Appends are optimistic: the caller states which `trial_index` it expects
//! to write next and the store refuses the write with
//! [`StoreError::Conflict`] when another writer got there first.
//!
//! [`SearchLoop`]: crate::SearchLoop

mod memory;
mod sqlite;

pub use memory::MemoryStudyStore;
pub use sqlite::{SqliteStudyStore, DEFAULT_STORE_PATH};

use at_types::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::trial::{best_trial, ObjectiveDirection, Trial};

/// Study name for a problem dimension and sample count.
pub fn study_identity(problem_dimension: u32, sample_count: u32) -> String {
    format!("{problem_dimension}_{sample_count}")
}

/// A named trial history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Study {
    pub identity: String,
    pub direction: ObjectiveDirection,
    pub created_at: DateTime<Utc>,
    /// Ordered by `trial_index`, which runs 0, 1, 2, ...
    pub trials: Vec<Trial>,
}

impl Study {
    pub fn new(identity: impl Into<String>, direction: ObjectiveDirection) -> Self {
        Self {
            identity: identity.into(),
            direction,
            created_at: Utc::now(),
            trials: Vec::new(),
        }
    }

    /// Index the next appended trial must carry.
    pub fn next_index(&self) -> usize {
        self.trials.len()
    }

    pub fn best_trial(&self) -> Option<&Trial> {
        best_trial(&self.trials, self.direction)
    }

    pub fn completed(&self) -> impl Iterator<Item = &Trial> {
        self.trials.iter().filter(|t| t.is_completed())
    }
}

/// Backend for study histories.
///
/// Implementations must be `Send + Sync`; the search loop shares its store
/// through an `Arc`.
pub trait StudyStore: Send + Sync {
    /// Load `identity`, creating it empty when it does not exist yet. An
    /// existing study keeps the direction it was created with.
    fn create_or_load(&self, identity: &str, direction: ObjectiveDirection) -> StoreResult<Study>;

    /// Append `trial` to `identity`. `trial.trial_index` is the index the
    /// caller expects to be next; any other store state is a conflict.
    fn append_trial(&self, identity: &str, trial: &Trial) -> StoreResult<()>;

    /// Load an existing study. [`StoreError::NotFound`] if it was never created.
    fn study(&self, identity: &str) -> StoreResult<Study>;

    /// Names of every known study, sorted.
    fn list_studies(&self) -> StoreResult<Vec<String>>;

    fn trials(&self, identity: &str) -> StoreResult<Vec<Trial>> {
        Ok(self.study(identity)?.trials)
    }

    /// Best completed trial of `identity` under the study's direction.
    fn best_trial(&self, identity: &str) -> StoreResult<Option<Trial>> {
        Ok(self.study(identity)?.best_trial().cloned())
    }
}

fn not_found(identity: &str) -> StoreError {
    StoreError::NotFound {
        study: identity.to_string(),
    }
}

fn conflict(identity: &str, expected: usize, actual: usize) -> StoreError {
    StoreError::Conflict {
        study: identity.to_string(),
        expected,
        actual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_joins_dimension_and_sample_count() {
        assert_eq!(study_identity(8, 100), "8_100");
        assert_eq!(study_identity(14, 3), "14_3");
    }

    #[test]
    fn new_study_is_empty() {
        let study = Study::new("5_100", ObjectiveDirection::Minimize);
        assert_eq!(study.next_index(), 0);
        assert!(study.best_trial().is_none());
    }
}
