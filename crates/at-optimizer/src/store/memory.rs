use std::collections::BTreeMap;

use at_types::StoreResult;
use parking_lot::RwLock;

use super::{conflict, not_found, Study, StudyStore};
use crate::trial::{ObjectiveDirection, Trial};

/// In-process study store, used for `--simulate` runs without a database
/// and in tests.
#[derive(Debug, Default)]
pub struct MemoryStudyStore {
    studies: RwLock<BTreeMap<String, Study>>,
}

impl MemoryStudyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StudyStore for MemoryStudyStore {
    fn create_or_load(&self, identity: &str, direction: ObjectiveDirection) -> StoreResult<Study> {
        let mut studies = self.studies.write();
        let study = studies
            .entry(identity.to_string())
            .or_insert_with(|| Study::new(identity, direction));
        Ok(study.clone())
    }

    fn append_trial(&self, identity: &str, trial: &Trial) -> StoreResult<()> {
        let mut studies = self.studies.write();
        let study = studies.get_mut(identity).ok_or_else(|| not_found(identity))?;
        let actual = study.next_index();
        if trial.trial_index != actual {
            return Err(conflict(identity, trial.trial_index, actual));
        }
        study.trials.push(trial.clone());
        Ok(())
    }

    fn study(&self, identity: &str) -> StoreResult<Study> {
        self.studies
            .read()
            .get(identity)
            .cloned()
            .ok_or_else(|| not_found(identity))
    }

    fn list_studies(&self) -> StoreResult<Vec<String>> {
        Ok(self.studies.read().keys().cloned().collect())
    }
}
