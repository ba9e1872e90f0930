//! Trial records and search run bookkeeping.

use at_types::ScoreSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::search::ParamSet;

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveDirection {
    Maximize,
    Minimize,
}

impl Default for ObjectiveDirection {
    fn default() -> Self {
        Self::Minimize
    }
}

impl ObjectiveDirection {
    pub fn is_better(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::Maximize => candidate > incumbent,
            Self::Minimize => candidate < incumbent,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Maximize => "maximize",
            Self::Minimize => "minimize",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "maximize" => Some(Self::Maximize),
            "minimize" => Some(Self::Minimize),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Completed,
    /// Evaluation failed (after retries); the trial carries no objective.
    Failed,
}

impl TrialStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One finished iteration of the search. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    /// Position in the study's history, starting at 0.
    pub trial_index: usize,
    pub params: ParamSet,
    pub status: TrialStatus,
    /// `mean_log_score` of the batch; `None` for failed trials.
    pub objective_value: Option<f64>,
    pub summary: Option<ScoreSummary>,
    pub error: Option<String>,
    /// Number of evaluation attempts spent on this trial.
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Trial {
    pub fn completed(
        trial_index: usize,
        params: ParamSet,
        summary: ScoreSummary,
        attempts: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            trial_index,
            params,
            status: TrialStatus::Completed,
            objective_value: Some(summary.mean_log_score),
            summary: Some(summary),
            error: None,
            attempts,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(
        trial_index: usize,
        params: ParamSet,
        error: String,
        attempts: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            trial_index,
            params,
            status: TrialStatus::Failed,
            objective_value: None,
            summary: None,
            error: Some(error),
            attempts,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TrialStatus::Completed
    }
}

/// Best completed trial under `direction`, if any.
pub fn best_trial<'a, I>(trials: I, direction: ObjectiveDirection) -> Option<&'a Trial>
where
    I: IntoIterator<Item = &'a Trial>,
{
    trials
        .into_iter()
        .filter(|t| t.is_completed() && t.objective_value.is_some())
        .reduce(|best, candidate| {
            match (candidate.objective_value, best.objective_value) {
                (Some(c), Some(b)) if direction.is_better(c, b) => candidate,
                _ => best,
            }
        })
}

/// Outcome of one invocation of the search loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    pub study: String,
    pub direction: ObjectiveDirection,
    /// Trials already in the study before this run.
    pub resumed_trials: usize,
    pub trials_completed: usize,
    pub trials_failed: usize,
    /// Best trial over the whole study history, not just this run.
    pub best_trial: Option<Trial>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SearchReport {
    pub fn new(study: String, direction: ObjectiveDirection, history: &[Trial]) -> Self {
        Self {
            study,
            direction,
            resumed_trials: history.len(),
            trials_completed: 0,
            trials_failed: 0,
            best_trial: best_trial(history, direction).cloned(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn trials_run(&self) -> usize {
        self.trials_completed + self.trials_failed
    }

    pub fn record(&mut self, trial: &Trial) {
        match trial.status {
            TrialStatus::Completed => self.trials_completed += 1,
            TrialStatus::Failed => self.trials_failed += 1,
        }
        self.update_best(trial);
    }

    /// Update the best trial if `trial` improves on the current best.
    pub fn update_best(&mut self, trial: &Trial) {
        let Some(objective) = trial.objective_value.filter(|_| trial.is_completed()) else {
            return;
        };
        let improves = match self.best_trial.as_ref().and_then(|b| b.objective_value) {
            None => true,
            Some(current) => self.direction.is_better(objective, current),
        };
        if improves {
            self.best_trial = Some(trial.clone());
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::ParameterValue;

    fn summary(log: f64) -> ScoreSummary {
        ScoreSummary {
            mean_score: log + 1.0,
            mean_log_score: log,
            mean_run_count: 10.0,
        }
    }

    fn params(mc_run: i64) -> ParamSet {
        let mut p = ParamSet::new();
        p.insert("mc_run".into(), ParameterValue::Int(mc_run));
        p
    }

    #[test]
    fn completed_trial_uses_log_mean_as_objective() {
        let trial = Trial::completed(0, params(5), summary(1.25), 1, Utc::now());
        assert_eq!(trial.objective_value, Some(1.25));
        assert!(trial.is_completed());
        assert!(trial.finished_at >= trial.started_at);
    }

    #[test]
    fn failed_trial_has_no_objective() {
        let trial = Trial::failed(3, params(5), "boom".into(), 3, Utc::now());
        assert_eq!(trial.status, TrialStatus::Failed);
        assert!(trial.objective_value.is_none());
        assert_eq!(trial.error.as_deref(), Some("boom"));
    }

    #[test]
    fn best_trial_tracking_minimize() {
        let mut report = SearchReport::new("5_100".into(), ObjectiveDirection::Minimize, &[]);
        report.record(&Trial::completed(0, params(1), summary(2.0), 1, Utc::now()));
        report.record(&Trial::completed(1, params(2), summary(0.5), 1, Utc::now()));
        report.record(&Trial::failed(2, params(3), "x".into(), 3, Utc::now()));
        report.record(&Trial::completed(3, params(4), summary(1.0), 1, Utc::now()));

        assert_eq!(report.trials_completed, 3);
        assert_eq!(report.trials_failed, 1);
        assert_eq!(report.trials_run(), 4);
        assert_eq!(report.best_trial.as_ref().unwrap().trial_index, 1);
    }

    #[test]
    fn best_trial_tracking_maximize() {
        let mut report = SearchReport::new("x".into(), ObjectiveDirection::Maximize, &[]);
        report.record(&Trial::completed(0, params(1), summary(2.0), 1, Utc::now()));
        report.record(&Trial::completed(1, params(2), summary(0.5), 1, Utc::now()));
        assert_eq!(report.best_trial.as_ref().unwrap().trial_index, 0);
    }

    #[test]
    fn report_starts_from_history_best() {
        let history = vec![
            Trial::completed(0, params(1), summary(0.7), 1, Utc::now()),
            Trial::completed(1, params(2), summary(0.3), 1, Utc::now()),
        ];
        let report = SearchReport::new("x".into(), ObjectiveDirection::Minimize, &history);
        assert_eq!(report.resumed_trials, 2);
        assert_eq!(report.trials_run(), 0);
        assert_eq!(report.best_trial.unwrap().trial_index, 1);
    }

    #[test]
    fn best_of_only_failures_is_none() {
        let history = vec![Trial::failed(0, params(1), "x".into(), 1, Utc::now())];
        assert!(best_trial(&history, ObjectiveDirection::Minimize).is_none());
    }

    #[test]
    fn trial_round_trips_through_json() {
        let trial = Trial::completed(4, params(9), summary(1.5), 2, Utc::now());
        let json = serde_json::to_string(&trial).unwrap();
        let back: Trial = serde_json::from_str(&json).unwrap();
        assert_eq!(back, trial);
    }
}
