//! The outer parameter search: propose, evaluate, persist, learn.

use std::sync::Arc;

use at_dispatch::CancelSignal;
use at_types::{AtError, AtResult, DispatchError, ScoreSummary};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::objective::{config_from_params, Objective};
use crate::retry::RetryPolicy;
use crate::search::{ParamSet, SearchStrategy};
use crate::store::{study_identity, StudyStore};
use crate::trial::{ObjectiveDirection, SearchReport, Trial};

fn is_cancellation(err: &AtError) -> bool {
    matches!(
        err,
        AtError::Cancelled(_) | AtError::Dispatch(DispatchError::Cancelled { .. })
    )
}

/// Settings for one invocation of the search loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchLoopConfig {
    pub problem_dimension: u32,
    pub sample_count: u32,
    /// New trials to run in this invocation (completed or failed).
    pub trials: usize,
    pub retry: RetryPolicy,
    /// Abort on the first failed evaluation instead of recording it.
    pub fail_fast: bool,
    pub direction: ObjectiveDirection,
}

impl SearchLoopConfig {
    pub fn new(problem_dimension: u32, sample_count: u32) -> Self {
        Self {
            problem_dimension,
            sample_count,
            trials: 100,
            retry: RetryPolicy::default(),
            fail_fast: false,
            direction: ObjectiveDirection::Minimize,
        }
    }

    pub fn with_trials(mut self, trials: usize) -> Self {
        self.trials = trials;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn identity(&self) -> String {
        study_identity(self.problem_dimension, self.sample_count)
    }
}

/// Callback invoked with every trial right after it is persisted.
pub type TrialObserver = Box<dyn Fn(&Trial) + Send + Sync>;

/// Drives trials strictly one after another against a shared study store.
pub struct SearchLoop<O> {
    store: Arc<dyn StudyStore>,
    objective: O,
    strategy: Box<dyn SearchStrategy>,
    config: SearchLoopConfig,
    cancel: CancelSignal,
    observer: Option<TrialObserver>,
}

impl<O: Objective> SearchLoop<O> {
    pub fn new(
        store: Arc<dyn StudyStore>,
        objective: O,
        strategy: Box<dyn SearchStrategy>,
        config: SearchLoopConfig,
    ) -> Self {
        Self {
            store,
            objective,
            strategy,
            config,
            cancel: CancelSignal::never(),
            observer: None,
        }
    }

    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_trial_observer(mut self, observer: TrialObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    fn persist(&self, identity: &str, trial: &Trial) -> AtResult<()> {
        self.store.append_trial(identity, trial)?;
        if let Some(observer) = &self.observer {
            observer(trial);
        }
        Ok(())
    }

    pub fn config(&self) -> &SearchLoopConfig {
        &self.config
    }

    pub fn objective(&self) -> &O {
        &self.objective
    }

    /// Run `config.trials` new trials, resuming the study if it already has
    /// history. Returns early only when the strategy runs out of proposals.
    pub async fn run(&mut self) -> AtResult<SearchReport> {
        let identity = self.config.identity();
        let study = self.store.create_or_load(&identity, self.config.direction)?;

        if !study.trials.is_empty() {
            info!(
                study = %identity,
                trials = study.trials.len(),
                completed = study.completed().count(),
                "resuming study"
            );
        }
        for trial in study.completed() {
            if let Some(objective) = trial.objective_value {
                self.strategy.report(&trial.params, objective);
            }
        }
        self.strategy.fast_forward(study.trials.len());

        let mut report = SearchReport::new(identity.clone(), study.direction, &study.trials);
        let mut next_index = study.next_index();

        info!(
            study = %identity,
            strategy = self.strategy.name(),
            budget = self.config.trials,
            first_index = next_index,
            "search started"
        );

        for _ in 0..self.config.trials {
            if self.cancel.is_cancelled() {
                return Err(AtError::Cancelled(identity));
            }

            let Some(params) = self.strategy.suggest(1).into_iter().next() else {
                info!(study = %identity, strategy = self.strategy.name(), "search space exhausted");
                break;
            };

            let started_at = Utc::now();
            info!(study = %identity, trial = next_index, params = ?params, "trial started");

            let (outcome, attempts) = self.evaluate_with_retry(&identity, next_index, &params).await;

            match outcome {
                Ok(summary) => {
                    self.strategy.report(&params, summary.mean_log_score);
                    let trial = Trial::completed(next_index, params, summary, attempts, started_at);
                    self.persist(&identity, &trial)?;
                    report.record(&trial);
                    info!(
                        study = %identity,
                        trial = next_index,
                        objective = summary.mean_log_score,
                        attempts,
                        best = report.best_trial.as_ref().and_then(|t| t.objective_value),
                        "trial completed"
                    );
                }
                // The run was interrupted, not the trial; leave no record.
                Err(err) if is_cancellation(&err) => return Err(err),
                Err(err) => {
                    let trial =
                        Trial::failed(next_index, params, err.to_string(), attempts, started_at);
                    self.persist(&identity, &trial)?;
                    report.record(&trial);

                    if self.config.fail_fast || err.is_fatal_for_search() {
                        error!(study = %identity, trial = next_index, error = %err, "aborting search");
                        return Err(err);
                    }
                    warn!(
                        study = %identity,
                        trial = next_index,
                        attempts,
                        error = %err,
                        "trial failed, continuing"
                    );
                }
            }

            next_index += 1;
        }

        report.finish();
        info!(
            study = %identity,
            completed = report.trials_completed,
            failed = report.trials_failed,
            best = report.best_trial.as_ref().and_then(|t| t.objective_value),
            "search finished"
        );
        Ok(report)
    }

    /// Evaluate one proposal, retrying transient failures with backoff.
    /// Returns the outcome and the number of attempts spent.
    async fn evaluate_with_retry(
        &self,
        identity: &str,
        index: usize,
        params: &ParamSet,
    ) -> (AtResult<ScoreSummary>, u32) {
        let config = match config_from_params(
            params,
            self.config.problem_dimension,
            self.config.sample_count,
        ) {
            Ok(config) => config,
            Err(e) => return (Err(e.into()), 0),
        };

        let max_attempts = if self.config.fail_fast {
            1
        } else {
            self.config.retry.attempts()
        };

        let mut attempt = 1;
        loop {
            match self.objective.evaluate(&config).await {
                Ok(summary) => return (Ok(summary), attempt),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let wait = self.config.retry.backoff(attempt);
                    warn!(
                        study = %identity,
                        trial = index,
                        attempt,
                        max_attempts,
                        backoff_secs = wait.as_secs_f64(),
                        error = %err,
                        "evaluation failed, retrying"
                    );
                    if !self.cancel.sleep(wait).await {
                        return (Err(AtError::Cancelled(identity.to_string())), attempt);
                    }
                    attempt += 1;
                }
                Err(err) => return (Err(err), attempt),
            }
        }
    }
}
