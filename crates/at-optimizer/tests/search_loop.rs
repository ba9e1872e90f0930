use std::sync::Arc;
use std::time::Duration;

use at_dispatch::{BatchExecutor, ScoreEvaluator, ScriptedRun, SimulatedEngine};
use at_optimizer::{
    solver_search_space, MemoryStudyStore, ObjectiveDirection, RandomSearch, RetryPolicy,
    SearchLoop, SearchLoopConfig, SqliteStudyStore, StudyStore, TrialStatus,
};
use at_types::{AtError, DispatchError, ExecutionStatus, StoreError};
use tempfile::tempdir;

fn evaluator(engine: &Arc<SimulatedEngine>) -> ScoreEvaluator<Arc<SimulatedEngine>> {
    ScoreEvaluator::new(BatchExecutor::new(Arc::clone(engine)))
}

fn random(seed: u64) -> Box<RandomSearch> {
    Box::new(RandomSearch::with_seed(solver_search_space(), Some(seed)))
}

fn short_retry() -> RetryPolicy {
    RetryPolicy::default()
        .with_initial_backoff(Duration::from_secs(2))
        .with_max_backoff(Duration::from_secs(8))
}

#[tokio::test(start_paused = true)]
async fn single_trial_on_empty_study_is_persisted() {
    let dir = tempdir().unwrap();
    let store: Arc<dyn StudyStore> =
        Arc::new(SqliteStudyStore::open(dir.path().join("opt.db")).unwrap());
    let engine = Arc::new(SimulatedEngine::with_defaults());

    let mut search = SearchLoop::new(
        Arc::clone(&store),
        evaluator(&engine),
        random(1),
        SearchLoopConfig::new(6, 8).with_trials(1),
    );
    let report = search.run().await.unwrap();

    let trials = store.trials("6_8").unwrap();
    assert_eq!(trials.len(), 1);
    let trial = &trials[0];
    assert_eq!(trial.trial_index, 0);
    assert_eq!(trial.status, TrialStatus::Completed);
    let summary = trial.summary.unwrap();
    assert_eq!(trial.objective_value, Some(summary.mean_log_score));
    assert_eq!(report.best_trial.unwrap().trial_index, 0);
    assert_eq!(engine.execution_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn rerun_resumes_after_existing_trials() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("opt.db");
    let engine = Arc::new(SimulatedEngine::with_defaults());

    {
        let store: Arc<dyn StudyStore> = Arc::new(SqliteStudyStore::open(&path).unwrap());
        let mut first = SearchLoop::new(
            store,
            evaluator(&engine),
            random(3),
            SearchLoopConfig::new(5, 4).with_trials(3),
        );
        first.run().await.unwrap();
    }

    let store: Arc<dyn StudyStore> = Arc::new(SqliteStudyStore::open(&path).unwrap());
    let mut second = SearchLoop::new(
        Arc::clone(&store),
        evaluator(&engine),
        random(3),
        SearchLoopConfig::new(5, 4).with_trials(2),
    );
    let report = second.run().await.unwrap();

    assert_eq!(report.resumed_trials, 3);
    assert_eq!(report.trials_run(), 2);
    let trials = store.trials("5_4").unwrap();
    let indices: Vec<_> = trials.iter().map(|t| t.trial_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    assert_eq!(engine.execution_count(), 5);

    // Same seed on both runs: the resumed run must extend the history.
    for (i, earlier) in trials[..3].iter().enumerate() {
        for later in &trials[3..] {
            assert_ne!(earlier.params, later.params, "trial {i} proposed again");
        }
    }
}

#[tokio::test(start_paused = true)]
async fn failed_submission_is_retried_then_succeeds() {
    let dir = tempdir().unwrap();
    let store: Arc<dyn StudyStore> =
        Arc::new(SqliteStudyStore::open(dir.path().join("opt.db")).unwrap());
    let engine = Arc::new(SimulatedEngine::with_defaults());
    engine.fail_next_starts(2);

    let mut search = SearchLoop::new(
        Arc::clone(&store),
        evaluator(&engine),
        random(5),
        SearchLoopConfig::new(5, 4)
            .with_trials(1)
            .with_retry(short_retry()),
    );
    let report = search.run().await.unwrap();

    assert_eq!(report.trials_completed, 1);
    let trial = &store.trials("5_4").unwrap()[0];
    assert_eq!(trial.status, TrialStatus::Completed);
    assert_eq!(trial.attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_leave_a_failed_trial_and_the_search_continues() {
    let dir = tempdir().unwrap();
    let store: Arc<dyn StudyStore> =
        Arc::new(SqliteStudyStore::open(dir.path().join("opt.db")).unwrap());
    let engine = Arc::new(SimulatedEngine::with_defaults());
    for _ in 0..3 {
        engine.push_script(ScriptedRun::new([
            ExecutionStatus::Running,
            ExecutionStatus::Failed,
        ]));
    }

    let mut search = SearchLoop::new(
        Arc::clone(&store),
        evaluator(&engine),
        random(6),
        SearchLoopConfig::new(5, 4)
            .with_trials(2)
            .with_retry(short_retry()),
    );
    let report = search.run().await.unwrap();

    assert_eq!(report.trials_failed, 1);
    assert_eq!(report.trials_completed, 1);

    let trials = store.trials("5_4").unwrap();
    assert_eq!(trials[0].status, TrialStatus::Failed);
    assert_eq!(trials[0].attempts, 3);
    assert!(trials[0].objective_value.is_none());
    assert!(trials[0].error.as_deref().unwrap().contains("FAILED"));
    assert_eq!(trials[1].status, TrialStatus::Completed);
    assert_eq!(store.best_trial("5_4").unwrap().unwrap().trial_index, 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_engine_status_stops_the_search() {
    let store: Arc<dyn StudyStore> = Arc::new(MemoryStudyStore::new());
    let engine = Arc::new(SimulatedEngine::with_defaults());
    engine.push_script(ScriptedRun::new([
        ExecutionStatus::Running,
        ExecutionStatus::parse("PENDING_REDRIVE"),
    ]));

    let mut search = SearchLoop::new(
        Arc::clone(&store),
        evaluator(&engine),
        random(10),
        SearchLoopConfig::new(5, 4).with_trials(3),
    );
    let err = search.run().await.unwrap_err();

    assert!(matches!(
        err,
        AtError::Dispatch(DispatchError::UnexpectedStatus { ref status }) if status == "PENDING_REDRIVE"
    ));
    assert_eq!(engine.execution_count(), 1);
    let trials = store.trials("5_4").unwrap();
    assert_eq!(trials.len(), 1);
    assert_eq!(trials[0].status, TrialStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn fail_fast_aborts_on_first_failure() {
    let store: Arc<dyn StudyStore> = Arc::new(SqliteStudyStore::in_memory().unwrap());
    let engine = Arc::new(SimulatedEngine::with_defaults());
    engine.push_script(ScriptedRun::new([ExecutionStatus::TimedOut]));

    let mut search = SearchLoop::new(
        Arc::clone(&store),
        evaluator(&engine),
        random(7),
        SearchLoopConfig::new(5, 4)
            .with_trials(10)
            .with_fail_fast(true),
    );
    let err = search.run().await.unwrap_err();

    assert!(matches!(err, AtError::Dispatch(_)));
    assert_eq!(engine.execution_count(), 1);
    assert_eq!(store.trials("5_4").unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_writer_is_detected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("opt.db");
    let ours: Arc<dyn StudyStore> = Arc::new(SqliteStudyStore::open(&path).unwrap());
    let theirs = SqliteStudyStore::open(&path).unwrap();
    let engine = Arc::new(SimulatedEngine::with_defaults());

    theirs
        .create_or_load("5_4", ObjectiveDirection::Minimize)
        .unwrap();
    let mut other = SearchLoop::new(
        Arc::new(theirs) as Arc<dyn StudyStore>,
        evaluator(&engine),
        random(8),
        SearchLoopConfig::new(5, 4).with_trials(1),
    );

    let mut search = SearchLoop::new(
        Arc::clone(&ours),
        evaluator(&engine),
        random(9),
        SearchLoopConfig::new(5, 4).with_trials(1),
    );

    // The other loop submits first and appends trial 0 while ours, which
    // already loaded the empty study, is still polling.
    let (ours_result, ()) = tokio::join!(
        async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            search.run().await
        },
        async {
            other.run().await.unwrap();
        }
    );

    match ours_result {
        Err(AtError::Store(StoreError::Conflict {
            expected, actual, ..
        })) => {
            assert_eq!(expected, 0);
            assert_eq!(actual, 1);
        }
        unexpected => panic!("expected a conflict, got {unexpected:?}"),
    }
    assert_eq!(ours.trials("5_4").unwrap().len(), 1);
}
