//! One-shot evaluation: configuration in, summary statistics out.

use at_types::{build_tasks, summarize, AtResult, ScoreSummary, SolverConfig};
use chrono::Utc;
use tracing::{info, warn};

use crate::dump::ResultDump;
use crate::executor::BatchExecutor;
use crate::workflow::WorkflowEngine;

/// Request builder, batch executor, result dump, and aggregator chained
/// together.
#[derive(Debug)]
pub struct ScoreEvaluator<E> {
    executor: BatchExecutor<E>,
    dump: Option<ResultDump>,
}

impl<E: WorkflowEngine> ScoreEvaluator<E> {
    pub fn new(executor: BatchExecutor<E>) -> Self {
        Self {
            executor,
            dump: None,
        }
    }

    pub fn with_dump(mut self, dump: Option<ResultDump>) -> Self {
        self.dump = dump;
        self
    }

    pub fn executor(&self) -> &BatchExecutor<E> {
        &self.executor
    }

    pub async fn evaluate(&self, config: &SolverConfig) -> AtResult<ScoreSummary> {
        config.validate()?;
        let tasks = build_tasks(config);
        let batch = self.executor.submit_and_wait(&tasks).await?;

        if let Some(dump) = &self.dump {
            let finished_at = batch.handle.finished_at.unwrap_or_else(Utc::now);
            // Raw dumps are for humans; losing one must not sink the batch.
            if let Err(e) = dump.write(&batch.handle.execution_id, finished_at, &batch.results) {
                warn!(execution_id = %batch.handle.execution_id, error = %e, "failed to dump raw results");
            }
        }

        let summary = summarize(&batch.results)?;
        info!(
            execution_id = %batch.handle.execution_id,
            d = config.problem_dimension,
            n = config.sample_count,
            mean_score = summary.mean_score,
            mean_log_score = summary.mean_log_score,
            mean_run_count = summary.mean_run_count,
            "batch summarized"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{ScriptedRun, SimulatedEngine};
    use at_types::{AggregationError, AtError, ExecutionStatus, TaskResult};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test(start_paused = true)]
    async fn evaluation_dumps_and_summarizes() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(SimulatedEngine::with_defaults());
        let evaluator = ScoreEvaluator::new(BatchExecutor::new(Arc::clone(&engine)))
            .with_dump(Some(ResultDump::new(dir.path())));

        let config = SolverConfig::builder(6, 4).mc_run(9).build().unwrap();
        let summary = evaluator.evaluate(&config).await.unwrap();
        assert!(summary.mean_score > 0.0);
        assert_eq!(summary.mean_run_count, (1000 / 9) as f64);

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_config_never_reaches_the_engine() {
        let engine = Arc::new(SimulatedEngine::with_defaults());
        let evaluator = ScoreEvaluator::new(BatchExecutor::new(Arc::clone(&engine)));

        let mut config = SolverConfig::builder(6, 4).build().unwrap();
        config.sample_count = 0;
        let err = evaluator.evaluate(&config).await.unwrap_err();
        assert!(matches!(err, AtError::Config(_)));
        assert_eq!(engine.execution_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn non_positive_score_is_a_precondition_failure() {
        let engine = Arc::new(SimulatedEngine::with_defaults());
        let config = SolverConfig::builder(6, 1).build().unwrap();
        let bad = vec![TaskResult {
            request: build_tasks(&config).remove(0),
            score: 0.0,
            run_count: 1,
        }];
        engine.push_script(
            ScriptedRun::new([ExecutionStatus::Succeeded])
                .with_output(serde_json::to_string(&bad).unwrap()),
        );

        let evaluator = ScoreEvaluator::new(BatchExecutor::new(Arc::clone(&engine)));
        let err = evaluator.evaluate(&config).await.unwrap_err();
        assert!(matches!(
            err,
            AtError::AggregationPrecondition(AggregationError::NonPositiveScore { seed: 1, .. })
        ));
    }
}
