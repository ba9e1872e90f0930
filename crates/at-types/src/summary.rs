//! Reduction of a batch of task results into summary statistics.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::AggregationError;
use crate::task::TaskResult;

/// Summary statistics for one batch.
///
/// `mean_log_score` is the mean of `ln(score)`, not `ln(mean_score)`; the
/// search minimizes the former.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub mean_score: f64,
    pub mean_log_score: f64,
    pub mean_run_count: f64,
}

impl fmt::Display for ScoreSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.mean_score, self.mean_log_score, self.mean_run_count
        )
    }
}

/// Summarize a non-empty batch in one pass.
pub fn summarize(results: &[TaskResult]) -> Result<ScoreSummary, AggregationError> {
    if results.is_empty() {
        return Err(AggregationError::EmptyBatch);
    }

    let mut score_sum = 0.0;
    let mut log_sum = 0.0;
    let mut run_sum = 0.0;
    for result in results {
        if !(result.score.is_finite() && result.score > 0.0) {
            return Err(AggregationError::NonPositiveScore {
                seed: result.seed(),
                score: result.score,
            });
        }
        score_sum += result.score;
        log_sum += result.score.ln();
        run_sum += result.run_count as f64;
    }

    let n = results.len() as f64;
    Ok(ScoreSummary {
        mean_score: score_sum / n,
        mean_log_score: log_sum / n,
        mean_run_count: run_sum / n,
    })
}
