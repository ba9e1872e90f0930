//! The searched solver knobs and the objective that scores them.

use std::sync::Arc;

use async_trait::async_trait;
use at_dispatch::{ScoreEvaluator, WorkflowEngine};
use at_types::{AtResult, ConfigError, MinTemperature, ScoreSummary, SolverConfig};

use crate::search::{ParamSet, ParameterValue, SearchSpace};

pub const MC_RUN: &str = "mc_run";
pub const MAX_TEMPERATURE: &str = "max_temperature";
pub const ERASE_SMALL_THRESHOLD: &str = "erase_small_th";
pub const ERASE_SHARED_PROBABILITY: &str = "erase_shared_p";
pub const CUT_OFF: &str = "cut_off";

/// Ranges explored by the parameter search. `min_temperature` is pinned.
pub fn solver_search_space() -> SearchSpace {
    SearchSpace::new()
        .add_int(MC_RUN, 1, 100)
        .add_log_uniform(MAX_TEMPERATURE, 1e-3, 200.0)
        .add_int(ERASE_SMALL_THRESHOLD, 0, 60)
        .add_float(ERASE_SHARED_PROBABILITY, 0.0, 1.0)
        .add_float(CUT_OFF, 0.5, 10.0)
}

fn int_param(params: &ParamSet, name: &str) -> Result<i64, ConfigError> {
    match params.get(name) {
        Some(ParameterValue::Int(v)) => Ok(*v),
        Some(ParameterValue::Float(v)) => Err(ConfigError::invalid(
            name,
            format!("expected an integer, got {v}"),
        )),
        None => Err(ConfigError::MissingField {
            field: name.to_string(),
        }),
    }
}

fn float_param(params: &ParamSet, name: &str) -> Result<f64, ConfigError> {
    params
        .get(name)
        .map(ParameterValue::as_f64)
        .ok_or_else(|| ConfigError::MissingField {
            field: name.to_string(),
        })
}

/// Turn one proposal into a full batch configuration for `(d, n)`.
pub fn config_from_params(
    params: &ParamSet,
    problem_dimension: u32,
    sample_count: u32,
) -> Result<SolverConfig, ConfigError> {
    let mc_run = u64::try_from(int_param(params, MC_RUN)?)
        .map_err(|_| ConfigError::invalid(MC_RUN, "must not be negative"))?;
    let erase_small = u32::try_from(int_param(params, ERASE_SMALL_THRESHOLD)?)
        .map_err(|_| ConfigError::invalid(ERASE_SMALL_THRESHOLD, "out of range"))?;

    SolverConfig::builder(problem_dimension, sample_count)
        .mc_run(mc_run)
        .max_temperature(float_param(params, MAX_TEMPERATURE)?)
        .min_temperature(MinTemperature::Search)
        .erase_small_threshold(erase_small)
        .erase_shared_probability(Some(float_param(params, ERASE_SHARED_PROBABILITY)?))
        .cut_off(float_param(params, CUT_OFF)?)
        .build()
}

/// Something that turns a configuration into batch statistics.
#[async_trait]
pub trait Objective: Send + Sync {
    async fn evaluate(&self, config: &SolverConfig) -> AtResult<ScoreSummary>;
}

#[async_trait]
impl<T: Objective + ?Sized> Objective for Arc<T> {
    async fn evaluate(&self, config: &SolverConfig) -> AtResult<ScoreSummary> {
        (**self).evaluate(config).await
    }
}

#[async_trait]
impl<E: WorkflowEngine> Objective for ScoreEvaluator<E> {
    async fn evaluate(&self, config: &SolverConfig) -> AtResult<ScoreSummary> {
        ScoreEvaluator::evaluate(self, config).await
    }
}
