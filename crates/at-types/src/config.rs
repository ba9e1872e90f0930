//! Solver configuration: one fully specified batch evaluation.

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Default minimum temperature for one-shot evaluations.
pub const ONE_SHOT_MIN_TEMPERATURE: f64 = 1e-4;

/// Minimum temperature pinned by the parameter search.
pub const SEARCH_MIN_TEMPERATURE: f64 = 1e-8;

/// How the annealing floor temperature is chosen.
///
/// One-shot evaluations let the operator tune it; the parameter search pins it
/// and never explores it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinTemperature {
    OneShot(f64),
    Search,
}

impl MinTemperature {
    pub fn value(&self) -> f64 {
        match self {
            Self::OneShot(value) => *value,
            Self::Search => SEARCH_MIN_TEMPERATURE,
        }
    }
}

impl Default for MinTemperature {
    fn default() -> Self {
        Self::OneShot(ONE_SHOT_MIN_TEMPERATURE)
    }
}

/// Problem size plus solver tuning knobs. Fully determines a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SolverConfig {
    pub problem_dimension: u32,
    /// Number of seeded runs per batch (N).
    pub sample_count: u32,
    pub mc_run: u64,
    pub max_temperature: f64,
    pub min_temperature: f64,
    pub erase_small_threshold: u32,
    pub cut_off: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub erase_shared_probability: Option<f64>,
}

impl SolverConfig {
    pub fn builder(problem_dimension: u32, sample_count: u32) -> SolverConfigBuilder {
        SolverConfigBuilder::new(problem_dimension, sample_count)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.problem_dimension == 0 {
            return Err(ConfigError::invalid("problem_dimension", "must be at least 1"));
        }
        if self.sample_count == 0 {
            return Err(ConfigError::invalid("sample_count", "must be at least 1"));
        }
        if self.mc_run == 0 {
            return Err(ConfigError::invalid("mc_run", "must be at least 1"));
        }
        if !(self.max_temperature.is_finite() && self.max_temperature > 0.0) {
            return Err(ConfigError::invalid(
                "max_temperature",
                format!("must be finite and positive, got {}", self.max_temperature),
            ));
        }
        if !(self.min_temperature.is_finite() && self.min_temperature >= 0.0) {
            return Err(ConfigError::invalid(
                "min_temperature",
                format!("must be finite and non-negative, got {}", self.min_temperature),
            ));
        }
        if self.min_temperature > self.max_temperature {
            return Err(ConfigError::invalid(
                "min_temperature",
                format!(
                    "{} exceeds max_temperature {}",
                    self.min_temperature, self.max_temperature
                ),
            ));
        }
        if !(self.cut_off.is_finite() && self.cut_off > 0.0) {
            return Err(ConfigError::invalid(
                "cut_off",
                format!("must be finite and positive, got {}", self.cut_off),
            ));
        }
        if let Some(p) = self.erase_shared_probability {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::invalid(
                    "erase_shared_probability",
                    format!("must lie in [0, 1], got {p}"),
                ));
            }
        }
        Ok(())
    }
}

/// Builder that validates on [`build`](SolverConfigBuilder::build).
#[derive(Debug, Clone)]
pub struct SolverConfigBuilder {
    config: SolverConfig,
}

impl SolverConfigBuilder {
    pub fn new(problem_dimension: u32, sample_count: u32) -> Self {
        Self {
            config: SolverConfig {
                problem_dimension,
                sample_count,
                mc_run: 1,
                max_temperature: 20.0,
                min_temperature: ONE_SHOT_MIN_TEMPERATURE,
                erase_small_threshold: 2,
                cut_off: 3.0,
                erase_shared_probability: None,
            },
        }
    }

    pub fn mc_run(mut self, mc_run: u64) -> Self {
        self.config.mc_run = mc_run;
        self
    }

    pub fn max_temperature(mut self, t: f64) -> Self {
        self.config.max_temperature = t;
        self
    }

    pub fn min_temperature(mut self, mode: MinTemperature) -> Self {
        self.config.min_temperature = mode.value();
        self
    }

    pub fn erase_small_threshold(mut self, threshold: u32) -> Self {
        self.config.erase_small_threshold = threshold;
        self
    }

    pub fn cut_off(mut self, cut_off: f64) -> Self {
        self.config.cut_off = cut_off;
        self
    }

    pub fn erase_shared_probability(mut self, p: Option<f64>) -> Self {
        self.config.erase_shared_probability = p;
        self
    }

    pub fn build(self) -> Result<SolverConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
