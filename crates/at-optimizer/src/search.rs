//! Search space definitions and parameter sweep strategies.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::trial::ObjectiveDirection;

/// One concrete assignment of every searched parameter, keyed by name.
pub type ParamSet = BTreeMap<String, ParameterValue>;

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter name as the solver knows it (e.g. "mc_run").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
}

/// A concrete parameter value produced by a search strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
}

impl ParameterValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Int(v) => *v as f64,
            Self::Float(v) => *v,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(_) => None,
        }
    }

    /// Rendering that is also a valid Rust literal (floats keep their point).
    pub fn to_rust_literal(&self) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Float(v) => format!("{v:?}"),
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
        }
    }
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::FloatRange { low, high },
        });
        self
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::IntRange { low, high },
        });
        self
    }

    pub fn add_log_uniform(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::LogUniform { low, high },
        });
        self
    }

    /// Total number of grid points when every continuous dimension is cut
    /// into `float_steps` points. `None` on overflow.
    pub fn grid_size(&self, float_steps: usize) -> Option<usize> {
        let mut total: usize = 1;
        for param in &self.parameters {
            total = total.checked_mul(grid_axis(&param.kind, float_steps).len())?;
        }
        Some(total)
    }

    /// Whether `params` names exactly this space's parameters, each within bounds.
    pub fn contains(&self, params: &ParamSet) -> bool {
        params.len() == self.parameters.len()
            && self.parameters.iter().all(|def| {
                params.get(&def.name).is_some_and(|value| match (&def.kind, value) {
                    (ParameterKind::IntRange { low, high }, ParameterValue::Int(v)) => {
                        (*low..=*high).contains(v)
                    }
                    (
                        ParameterKind::FloatRange { low, high }
                        | ParameterKind::LogUniform { low, high },
                        ParameterValue::Float(v),
                    ) => (*low..=*high).contains(v),
                    _ => false,
                })
            })
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

fn seeded_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_rng(&mut rand::rng()),
    }
}

fn sample_value<R: Rng>(rng: &mut R, kind: &ParameterKind) -> ParameterValue {
    match kind {
        ParameterKind::FloatRange { low, high } => {
            ParameterValue::Float(rng.random_range(*low..=*high))
        }
        ParameterKind::IntRange { low, high } => ParameterValue::Int(rng.random_range(*low..=*high)),
        ParameterKind::LogUniform { low, high } => {
            let log_val: f64 = rng.random_range(low.ln()..=high.ln());
            ParameterValue::Float(log_val.exp().clamp(*low, *high))
        }
    }
}

fn sample_space<R: Rng>(rng: &mut R, space: &SearchSpace) -> ParamSet {
    space
        .parameters
        .iter()
        .map(|param| (param.name.clone(), sample_value(rng, &param.kind)))
        .collect()
}

fn grid_axis(kind: &ParameterKind, float_steps: usize) -> Vec<ParameterValue> {
    let steps = float_steps.max(2);
    match kind {
        ParameterKind::FloatRange { low, high } => (0..steps)
            .map(|i| match i {
                0 => ParameterValue::Float(*low),
                i if i == steps - 1 => ParameterValue::Float(*high),
                i => {
                    let t = i as f64 / (steps - 1) as f64;
                    ParameterValue::Float(low + t * (high - low))
                }
            })
            .collect(),
        ParameterKind::IntRange { low, high } => (*low..=*high).map(ParameterValue::Int).collect(),
        ParameterKind::LogUniform { low, high } => {
            let log_low = low.ln();
            let log_high = high.ln();
            (0..steps)
                .map(|i| match i {
                    0 => ParameterValue::Float(*low),
                    i if i == steps - 1 => ParameterValue::Float(*high),
                    i => {
                        let t = i as f64 / (steps - 1) as f64;
                        ParameterValue::Float((log_low + t * (log_high - log_low)).exp())
                    }
                })
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// Common trait for all search strategies.
pub trait SearchStrategy: Send + Sync {
    /// Generate the next batch of parameter combinations to evaluate.
    /// Fewer than `count` (possibly none) means the strategy is exhausted.
    fn suggest(&mut self, count: usize) -> Vec<ParamSet>;

    /// Report completed trial results so adaptive strategies can learn.
    fn report(&mut self, _params: &ParamSet, _objective: f64) {}

    /// Account for trials an earlier run of the same study already evaluated.
    fn fast_forward(&mut self, _evaluated: usize) {}

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

// ---- Grid search ----

/// Exhaustive grid search, walked lazily in mixed-radix order.
#[derive(Debug, Clone)]
pub struct GridSearch {
    names: Vec<String>,
    axes: Vec<Vec<ParameterValue>>,
    total: usize,
    cursor: usize,
}

impl GridSearch {
    pub fn new(space: SearchSpace, float_steps: usize) -> Self {
        let total = space.grid_size(float_steps).unwrap_or(usize::MAX);
        let (names, axes): (Vec<String>, Vec<Vec<ParameterValue>>) = space
            .parameters
            .iter()
            .map(|param| (param.name.clone(), grid_axis(&param.kind, float_steps)))
            .unzip();
        Self {
            names,
            axes,
            total,
            cursor: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Skip combinations already evaluated in an earlier run.
    pub fn skip(&mut self, count: usize) {
        self.cursor = self.cursor.saturating_add(count).min(self.total);
    }

    fn combo(&self, mut index: usize) -> ParamSet {
        let mut params = ParamSet::new();
        // Last axis varies fastest.
        for (name, axis) in self.names.iter().zip(&self.axes).rev() {
            params.insert(name.clone(), axis[index % axis.len()]);
            index /= axis.len();
        }
        params
    }
}

impl SearchStrategy for GridSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParamSet> {
        let end = self.cursor.saturating_add(count).min(self.total);
        let batch = (self.cursor..end).map(|i| self.combo(i)).collect();
        self.cursor = end;
        batch
    }

    fn fast_forward(&mut self, evaluated: usize) {
        self.skip(evaluated);
    }

    fn name(&self) -> &str {
        "grid"
    }
}

// ---- Random search ----

/// Independent random sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: ChaCha8Rng,
}

impl RandomSearch {
    pub fn new(space: SearchSpace) -> Self {
        Self::with_seed(space, None)
    }

    pub fn with_seed(space: SearchSpace, seed: Option<u64>) -> Self {
        Self {
            space,
            rng: seeded_rng(seed),
        }
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParamSet> {
        (0..count)
            .map(|_| sample_space(&mut self.rng, &self.space))
            .collect()
    }

    /// Draw and discard one sample per earlier trial, so a resumed run with
    /// the same seed continues the sequence instead of replaying it.
    fn fast_forward(&mut self, evaluated: usize) {
        for _ in 0..evaluated {
            sample_space(&mut self.rng, &self.space);
        }
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Bayesian search (surrogate-model heuristic) ----

/// Explore/exploit search over observed results.
///
/// Tracks observed (params, objective) pairs. With probability
/// `exploration_weight` (and always before the first observation) it samples
/// uniformly; otherwise it perturbs the best observation so far.
#[derive(Debug, Clone)]
pub struct BayesianSearch {
    space: SearchSpace,
    observations: Vec<(ParamSet, f64)>,
    exploration_weight: f64,
    direction: ObjectiveDirection,
    rng: ChaCha8Rng,
}

impl BayesianSearch {
    pub fn new(space: SearchSpace, exploration_weight: f64) -> Self {
        Self {
            space,
            observations: Vec::new(),
            exploration_weight,
            direction: ObjectiveDirection::default(),
            rng: seeded_rng(None),
        }
    }

    pub fn with_direction(mut self, direction: ObjectiveDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.rng = seeded_rng(seed);
        self
    }

    pub fn observations(&self) -> usize {
        self.observations.len()
    }

    fn best(&self) -> Option<&ParamSet> {
        let direction = self.direction;
        self.observations
            .iter()
            .filter(|(_, objective)| objective.is_finite())
            .reduce(|best, candidate| {
                if direction.is_better(candidate.1, best.1) {
                    candidate
                } else {
                    best
                }
            })
            .map(|(params, _)| params)
    }

    /// Exploitation: perturb the best-known point.
    fn exploit(&mut self, base: &ParamSet) -> ParamSet {
        let mut perturbed = ParamSet::new();

        for param in &self.space.parameters {
            let value = match (&param.kind, base.get(&param.name)) {
                (ParameterKind::FloatRange { low, high }, Some(ParameterValue::Float(v))) => {
                    let noise = self.rng.random_range(-0.1..0.1) * (high - low);
                    ParameterValue::Float((v + noise).clamp(*low, *high))
                }
                (ParameterKind::IntRange { low, high }, Some(ParameterValue::Int(v))) => {
                    let delta: i64 = self.rng.random_range(-2..=2);
                    ParameterValue::Int((v + delta).clamp(*low, *high))
                }
                (ParameterKind::LogUniform { low, high }, Some(ParameterValue::Float(v))) => {
                    let log_range = high.ln() - low.ln();
                    let noise = self.rng.random_range(-0.1..0.1) * log_range;
                    ParameterValue::Float((v.ln() + noise).exp().clamp(*low, *high))
                }
                // Missing or mistyped base value: fall back to a fresh sample.
                (kind, _) => sample_value(&mut self.rng, kind),
            };
            perturbed.insert(param.name.clone(), value);
        }

        perturbed
    }
}

impl SearchStrategy for BayesianSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParamSet> {
        (0..count)
            .map(|_| {
                let explore = self.rng.random::<f64>() < self.exploration_weight;
                match self.best().cloned() {
                    Some(base) if !explore => self.exploit(&base),
                    _ => sample_space(&mut self.rng, &self.space),
                }
            })
            .collect()
    }

    fn report(&mut self, params: &ParamSet, objective: f64) {
        self.observations.push((params.clone(), objective));
    }

    /// Advance the sampler past earlier trials; observations are replayed
    /// separately through [`SearchStrategy::report`].
    fn fast_forward(&mut self, evaluated: usize) {
        for _ in 0..evaluated {
            self.rng.random::<f64>();
            sample_space(&mut self.rng, &self.space);
        }
    }

    fn name(&self) -> &str {
        "bayesian"
    }
}

// ---- Strategy selection ----

/// Which search strategy drives a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Grid,
    Random,
    Bayesian,
}

impl StrategyKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "grid" => Some(Self::Grid),
            "random" => Some(Self::Random),
            "bayesian" => Some(Self::Bayesian),
            _ => None,
        }
    }
}

/// Strategy choice plus the knobs each strategy reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub kind: StrategyKind,
    /// Seed for random and bayesian sampling; `None` draws from the OS.
    pub seed: Option<u64>,
    /// Points per continuous dimension for grid search.
    pub grid_steps: usize,
    /// Exploration weight for bayesian search (ignored otherwise).
    pub exploration_weight: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            kind: StrategyKind::Bayesian,
            seed: None,
            grid_steps: 5,
            exploration_weight: 0.3,
        }
    }
}

impl StrategyConfig {
    pub fn new(kind: StrategyKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_grid_steps(mut self, steps: usize) -> Self {
        self.grid_steps = steps;
        self
    }

    pub fn with_exploration_weight(mut self, weight: f64) -> Self {
        self.exploration_weight = weight;
        self
    }

    pub fn build(
        &self,
        space: SearchSpace,
        direction: ObjectiveDirection,
    ) -> Box<dyn SearchStrategy> {
        match self.kind {
            StrategyKind::Grid => Box::new(GridSearch::new(space, self.grid_steps)),
            StrategyKind::Random => Box::new(RandomSearch::with_seed(space, self.seed)),
            StrategyKind::Bayesian => Box::new(
                BayesianSearch::new(space, self.exploration_weight)
                    .with_direction(direction)
                    .with_seed(self.seed),
            ),
        }
    }
}
