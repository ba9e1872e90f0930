//! # at-optimizer
//!
//! Outer parameter search for the remote annealing solver.
//!
//! Provides the searched solver knobs, search strategies (grid, random,
//! Bayesian), trial bookkeeping, retry with backoff, a persistent study store
//! (in memory or `SQLite`), and the export of best trials as solver parameter
//! tables.

mod export;
mod objective;
mod retry;
mod runner;
mod search;
pub mod store;
mod trial;

pub use export::{render_best_table, render_mc_params};
pub use objective::{
    config_from_params, solver_search_space, Objective, CUT_OFF, ERASE_SHARED_PROBABILITY,
    ERASE_SMALL_THRESHOLD, MAX_TEMPERATURE, MC_RUN,
};
pub use retry::RetryPolicy;
pub use runner::{SearchLoop, SearchLoopConfig, TrialObserver};
pub use search::{
    BayesianSearch, GridSearch, ParamSet, ParameterDef, ParameterKind, ParameterValue,
    RandomSearch, SearchSpace, SearchStrategy, StrategyConfig, StrategyKind,
};
pub use store::{
    study_identity, MemoryStudyStore, SqliteStudyStore, Study, StudyStore, DEFAULT_STORE_PATH,
};
pub use trial::{best_trial, ObjectiveDirection, SearchReport, Trial, TrialStatus};
