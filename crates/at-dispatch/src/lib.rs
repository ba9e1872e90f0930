//! # at-dispatch
//!
//! Client-side driver for remote solver batches: expands a configuration
//! into seeded tasks, submits them as one execution, polls the execution to a
//! terminal status, and hands the decoded results to the aggregator.

mod cancel;
mod dump;
mod evaluate;
mod executor;
pub mod http;
pub mod simulated;
mod workflow;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use dump::ResultDump;
pub use evaluate::ScoreEvaluator;
pub use executor::{BatchExecutor, CompletedBatch, PollConfig};
pub use http::HttpWorkflowEngine;
pub use simulated::{synthetic_solver, ScriptedRun, SimulatedEngine, SolverFn};
pub use workflow::{ExecutionDescription, WorkflowEngine};
