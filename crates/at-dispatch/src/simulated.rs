//! In-process (simulated) workflow engine for sandbox runs.
//!
//! Evaluates every task of a batch locally with a supplied solver function and
//! walks each execution through a scripted status sequence. Useful for wiring
//! checks, integration tests, and rehearsing a search before paying for remote
//! workers.

use async_trait::async_trait;
use at_types::{DispatchError, DispatchResult, ExecutionStatus, TaskDescriptor, TaskResult};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::workflow::{ExecutionDescription, WorkflowEngine};

/// Solver stand-in: maps one task to its result.
pub type SolverFn = Arc<dyn Fn(&TaskDescriptor) -> TaskResult + Send + Sync>;

/// Status sequence one execution reports on successive describes.
///
/// The last status sticks once the sequence is exhausted.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedRun {
    pub statuses: Vec<ExecutionStatus>,
    /// Replaces the solver output when the run succeeds.
    pub output: Option<String>,
}

impl ScriptedRun {
    pub fn new(statuses: impl IntoIterator<Item = ExecutionStatus>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
            output: None,
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }
}

impl Default for ScriptedRun {
    fn default() -> Self {
        Self::new([ExecutionStatus::Running, ExecutionStatus::Succeeded])
    }
}

#[derive(Debug)]
struct SimExecution {
    name: String,
    tasks: Vec<TaskDescriptor>,
    pending: VecDeque<ExecutionStatus>,
    current: ExecutionStatus,
    output: Option<String>,
}

/// A workflow engine that runs entirely inside the current process.
pub struct SimulatedEngine {
    solver: SolverFn,
    scripts: Mutex<VecDeque<ScriptedRun>>,
    executions: Mutex<HashMap<String, SimExecution>>,
    start_failures: AtomicUsize,
    describe_calls: AtomicUsize,
}

impl SimulatedEngine {
    pub fn new(solver: SolverFn) -> Self {
        Self {
            solver,
            scripts: Mutex::new(VecDeque::new()),
            executions: Mutex::new(HashMap::new()),
            start_failures: AtomicUsize::new(0),
            describe_calls: AtomicUsize::new(0),
        }
    }

    /// Engine backed by [`synthetic_solver`].
    pub fn with_defaults() -> Self {
        Self::new(synthetic_solver())
    }

    /// Queue a status script for the next started execution.
    pub fn push_script(&self, run: ScriptedRun) {
        self.scripts.lock().push_back(run);
    }

    /// Make the next `count` calls to `start` fail with `SubmissionFailed`.
    pub fn fail_next_starts(&self, count: usize) {
        self.start_failures.store(count, Ordering::SeqCst);
    }

    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    pub fn execution_count(&self) -> usize {
        self.executions.lock().len()
    }

    /// Tasks received by an execution, as decoded from its payload.
    pub fn tasks_of(&self, execution_id: &str) -> Option<Vec<TaskDescriptor>> {
        self.executions
            .lock()
            .get(execution_id)
            .map(|exec| exec.tasks.clone())
    }

    fn record(exec: &SimExecution, execution_id: &str) -> serde_json::Value {
        let mut raw = serde_json::json!({
            "execution_id": execution_id,
            "name": exec.name,
            "status": exec.current.as_str(),
        });
        match &exec.current {
            ExecutionStatus::Succeeded => {
                raw["output"] = serde_json::Value::String(exec.output.clone().unwrap_or_default());
            }
            ExecutionStatus::Failed | ExecutionStatus::TimedOut | ExecutionStatus::Aborted => {
                raw["error"] = serde_json::Value::String("States.TaskFailed".to_string());
                raw["cause"] = serde_json::Value::String(format!(
                    "simulated execution {} ended as {}",
                    exec.name, exec.current
                ));
            }
            _ => {}
        }
        raw
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for SimulatedEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedEngine")
            .field("executions", &self.execution_count())
            .field("describe_calls", &self.describe_calls())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl WorkflowEngine for SimulatedEngine {
    async fn start(&self, name: &str, payload: String) -> DispatchResult<String> {
        let remaining = self.start_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.start_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(DispatchError::SubmissionFailed {
                name: name.to_string(),
                message: "simulated transport failure".to_string(),
            });
        }

        let tasks: Vec<TaskDescriptor> =
            serde_json::from_str(&payload).map_err(|e| DispatchError::SubmissionFailed {
                name: name.to_string(),
                message: format!("payload rejected: {e}"),
            })?;

        let execution_id = format!("sim:{name}");
        let mut executions = self.executions.lock();
        if executions.contains_key(&execution_id) {
            return Err(DispatchError::SubmissionFailed {
                name: name.to_string(),
                message: "execution already exists".to_string(),
            });
        }

        let script = self.scripts.lock().pop_front().unwrap_or_default();
        let output = match script.output {
            Some(output) => output,
            None => {
                let results: Vec<TaskResult> = tasks.iter().map(|t| (self.solver)(t)).collect();
                serde_json::to_string(&results).map_err(|e| DispatchError::SubmissionFailed {
                    name: name.to_string(),
                    message: e.to_string(),
                })?
            }
        };

        debug!(execution_id = %execution_id, tasks = tasks.len(), "simulated execution started");
        executions.insert(
            execution_id.clone(),
            SimExecution {
                name: name.to_string(),
                tasks,
                pending: script.statuses.into(),
                current: ExecutionStatus::Submitted,
                output: Some(output),
            },
        );
        Ok(execution_id)
    }

    async fn describe(&self, execution_id: &str) -> DispatchResult<ExecutionDescription> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        let mut executions = self.executions.lock();
        let exec = executions
            .get_mut(execution_id)
            .ok_or_else(|| DispatchError::Transport {
                execution_id: execution_id.to_string(),
                message: "execution does not exist".to_string(),
            })?;

        if !exec.current.is_terminal() {
            if let Some(next) = exec.pending.pop_front() {
                exec.current = next;
            }
        }

        let output = match exec.current {
            ExecutionStatus::Succeeded => exec.output.clone(),
            _ => None,
        };
        Ok(ExecutionDescription {
            status: exec.current.clone(),
            output,
            raw: Self::record(exec, execution_id),
        })
    }
}

/// Deterministic stand-in for the annealing solver.
///
/// Scores form a smooth bowl over the tuning knobs with a small per-seed
/// wobble, so a search over them has something to minimize.
pub fn synthetic_solver() -> SolverFn {
    Arc::new(|task: &TaskDescriptor| {
        let d = f64::from(task.problem_dimension);
        let temperature = (task.max_temperature.ln() - 1.0).powi(2) / 10.0;
        let cut_off = (task.cut_off - 3.0).powi(2) / 4.0;
        let erase = (f64::from(task.erase_small_threshold) - 2.0 * d).powi(2) / 100.0;
        let shared = task
            .erase_shared_probability
            .map_or(0.0, |p| (p - 0.5).powi(2));
        let runs = 1.0 / (task.mc_run.max(1) as f64).sqrt();
        let wobble = 1.0 + 0.05 * (task.seed as f64 * 12.9898).sin();

        TaskResult {
            request: task.clone(),
            score: d * d * (1.0 + temperature + cut_off + erase + shared + runs) * wobble,
            run_count: 1000 / task.mc_run.max(1),
        }
    })
}
