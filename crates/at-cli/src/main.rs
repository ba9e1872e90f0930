//! anneal-tune: drive remote annealing batches and tune their parameters.
//!
//! ```bash
//! # One-shot evaluation of a configuration over 100 seeds
//! anneal-tune score -n 100 -d 8 -R 28 -T 0.103
//!
//! # 50 new search trials for d = 8, resuming the study in opt.db
//! anneal-tune tune -d 8 -n 100 --trials 50
//!
//! # Paste-ready parameter table from the best trial of each dimension
//! anneal-tune best -n 100 --dims 5..=14
//! ```

mod config;

use std::ops::RangeInclusive;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use at_dispatch::{
    cancel_pair, BatchExecutor, CancelSignal, HttpWorkflowEngine, ResultDump, ScoreEvaluator,
    SimulatedEngine, WorkflowEngine,
};
use at_optimizer::{
    render_best_table, solver_search_space, MemoryStudyStore, ObjectiveDirection, SearchLoop,
    SearchLoopConfig, SqliteStudyStore, StrategyConfig, StrategyKind, StudyStore, Trial,
    TrialStatus,
};
use at_types::{
    AtError, DispatchError, MinTemperature, SolverConfig, ONE_SHOT_MIN_TEMPERATURE,
};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{DriverConfig, GlobalArgs};

#[derive(Parser, Debug)]
#[command(name = "anneal-tune", version)]
#[command(about = "Remote annealing batch driver and parameter tuner")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate one configuration and print (mean_score, mean_log_score, mean_run_count)
    Score(ScoreArgs),
    /// Run parameter search trials for one problem dimension
    Tune(TuneArgs),
    /// Print the best parameters of each dimension as McParams match arms
    Best(BestArgs),
}

#[derive(Args, Debug)]
struct ScoreArgs {
    /// Number of seeds per batch
    #[arg(short = 'n', long = "samples")]
    sample_count: u32,

    /// Problem dimension
    #[arg(short = 'd', long = "dim")]
    problem_dimension: u32,

    /// Monte Carlo runs per seed
    #[arg(short = 'R', long)]
    mc_run: u64,

    /// Starting annealing temperature
    #[arg(short = 'T', long)]
    max_temperature: f64,

    /// Final annealing temperature
    #[arg(long, default_value_t = ONE_SHOT_MIN_TEMPERATURE)]
    min_temperature: f64,

    #[arg(long = "erase-small-th", default_value_t = 2)]
    erase_small_threshold: u32,

    #[arg(long, default_value_t = 3.0)]
    cut_off: f64,

    #[arg(long = "erase-shared-p")]
    erase_shared_probability: Option<f64>,
}

#[derive(Args, Debug)]
struct TuneArgs {
    /// Problem dimension
    #[arg(short = 'd', long = "dim")]
    problem_dimension: u32,

    /// Number of seeds per batch
    #[arg(short = 'n', long = "samples")]
    sample_count: u32,

    /// New trials to run in this invocation
    #[arg(long, default_value_t = 100)]
    trials: usize,

    /// Search strategy: grid, random, or bayesian
    #[arg(long, default_value = "bayesian", value_parser = parse_strategy)]
    strategy: StrategyKind,

    /// Seed for the strategy's sampler
    #[arg(long)]
    seed: Option<u64>,

    /// Points per continuous dimension for grid search
    #[arg(long, default_value_t = 5)]
    grid_steps: usize,

    /// Probability of a uniform sample in bayesian search
    #[arg(long, default_value_t = 0.3)]
    exploration: f64,

    /// Evaluation attempts per trial before it is recorded as failed
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,

    /// Abort on the first failed evaluation
    #[arg(long)]
    fail_fast: bool,
}

#[derive(Args, Debug)]
struct BestArgs {
    /// Number of seeds per batch the studies were run with
    #[arg(short = 'n', long = "samples", default_value_t = 100)]
    sample_count: u32,

    /// Dimensions to print, e.g. 5..=14, 5..15 or 8
    #[arg(long, default_value = "5..=14", value_parser = parse_dims)]
    dims: RangeInclusive<u32>,
}

fn parse_strategy(raw: &str) -> Result<StrategyKind, String> {
    StrategyKind::parse(raw).ok_or_else(|| format!("unknown strategy {raw:?}"))
}

fn parse_dims(raw: &str) -> Result<RangeInclusive<u32>, String> {
    let num = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|e| format!("bad dimension {s:?}: {e}"))
    };
    let range = if let Some((lo, hi)) = raw.split_once("..=") {
        num(lo)?..=num(hi)?
    } else if let Some((lo, hi)) = raw.split_once("..") {
        let hi = num(hi)?;
        if hi == 0 {
            return Err(format!("empty range {raw:?}"));
        }
        num(lo)?..=hi - 1
    } else {
        let d = num(raw)?;
        d..=d
    };
    if range.is_empty() {
        return Err(format!("empty range {raw:?}"));
    }
    Ok(range)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn engine(config: &DriverConfig) -> anyhow::Result<Arc<dyn WorkflowEngine>> {
    if config.simulate {
        info!("using the in-process simulated engine");
        return Ok(Arc::new(SimulatedEngine::with_defaults()));
    }
    let engine =
        HttpWorkflowEngine::with_request_timeout(config.engine_url.clone(), config.request_timeout)
            .context("building the workflow engine client")?;
    Ok(Arc::new(engine))
}

fn evaluator(
    config: &DriverConfig,
    cancel: CancelSignal,
) -> anyhow::Result<ScoreEvaluator<Arc<dyn WorkflowEngine>>> {
    let executor = BatchExecutor::new(engine(config)?)
        .with_poll_config(config.poll.clone())
        .with_cancel_signal(cancel);
    Ok(ScoreEvaluator::new(executor).with_dump(config.dump_dir.as_ref().map(ResultDump::new)))
}

/// Simulated runs keep their history in memory and never touch the store file.
fn open_store(config: &DriverConfig) -> anyhow::Result<Arc<dyn StudyStore>> {
    if config.simulate {
        info!("keeping study history in memory for this simulated run");
        return Ok(Arc::new(MemoryStudyStore::new()));
    }
    let store = SqliteStudyStore::open(&config.store_path).with_context(|| {
        format!("opening study store {}", config.store_path.display())
    })?;
    Ok(Arc::new(store))
}

/// One stdout line per finished trial.
fn trial_line(trial: &Trial) -> String {
    match (trial.status, &trial.summary) {
        (TrialStatus::Completed, Some(summary)) => {
            format!("trial {}: {summary}", trial.trial_index)
        }
        _ => format!(
            "trial {}: failed after {} attempt(s): {}",
            trial.trial_index,
            trial.attempts,
            trial.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

async fn score(args: ScoreArgs, config: &DriverConfig, cancel: CancelSignal) -> anyhow::Result<()> {
    let solver = SolverConfig::builder(args.problem_dimension, args.sample_count)
        .mc_run(args.mc_run)
        .max_temperature(args.max_temperature)
        .min_temperature(MinTemperature::OneShot(args.min_temperature))
        .erase_small_threshold(args.erase_small_threshold)
        .cut_off(args.cut_off)
        .erase_shared_probability(args.erase_shared_probability)
        .build()
        .context("invalid solver configuration")?;

    let summary = evaluator(config, cancel)?
        .evaluate(&solver)
        .await
        .context("batch evaluation failed")?;
    println!("{summary}");
    Ok(())
}

async fn tune(args: TuneArgs, config: &DriverConfig, cancel: CancelSignal) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let strategy = StrategyConfig::new(args.strategy)
        .with_seed(args.seed)
        .with_grid_steps(args.grid_steps)
        .with_exploration_weight(args.exploration)
        .build(solver_search_space(), ObjectiveDirection::Minimize);
    let loop_config = SearchLoopConfig::new(args.problem_dimension, args.sample_count)
        .with_trials(args.trials)
        .with_retry(config.retry.clone().with_max_attempts(args.max_attempts))
        .with_fail_fast(args.fail_fast);
    let identity = loop_config.identity();

    let mut search = SearchLoop::new(store, evaluator(config, cancel.clone())?, strategy, loop_config)
        .with_cancel_signal(cancel)
        .with_trial_observer(Box::new(|trial: &Trial| println!("{}", trial_line(trial))));
    let report = search
        .run()
        .await
        .with_context(|| format!("search for study {identity} aborted"))?;

    println!(
        "study {}: {} completed, {} failed this run ({} earlier trials)",
        report.study, report.trials_completed, report.trials_failed, report.resumed_trials
    );
    match &report.best_trial {
        Some(best) => {
            if let Some(summary) = &best.summary {
                println!("best trial #{}: {summary}", best.trial_index);
            }
            print!("{}", at_optimizer::render_mc_params(args.problem_dimension, best));
        }
        None => println!("no completed trials yet"),
    }
    Ok(())
}

fn best(args: BestArgs, config: &DriverConfig) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let table = render_best_table(store.as_ref(), args.sample_count, args.dims)
        .context("reading best trials")?;
    print!("{table}");
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = DriverConfig::load(&cli.global).context("loading driver configuration")?;

    let (cancel_handle, cancel) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            cancel_handle.cancel();
        }
    });

    match cli.command {
        Command::Score(args) => score(args, &config, cancel).await,
        Command::Tune(args) => tune(args, &config, cancel).await,
        Command::Best(args) => best(args, &config),
    }
}

/// Print the full diagnostic, including the engine's record for failed
/// executions.
fn report(err: &anyhow::Error) {
    eprintln!("error: {err:#}");
    let details = err.chain().find_map(|cause| {
        match cause.downcast_ref::<AtError>() {
            Some(AtError::Dispatch(DispatchError::ExecutionFailed { details, .. })) => {
                Some(details)
            }
            _ => match cause.downcast_ref::<DispatchError>() {
                Some(DispatchError::ExecutionFailed { details, .. }) => Some(details),
                _ => None,
            },
        }
    });
    if let Some(details) = details {
        match serde_json::to_string_pretty(details) {
            Ok(pretty) => eprintln!("execution record:\n{pretty}"),
            Err(_) => eprintln!("execution record: {details}"),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}
