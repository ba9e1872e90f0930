//! Render best trials as a per-dimension `McParams` table for the solver.

use std::fmt::Write as _;
use std::ops::RangeInclusive;

use at_types::{StoreError, StoreResult};
use tracing::warn;

use crate::objective::solver_search_space;
use crate::store::{study_identity, StudyStore};
use crate::trial::Trial;

/// One match arm of the table:
///
/// ```text
/// // 1.2345
/// 8 => McParams {
///     mc_run: 28,
///     max_temperature: 0.103,
///     ...
/// },
/// ```
///
/// Parameters appear in search-space order; unknown extras follow sorted.
pub fn render_mc_params(problem_dimension: u32, trial: &Trial) -> String {
    let mut out = String::new();
    match trial.objective_value {
        Some(value) => {
            let _ = writeln!(out, "// {value}");
        }
        None => {
            let _ = writeln!(out, "// trial {} has no objective", trial.trial_index);
        }
    }
    let _ = writeln!(out, "{problem_dimension} => McParams {{");

    let ordered: Vec<String> = solver_search_space()
        .parameters
        .into_iter()
        .map(|p| p.name)
        .collect();
    let extras = trial.params.keys().filter(|k| !ordered.contains(k));
    for name in ordered.iter().chain(extras) {
        if let Some(value) = trial.params.get(name) {
            let _ = writeln!(out, "    {name}: {},", value.to_rust_literal());
        }
    }
    out.push_str("},\n");
    out
}

/// Table for every dimension in `dims` at sample count `sample_count`.
/// Dimensions without a study or a completed trial become a comment line.
pub fn render_best_table(
    store: &dyn StudyStore,
    sample_count: u32,
    dims: RangeInclusive<u32>,
) -> StoreResult<String> {
    let mut out = String::new();
    for d in dims {
        let identity = study_identity(d, sample_count);
        match store.best_trial(&identity) {
            Ok(Some(trial)) => out.push_str(&render_mc_params(d, &trial)),
            Ok(None) => {
                warn!(study = %identity, "no completed trials");
                let _ = writeln!(out, "// {identity}: no completed trials");
            }
            Err(StoreError::NotFound { .. }) => {
                warn!(study = %identity, "study not found");
                let _ = writeln!(out, "// {identity}: no study");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}
