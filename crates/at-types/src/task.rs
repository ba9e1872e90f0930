//! Per-seed task descriptors and the results the solver sends back.

use serde::{Deserialize, Serialize};

use crate::config::SolverConfig;

/// One seeded solver run. Field names on the wire match the solver's request
/// schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskDescriptor {
    /// Unique within a batch, in `1..=sample_count`.
    pub seed: u64,
    #[serde(rename = "d")]
    pub problem_dimension: u32,
    pub mc_run: u64,
    pub max_temperature: f64,
    pub min_temperature: f64,
    #[serde(rename = "erase_small_th")]
    pub erase_small_threshold: u32,
    pub cut_off: f64,
    #[serde(
        rename = "erase_shared_p",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub erase_shared_probability: Option<f64>,
}

/// Solver output for one task, echoing the request it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskResult {
    pub request: TaskDescriptor,
    pub score: f64,
    pub run_count: u64,
}

impl TaskResult {
    pub fn seed(&self) -> u64 {
        self.request.seed
    }
}

/// Expand a configuration into its batch: one descriptor per seed `1..=N`.
pub fn build_tasks(config: &SolverConfig) -> Vec<TaskDescriptor> {
    (1..=u64::from(config.sample_count))
        .map(|seed| TaskDescriptor {
            seed,
            problem_dimension: config.problem_dimension,
            mc_run: config.mc_run,
            max_temperature: config.max_temperature,
            min_temperature: config.min_temperature,
            erase_small_threshold: config.erase_small_threshold,
            cut_off: config.cut_off,
            erase_shared_probability: config.erase_shared_probability,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn config(n: u32) -> SolverConfig {
        SolverConfig::builder(9, n)
            .mc_run(14)
            .max_temperature(22.06)
            .erase_small_threshold(11)
            .cut_off(0.5)
            .erase_shared_probability(Some(0.25))
            .build()
            .unwrap()
    }

    #[test]
    fn one_descriptor_per_seed() {
        for n in [1, 2, 17, 100] {
            let cfg = config(n);
            let tasks = build_tasks(&cfg);
            assert_eq!(tasks.len(), n as usize);

            let seeds: HashSet<u64> = tasks.iter().map(|t| t.seed).collect();
            assert_eq!(seeds.len(), n as usize);
            assert_eq!(seeds, (1..=u64::from(n)).collect());

            for task in &tasks {
                assert_eq!(task.problem_dimension, cfg.problem_dimension);
                assert_eq!(task.mc_run, cfg.mc_run);
                assert_eq!(task.max_temperature, cfg.max_temperature);
                assert_eq!(task.min_temperature, cfg.min_temperature);
                assert_eq!(task.erase_small_threshold, cfg.erase_small_threshold);
                assert_eq!(task.cut_off, cfg.cut_off);
                assert_eq!(task.erase_shared_probability, cfg.erase_shared_probability);
            }
        }
    }

    #[test]
    fn seeds_are_ordered() {
        let tasks = build_tasks(&config(5));
        let seeds: Vec<u64> = tasks.iter().map(|t| t.seed).collect();
        assert_eq!(seeds, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn wire_names_follow_solver_schema() {
        let task = &build_tasks(&config(1))[0];
        let json = serde_json::to_value(task).unwrap();
        assert_eq!(json["d"], 9);
        assert_eq!(json["erase_small_th"], 11);
        assert_eq!(json["erase_shared_p"], 0.25);
        assert!(json.get("sample_count").is_none());
    }

    #[test]
    fn result_rejects_unknown_fields() {
        let task = build_tasks(&config(1)).remove(0);
        let mut json = serde_json::to_value(TaskResult {
            request: task,
            score: 3.5,
            run_count: 12,
        })
        .unwrap();
        json["extra"] = serde_json::json!(1);
        assert!(serde_json::from_value::<TaskResult>(json).is_err());
    }
}
