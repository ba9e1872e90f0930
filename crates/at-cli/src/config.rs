//! Driver settings, layered as defaults < environment < command-line flags.

use std::path::PathBuf;
use std::time::Duration;

use at_dispatch::PollConfig;
use at_optimizer::{RetryPolicy, DEFAULT_STORE_PATH};
use at_types::ConfigError;
use clap::Args;
use serde::{Deserialize, Serialize};

pub const ENV_ENGINE_URL: &str = "ANNEAL_ENGINE_URL";
pub const ENV_STORE: &str = "ANNEAL_STORE";
pub const ENV_DUMP_DIR: &str = "ANNEAL_DUMP_DIR";
pub const ENV_SETTLE_SECS: &str = "ANNEAL_SETTLE_SECS";
pub const ENV_POLL_SECS: &str = "ANNEAL_POLL_SECS";

/// Flags shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Base URL of the workflow engine
    #[arg(long, global = true)]
    pub engine_url: Option<String>,

    /// SQLite file holding study histories
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Directory for raw per-batch result dumps (disabled when unset)
    #[arg(long, global = true)]
    pub dump_dir: Option<PathBuf>,

    /// Seconds to wait before the first status query
    #[arg(long, global = true)]
    pub settle_secs: Option<u64>,

    /// Seconds between status queries
    #[arg(long, global = true)]
    pub poll_secs: Option<u64>,

    /// Give up on an execution after this many seconds
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Run batches in-process against a synthetic solver and keep study
    /// history in memory instead of the store file
    #[arg(long, global = true)]
    pub simulate: bool,
}

/// Everything the driver needs besides the solver knobs themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    pub engine_url: String,
    pub store_path: PathBuf,
    pub dump_dir: Option<PathBuf>,
    pub poll: PollConfig,
    pub retry: RetryPolicy,
    /// Per-request HTTP timeout for start/describe calls.
    pub request_timeout: Duration,
    pub simulate: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            engine_url: "http://127.0.0.1:8080".to_string(),
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            dump_dir: None,
            poll: PollConfig::default(),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(30),
            simulate: false,
        }
    }
}

fn parse_secs(var: &str, raw: &str) -> Result<Duration, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| ConfigError::invalid(var, format!("{raw:?} is not a number of seconds: {e}")))
}

impl DriverConfig {
    /// Defaults, then the process environment, then `args`.
    pub fn load(args: &GlobalArgs) -> Result<Self, ConfigError> {
        Ok(Self::default()
            .with_env(|key| std::env::var(key).ok())?
            .with_args(args))
    }

    /// Override fields from environment variables found through `lookup`.
    /// Empty values are ignored.
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_ENGINE_URL) {
            self.engine_url = url;
        }
        if let Some(path) = get(ENV_STORE) {
            self.store_path = PathBuf::from(path);
        }
        if let Some(dir) = get(ENV_DUMP_DIR) {
            self.dump_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = get(ENV_SETTLE_SECS) {
            self.poll.settle_delay = parse_secs(ENV_SETTLE_SECS, &raw)?;
        }
        if let Some(raw) = get(ENV_POLL_SECS) {
            self.poll.poll_interval = parse_secs(ENV_POLL_SECS, &raw)?;
        }
        Ok(self)
    }

    /// Override fields from command-line flags.
    pub fn with_args(mut self, args: &GlobalArgs) -> Self {
        if let Some(url) = &args.engine_url {
            self.engine_url = url.clone();
        }
        if let Some(path) = &args.store {
            self.store_path = path.clone();
        }
        if let Some(dir) = &args.dump_dir {
            self.dump_dir = Some(dir.clone());
        }
        if let Some(secs) = args.settle_secs {
            self.poll.settle_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = args.poll_secs {
            self.poll.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = args.timeout_secs {
            self.poll.timeout = Some(Duration::from_secs(secs));
        }
        self.simulate |= args.simulate;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_follow_the_engine_contract() {
        let config = DriverConfig::default();
        assert_eq!(config.poll.settle_delay, Duration::from_secs(7));
        assert_eq!(config.poll.poll_interval, Duration::from_secs(1));
        assert_eq!(config.poll.timeout, None);
        assert_eq!(config.store_path, PathBuf::from("opt.db"));
        assert!(config.dump_dir.is_none());
        assert!(!config.simulate);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = DriverConfig::default()
            .with_env(env(&[
                (ENV_ENGINE_URL, "http://engine:9000"),
                (ENV_STORE, "/tmp/studies.db"),
                (ENV_DUMP_DIR, "dumps"),
                (ENV_SETTLE_SECS, "3"),
                (ENV_POLL_SECS, " 2 "),
            ]))
            .unwrap();
        assert_eq!(config.engine_url, "http://engine:9000");
        assert_eq!(config.store_path, PathBuf::from("/tmp/studies.db"));
        assert_eq!(config.dump_dir, Some(PathBuf::from("dumps")));
        assert_eq!(config.poll.settle_delay, Duration::from_secs(3));
        assert_eq!(config.poll.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn flags_override_environment() {
        let args = GlobalArgs {
            engine_url: Some("http://flag:1".into()),
            settle_secs: Some(0),
            timeout_secs: Some(600),
            simulate: true,
            ..GlobalArgs::default()
        };
        let config = DriverConfig::default()
            .with_env(env(&[(ENV_ENGINE_URL, "http://env:2"), (ENV_SETTLE_SECS, "9")]))
            .unwrap()
            .with_args(&args);
        assert_eq!(config.engine_url, "http://flag:1");
        assert_eq!(config.poll.settle_delay, Duration::ZERO);
        assert_eq!(config.poll.timeout, Some(Duration::from_secs(600)));
        assert!(config.simulate);
    }

    #[test]
    fn bad_number_names_the_variable() {
        let err = DriverConfig::default()
            .with_env(env(&[(ENV_POLL_SECS, "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { ref field, .. } if field == ENV_POLL_SECS));
    }

    #[test]
    fn empty_variables_are_ignored() {
        let config = DriverConfig::default()
            .with_env(env(&[(ENV_ENGINE_URL, ""), (ENV_SETTLE_SECS, " ")]))
            .unwrap();
        assert_eq!(config, DriverConfig::default());
    }
}
