//! Run configuration recognized by the exploration core.
//!
//! A CLI or config-file loader maps user input onto [`ExplorationConfig`];
//! the core also reads it straight from the environment under the
//! `ROAMGRAPH_` prefix (with `.env` support via `dotenvy`):
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `ROAMGRAPH_STRATEGY` | `bfs`, `dfs`, `random`, `coverage`, `weighted`, `mcts` |
//! | `ROAMGRAPH_MAX_STEPS` | Upper bound on loop iterations (default 1000) |
//! | `ROAMGRAPH_MAX_DEPTH` | Upper bound on transitions from the initial state |
//! | `ROAMGRAPH_COVERAGE_TARGET` | Stop early at this action-coverage fraction |
//! | `ROAMGRAPH_SEED` | Seeds the RNG for random/weighted/mcts |
//! | `ROAMGRAPH_FAIL_FAST` | Stop on the first critical violation |
//! | `ROAMGRAPH_RUN_TIMEOUT_SECS` | Per-run wall-clock budget |

use std::str::FromStr;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

use crate::strategy::{Bfs, CoverageGuided, Dfs, Mcts, RandomWalk, Strategy, Weighted};

/// Errors raised while loading configuration.
///
/// These are configuration errors: an invoking CLI should exit with
/// status 2.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// An environment variable held an unparseable value.
    #[error("invalid value `{value}` for {key}")]
    #[diagnostic(
        code(roamgraph::config::invalid_value),
        help("See the module docs of `roamgraph::config` for accepted values.")
    )]
    InvalidValue { key: String, value: String },
}

impl ConfigError {
    /// Process exit status for an invoking CLI.
    #[must_use]
    pub fn exit_status(&self) -> i32 {
        2
    }
}

/// Which built-in strategy to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StrategyKind {
    #[default]
    Bfs,
    Dfs,
    Random,
    Coverage,
    Weighted,
    Mcts,
}

impl StrategyKind {
    /// Construct the strategy, seeding randomized variants.
    #[must_use]
    pub fn build(self, seed: Option<u64>) -> Box<dyn Strategy> {
        match self {
            StrategyKind::Bfs => Box::new(Bfs::new()),
            StrategyKind::Dfs => Box::new(Dfs::new()),
            StrategyKind::Random => Box::new(RandomWalk::new(seed)),
            StrategyKind::Coverage => Box::new(CoverageGuided::new()),
            StrategyKind::Weighted => Box::new(Weighted::new(std::iter::empty(), seed)),
            StrategyKind::Mcts => Box::new(Mcts::new(seed)),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bfs" => Ok(StrategyKind::Bfs),
            "dfs" => Ok(StrategyKind::Dfs),
            "random" => Ok(StrategyKind::Random),
            "coverage" => Ok(StrategyKind::Coverage),
            "weighted" => Ok(StrategyKind::Weighted),
            "mcts" => Ok(StrategyKind::Mcts),
            other => Err(ConfigError::InvalidValue {
                key: "strategy".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StrategyKind::Bfs => "bfs",
            StrategyKind::Dfs => "dfs",
            StrategyKind::Random => "random",
            StrategyKind::Coverage => "coverage",
            StrategyKind::Weighted => "weighted",
            StrategyKind::Mcts => "mcts",
        };
        f.write_str(name)
    }
}

/// Options governing one exploration run.
#[derive(Clone, Debug)]
pub struct ExplorationConfig {
    /// Strategy to drive the frontier.
    pub strategy: StrategyKind,
    /// Upper bound on loop iterations.
    pub max_steps: u64,
    /// Upper bound on transitions from the initial state, if any.
    pub max_depth: Option<u32>,
    /// Stop early once this fraction of actions has executed.
    pub coverage_target: Option<f64>,
    /// RNG seed for randomized strategies; `None` is nondeterministic.
    pub seed: Option<u64>,
    /// Stop after the first critical violation.
    pub fail_fast: bool,
    /// Per-run wall-clock budget, if any.
    pub run_timeout: Option<Duration>,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Bfs,
            max_steps: 1000,
            max_depth: None,
            coverage_target: None,
            seed: None,
            fail_fast: false,
            run_timeout: None,
        }
    }
}

impl ExplorationConfig {
    /// Defaults per the option table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the environment (`ROAMGRAPH_*` variables),
    /// reading a `.env` file first when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();

        if let Some(value) = read_env("ROAMGRAPH_STRATEGY") {
            config.strategy = value.parse()?;
        }
        if let Some(value) = read_env("ROAMGRAPH_MAX_STEPS") {
            config.max_steps = parse_var("ROAMGRAPH_MAX_STEPS", &value)?;
        }
        if let Some(value) = read_env("ROAMGRAPH_MAX_DEPTH") {
            config.max_depth = Some(parse_var("ROAMGRAPH_MAX_DEPTH", &value)?);
        }
        if let Some(value) = read_env("ROAMGRAPH_COVERAGE_TARGET") {
            let target: f64 = parse_var("ROAMGRAPH_COVERAGE_TARGET", &value)?;
            if !(0.0..=1.0).contains(&target) {
                return Err(ConfigError::InvalidValue {
                    key: "ROAMGRAPH_COVERAGE_TARGET".to_string(),
                    value,
                });
            }
            config.coverage_target = Some(target);
        }
        if let Some(value) = read_env("ROAMGRAPH_SEED") {
            config.seed = Some(parse_var("ROAMGRAPH_SEED", &value)?);
        }
        if let Some(value) = read_env("ROAMGRAPH_FAIL_FAST") {
            config.fail_fast = matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(value) = read_env("ROAMGRAPH_RUN_TIMEOUT_SECS") {
            let secs: u64 = parse_var("ROAMGRAPH_RUN_TIMEOUT_SECS", &value)?;
            config.run_timeout = Some(Duration::from_secs(secs));
        }
        Ok(config)
    }

    /// Set the strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the step budget.
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Set the depth bound.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    /// Set the coverage target.
    #[must_use]
    pub fn with_coverage_target(mut self, target: f64) -> Self {
        self.coverage_target = Some(target);
        self
    }

    /// Set the RNG seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Enable or disable fail-fast.
    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Set the per-run wall-clock budget.
    #[must_use]
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }
}

fn read_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_option_table() {
        let config = ExplorationConfig::default();
        assert_eq!(config.strategy, StrategyKind::Bfs);
        assert_eq!(config.max_steps, 1000);
        assert_eq!(config.max_depth, None);
        assert_eq!(config.coverage_target, None);
        assert_eq!(config.seed, None);
        assert!(!config.fail_fast);
    }

    #[test]
    fn strategy_names_parse() {
        for (name, kind) in [
            ("bfs", StrategyKind::Bfs),
            ("DFS", StrategyKind::Dfs),
            ("random", StrategyKind::Random),
            ("coverage", StrategyKind::Coverage),
            ("weighted", StrategyKind::Weighted),
            ("mcts", StrategyKind::Mcts),
        ] {
            assert_eq!(name.parse::<StrategyKind>().unwrap(), kind);
        }
        assert!("simulated-annealing".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn built_strategies_report_their_names() {
        assert_eq!(StrategyKind::Mcts.build(Some(1)).name(), "mcts");
        assert_eq!(StrategyKind::Dfs.build(None).name(), "dfs");
    }
}
