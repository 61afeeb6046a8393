//! Exploration results: the graph, the violations, and the counters.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::graph::Graph;
use crate::invariant::{Severity, Violation};

/// Why an exploration run stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum StopReason {
    /// No unexplored (state, action) pairs remain.
    FrontierExhausted,
    /// The step budget was spent.
    MaxSteps,
    /// The configured action-coverage fraction was reached.
    CoverageReached,
    /// The run's wall-clock budget was spent.
    TimedOut,
    /// The cancellation handle was triggered.
    Cancelled,
    /// A critical violation stopped the run under `fail_fast`.
    FailFast,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FrontierExhausted => write!(f, "frontier exhausted"),
            Self::MaxSteps => write!(f, "max steps reached"),
            Self::CoverageReached => write!(f, "coverage target reached"),
            Self::TimedOut => write!(f, "run timeout reached"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::FailFast => write!(f, "fail-fast on critical violation"),
        }
    }
}

/// Counters accumulated over one exploration run.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct ExplorationStats {
    /// Distinct canonical states discovered (including the initial one).
    pub states_visited: usize,
    /// Transitions recorded.
    pub transitions_taken: usize,
    /// Individual invariant evaluations.
    pub invariants_checked: u64,
    /// Wall-clock duration of the run.
    pub duration: Duration,
    /// How many actions were registered.
    pub actions_total: usize,
    /// Names of actions that executed at least once.
    pub actions_executed: BTreeSet<String>,
}

impl ExplorationStats {
    /// Fraction of registered actions that executed at least once, in
    /// `0.0..=1.0`. A run with no registered actions counts as fully
    /// covered.
    #[must_use]
    pub fn action_coverage(&self) -> f64 {
        if self.actions_total == 0 {
            return 1.0;
        }
        self.actions_executed.len() as f64 / self.actions_total as f64
    }
}

/// Everything one exploration run produced.
#[derive(Debug)]
pub struct ExplorationResult {
    /// The explored state graph.
    pub graph: Graph,
    /// All recorded invariant violations, in emission order.
    pub violations: Vec<Violation>,
    /// Run counters.
    pub stats: ExplorationStats,
    /// The RNG seed used by the strategy, recorded for reproduction.
    pub seed: Option<u64>,
    /// Why the run stopped.
    pub stop_reason: StopReason,
}

impl ExplorationResult {
    /// Whether any violations were recorded.
    #[must_use]
    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }

    /// Violations of exactly the given severity.
    pub fn violations_with_severity(&self, severity: Severity) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(move |v| v.severity == severity)
    }

    /// The most severe recorded violation level, if any.
    #[must_use]
    pub fn worst_severity(&self) -> Option<Severity> {
        self.violations.iter().map(|v| v.severity).max()
    }

    /// Process exit status for an invoking CLI: `0` when no violations
    /// were found, `1` when findings are present. (Configuration errors
    /// map to `2` and infrastructure errors to `3` via
    /// [`AgentError::exit_status`](crate::agent::AgentError::exit_status).)
    #[must_use]
    pub fn exit_status(&self) -> i32 {
        if self.has_violations() { 1 } else { 0 }
    }
}
