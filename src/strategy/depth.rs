//! Depth-first exploration.

use crate::adapters::RestoreOrder;
use crate::graph::{FrontierPair, Graph};
use crate::strategy::Strategy;

/// LIFO over the frontier: always extends the most recently discovered
/// state, backtracking only when a branch is exhausted.
///
/// Depth-first order never needs to restore past a checkpoint that is still
/// live below it, so it is the one strategy compatible with stack-scoped
/// savepoint adapters (and with everything else).
#[derive(Debug, Default)]
pub struct Dfs;

impl Dfs {
    /// Create a depth-first strategy.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for Dfs {
    fn name(&self) -> &'static str {
        "dfs"
    }

    fn restore_discipline(&self) -> RestoreOrder {
        RestoreOrder::Stack
    }

    fn pick(&mut self, graph: &Graph) -> Option<FrontierPair> {
        graph.frontier().last().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::graph_with_frontier;

    #[test]
    fn picks_last_inserted_first() {
        let (graph, ids) = graph_with_frontier(&[(0, "a"), (0, "b"), (1, "c")]);
        let mut dfs = Dfs::new();
        assert_eq!(dfs.pick(&graph), Some((ids[1].clone(), "c".to_string())));
    }

    #[test]
    fn stack_discipline_is_declared() {
        assert_eq!(Dfs::new().restore_discipline(), RestoreOrder::Stack);
    }
}
