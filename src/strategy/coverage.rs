//! Coverage-guided exploration.

use crate::adapters::RestoreOrder;
use crate::graph::{FrontierPair, Graph};
use crate::strategy::Strategy;

/// Prefers the frontier pair whose action has executed the fewest times
/// globally, so rarely exercised operations get attention first. Ties break
/// by frontier insertion order.
#[derive(Debug, Default)]
pub struct CoverageGuided;

impl CoverageGuided {
    /// Create a coverage-guided strategy.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for CoverageGuided {
    fn name(&self) -> &'static str {
        "coverage"
    }

    fn restore_discipline(&self) -> RestoreOrder {
        RestoreOrder::Arbitrary
    }

    fn pick(&mut self, graph: &Graph) -> Option<FrontierPair> {
        // min_by_key would return the last of equal minima; ties must go to
        // the earliest frontier entry.
        let mut best: Option<(&FrontierPair, u64)> = None;
        for pair in graph.frontier() {
            let count = graph.execution_count(&pair.1);
            if best.as_ref().is_none_or(|(_, b)| count < *b) {
                best = Some((pair, count));
            }
        }
        best.map(|(pair, _)| pair.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::graph_with_frontier;

    #[test]
    fn least_executed_action_wins() {
        let (mut graph, ids) = graph_with_frontier(&[(0, "hot"), (0, "cold"), (1, "hot")]);
        graph.record_call(&ids[0], "hot");
        graph.record_call(&ids[0], "hot");

        let mut strategy = CoverageGuided::new();
        assert_eq!(
            strategy.pick(&graph),
            Some((ids[0].clone(), "cold".to_string()))
        );
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let (graph, ids) = graph_with_frontier(&[(1, "b"), (0, "a")]);
        let mut strategy = CoverageGuided::new();
        // Neither action has executed; the first frontier entry wins.
        assert_eq!(
            strategy.pick(&graph),
            Some((ids[1].clone(), "b".to_string()))
        );
    }
}
