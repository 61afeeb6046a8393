//! Breadth-first exploration.

use crate::adapters::RestoreOrder;
use crate::graph::{FrontierPair, Graph};
use crate::strategy::Strategy;

/// FIFO over the frontier: pairs are explored in the order their states
/// were discovered, so shallow behavior is covered before deep behavior.
///
/// Breadth-first exploration restores checkpoints in arbitrary order and is
/// therefore incompatible with stack-scoped (savepoint) adapters.
#[derive(Debug, Default)]
pub struct Bfs;

impl Bfs {
    /// Create a breadth-first strategy.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for Bfs {
    fn name(&self) -> &'static str {
        "bfs"
    }

    fn restore_discipline(&self) -> RestoreOrder {
        RestoreOrder::Arbitrary
    }

    fn pick(&mut self, graph: &Graph) -> Option<FrontierPair> {
        graph.frontier().first().cloned()
    }
}
