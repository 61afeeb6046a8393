//! Weighted-random exploration.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;

use crate::adapters::RestoreOrder;
use crate::graph::{FrontierPair, Graph};
use crate::strategy::Strategy;

/// Random choice over the frontier, biased by per-action-name weights.
///
/// Unlisted actions weigh `1.0`; a weight of `0.0` removes an action from
/// consideration while any other pair remains.
#[derive(Debug)]
pub struct Weighted {
    weights: FxHashMap<String, f64>,
    rng: StdRng,
}

impl Weighted {
    /// Create a weighted strategy from (action name, weight) pairs.
    #[must_use]
    pub fn new<I>(weights: I, seed: Option<u64>) -> Self
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        Self {
            weights: weights.into_iter().collect(),
            rng: match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            },
        }
    }

    fn weight_of(&self, action: &str) -> f64 {
        self.weights.get(action).copied().unwrap_or(1.0).max(0.0)
    }
}

impl Strategy for Weighted {
    fn name(&self) -> &'static str {
        "weighted"
    }

    fn restore_discipline(&self) -> RestoreOrder {
        RestoreOrder::Arbitrary
    }

    fn pick(&mut self, graph: &Graph) -> Option<FrontierPair> {
        let frontier = graph.frontier();
        let total: f64 = frontier.iter().map(|(_, a)| self.weight_of(a)).sum();
        if total <= 0.0 {
            // All weights zero: fall back to uniform so the frontier still
            // drains.
            if frontier.is_empty() {
                return None;
            }
            let index = self.rng.random_range(0..frontier.len());
            return Some(frontier[index].clone());
        }

        let mut roll = self.rng.random_range(0.0..total);
        for pair in frontier {
            let w = self.weight_of(&pair.1);
            if roll < w {
                return Some(pair.clone());
            }
            roll -= w;
        }
        frontier.last().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::graph_with_frontier;

    #[test]
    fn zero_weight_actions_are_avoided() {
        let (graph, ids) = graph_with_frontier(&[(0, "never"), (0, "always")]);
        let mut strategy = Weighted::new(
            [("never".to_string(), 0.0), ("always".to_string(), 5.0)],
            Some(3),
        );
        for _ in 0..50 {
            assert_eq!(
                strategy.pick(&graph),
                Some((ids[0].clone(), "always".to_string()))
            );
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let (graph, _) = graph_with_frontier(&[(0, "a"), (0, "b"), (1, "c")]);
        let picks = |seed| {
            let mut s = Weighted::new(std::iter::empty(), Some(seed));
            (0..10).map(|_| s.pick(&graph).unwrap()).collect::<Vec<_>>()
        };
        assert_eq!(picks(11), picks(11));
    }

    #[test]
    fn all_zero_weights_still_drain() {
        let (graph, _) = graph_with_frontier(&[(0, "a")]);
        let mut strategy = Weighted::new([("a".to_string(), 0.0)], Some(1));
        assert!(strategy.pick(&graph).is_some());
    }
}
