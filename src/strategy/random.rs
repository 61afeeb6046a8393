//! Seeded uniform-random exploration.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::adapters::RestoreOrder;
use crate::graph::{FrontierPair, Graph};
use crate::strategy::Strategy;

/// Uniform random choice over the frontier.
///
/// With a seed the walk is fully reproducible; without one the RNG is
/// OS-seeded and every run differs.
#[derive(Debug)]
pub struct RandomWalk {
    rng: StdRng,
}

impl RandomWalk {
    /// Create a random strategy, seeded for reproducibility when `seed` is
    /// given.
    #[must_use]
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            },
        }
    }
}

impl Strategy for RandomWalk {
    fn name(&self) -> &'static str {
        "random"
    }

    fn restore_discipline(&self) -> RestoreOrder {
        RestoreOrder::Arbitrary
    }

    fn pick(&mut self, graph: &Graph) -> Option<FrontierPair> {
        let frontier = graph.frontier();
        if frontier.is_empty() {
            return None;
        }
        let index = self.rng.random_range(0..frontier.len());
        Some(frontier[index].clone())
    }
}
