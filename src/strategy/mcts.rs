//! Monte-Carlo tree search over the exploration frontier.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;

use crate::adapters::RestoreOrder;
use crate::graph::{FrontierPair, Graph};
use crate::observe::{State, StateId};
use crate::strategy::{StepFeedback, Strategy};

#[derive(Clone, Copy, Debug, Default)]
struct NodeStats {
    visits: u64,
    reward: f64,
}

impl NodeStats {
    fn record(&mut self, reward: f64) {
        self.visits += 1;
        self.reward += reward;
    }
}

/// UCB1-guided exploration.
///
/// Every frontier pair is scored with
/// `avg_reward + c * sqrt(ln(N_parent) / N_pair)` where the parent is the
/// pair's state; unvisited pairs score infinity so everything is tried at
/// least once. After each step the reward (`violation_reward` when the
/// step emitted violations, `new_state_reward` when it discovered a state)
/// is backpropagated along the discovery chain to the root, steering the
/// search toward regions that keep producing findings.
#[derive(Debug)]
pub struct Mcts {
    exploration_weight: f64,
    violation_reward: f64,
    new_state_reward: f64,
    rng: StdRng,
    state_stats: FxHashMap<StateId, NodeStats>,
    pair_stats: FxHashMap<FrontierPair, NodeStats>,
    parents: FxHashMap<StateId, StateId>,
    root: Option<StateId>,
}

impl Mcts {
    /// Create an MCTS strategy with the given seed and default rewards
    /// (`exploration_weight` √2, `violation_reward` 10, `new_state_reward` 1).
    #[must_use]
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            exploration_weight: std::f64::consts::SQRT_2,
            violation_reward: 10.0,
            new_state_reward: 1.0,
            rng: match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            },
            state_stats: FxHashMap::default(),
            pair_stats: FxHashMap::default(),
            parents: FxHashMap::default(),
            root: None,
        }
    }

    /// Set the UCB1 exploration constant.
    #[must_use]
    pub fn exploration_weight(mut self, weight: f64) -> Self {
        self.exploration_weight = weight;
        self
    }

    /// Set the reward backpropagated when a step emits a violation.
    #[must_use]
    pub fn violation_reward(mut self, reward: f64) -> Self {
        self.violation_reward = reward;
        self
    }

    /// Set the reward backpropagated when a step discovers a new state.
    #[must_use]
    pub fn new_state_reward(mut self, reward: f64) -> Self {
        self.new_state_reward = reward;
        self
    }

    fn ucb1(&self, pair: &FrontierPair) -> f64 {
        let Some(stats) = self.pair_stats.get(pair) else {
            return f64::INFINITY;
        };
        if stats.visits == 0 {
            return f64::INFINITY;
        }
        let parent_visits = self
            .state_stats
            .get(&pair.0)
            .map_or(1, |s| s.visits.max(1));
        let avg = stats.reward / stats.visits as f64;
        avg + self.exploration_weight
            * ((parent_visits as f64).ln() / stats.visits as f64).sqrt()
    }
}

impl Strategy for Mcts {
    fn name(&self) -> &'static str {
        "mcts"
    }

    fn restore_discipline(&self) -> RestoreOrder {
        RestoreOrder::Arbitrary
    }

    fn notify(&mut self, state: &State, _valid_actions: &[String]) {
        self.state_stats
            .entry(state.id().clone())
            .or_default();
        if self.root.is_none() {
            self.root = Some(state.id().clone());
        }
    }

    fn pick(&mut self, graph: &Graph) -> Option<FrontierPair> {
        let frontier = graph.frontier();
        if frontier.is_empty() {
            return None;
        }

        let mut best_score = f64::NEG_INFINITY;
        let mut best: Vec<&FrontierPair> = Vec::new();
        for pair in frontier {
            let score = self.ucb1(pair);
            if score > best_score {
                best_score = score;
                best.clear();
                best.push(pair);
            } else if score == best_score {
                best.push(pair);
            }
        }

        let index = if best.len() > 1 {
            self.rng.random_range(0..best.len())
        } else {
            0
        };
        Some(best[index].clone())
    }

    fn feedback(&mut self, feedback: &StepFeedback) {
        let mut reward = 0.0;
        if feedback.violations > 0 {
            reward += self.violation_reward;
        }
        if feedback.new_state {
            reward += self.new_state_reward;
        }

        self.pair_stats
            .entry(feedback.picked.clone())
            .or_default()
            .record(reward);
        if feedback.new_state {
            if let Some(to) = &feedback.to_state {
                self.state_stats.entry(to.clone()).or_default();
                self.parents
                    .entry(to.clone())
                    .or_insert_with(|| feedback.picked.0.clone());
            }
        }

        // Backpropagate along the discovery chain up to the root.
        let mut cursor = Some(feedback.picked.0.clone());
        let mut hops = 0;
        while let Some(id) = cursor {
            self.state_stats.entry(id.clone()).or_default().record(reward);
            if Some(&id) == self.root.as_ref() {
                break;
            }
            cursor = self.parents.get(&id).cloned();
            hops += 1;
            if hops > self.state_stats.len() {
                // Defensive bound in case of a parent cycle.
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::graph_with_frontier;

    #[test]
    fn unvisited_pairs_are_tried_first() {
        let (graph, ids) = graph_with_frontier(&[(0, "a"), (0, "b")]);
        let mut mcts = Mcts::new(Some(5));

        let first = mcts.pick(&graph).unwrap();
        mcts.feedback(&StepFeedback {
            picked: first.clone(),
            to_state: Some(ids[0].clone()),
            new_state: false,
            violations: 0,
        });

        // The other, still-unvisited pair now scores infinity and wins.
        let second = mcts.pick(&graph).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn violations_bias_future_picks() {
        let (graph, ids) = graph_with_frontier(&[(0, "buggy"), (0, "boring")]);
        let mut mcts = Mcts::new(Some(9)).violation_reward(100.0);

        let buggy = (ids[0].clone(), "buggy".to_string());
        let boring = (ids[0].clone(), "boring".to_string());

        // Visit both once so neither scores infinity.
        mcts.feedback(&StepFeedback {
            picked: buggy.clone(),
            to_state: Some(ids[0].clone()),
            new_state: false,
            violations: 1,
        });
        mcts.feedback(&StepFeedback {
            picked: boring.clone(),
            to_state: Some(ids[0].clone()),
            new_state: false,
            violations: 0,
        });

        assert_eq!(mcts.pick(&graph), Some(buggy));
    }

    #[test]
    fn same_seed_same_tiebreaks() {
        let (graph, _) = graph_with_frontier(&[(0, "a"), (0, "b"), (1, "c")]);
        let picks = |seed| {
            let mut m = Mcts::new(Some(seed));
            (0..5).map(|_| m.pick(&graph).unwrap()).collect::<Vec<_>>()
        };
        assert_eq!(picks(2), picks(2));
    }
}
