//! Exploration strategies: the policy picking the next (state, action) pair.
//!
//! A [`Strategy`] orders the graph's unexplored frontier. The agent calls
//! [`Strategy::notify`] whenever a new canonical state enters the graph,
//! [`Strategy::pick`] at the top of every loop iteration, and
//! [`Strategy::feedback`] after the step so reward-driven strategies (MCTS)
//! can learn from what happened.
//!
//! Each strategy declares its *restore discipline*: [`Dfs`] only ever
//! rolls back to the most recently checkpointed state
//! ([`RestoreOrder::Stack`]), while every other strategy may jump anywhere
//! in the graph and therefore needs adapters that support
//! [`RestoreOrder::Arbitrary`]. The agent enforces the pairing at
//! construction time.

mod breadth;
mod coverage;
mod depth;
mod mcts;
mod random;
mod weighted;

pub use breadth::Bfs;
pub use coverage::CoverageGuided;
pub use depth::Dfs;
pub use mcts::Mcts;
pub use random::RandomWalk;
pub use weighted::Weighted;

use crate::adapters::RestoreOrder;
use crate::graph::{FrontierPair, Graph};
use crate::observe::{State, StateId};

/// What the agent observed after executing a picked pair.
#[derive(Clone, Debug)]
pub struct StepFeedback {
    /// The pair that was executed.
    pub picked: FrontierPair,
    /// The state observed after the action, when one was recorded.
    pub to_state: Option<StateId>,
    /// Whether the post-action state was newly discovered.
    pub new_state: bool,
    /// How many violations the step emitted.
    pub violations: usize,
}

/// Policy selecting the next (state, action) pair to explore.
pub trait Strategy: Send {
    /// Short identifier used in logs and results.
    fn name(&self) -> &'static str;

    /// The restore ordering this strategy demands of every adapter.
    fn restore_discipline(&self) -> RestoreOrder;

    /// Called whenever a new canonical state is added to the graph, with
    /// the action names valid from it.
    fn notify(&mut self, _state: &State, _valid_actions: &[String]) {}

    /// Return the next pair to explore, or `None` when exploration is
    /// done. Implementations must only return pairs currently on the
    /// graph's frontier.
    fn pick(&mut self, graph: &Graph) -> Option<FrontierPair>;

    /// Called after each executed step with its outcome.
    fn feedback(&mut self, _feedback: &StepFeedback) {}
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;

    use serde_json::json;

    use crate::graph::Graph;
    use crate::observe::{Observation, State, StateId};

    /// Build a graph with distinct states and the given frontier pairs,
    /// expressed as (state index, action name).
    pub(crate) fn graph_with_frontier(pairs: &[(usize, &str)]) -> (Graph, Vec<StateId>) {
        let mut graph = Graph::new();
        let state_count = pairs.iter().map(|(i, _)| i + 1).max().unwrap_or(0);

        let mut ids = Vec::new();
        for i in 0..state_count {
            let mut data = BTreeMap::new();
            data.insert("n".to_string(), json!(i as i64));
            let state = State::from_observations(vec![Observation::new("db", data)]).unwrap();
            let (id, _) = graph.add_state(state);
            ids.push(id);
        }
        for (i, action) in pairs {
            let id = ids[*i].clone();
            graph.push_frontier(&id, [(*action).to_string()]);
        }
        (graph, ids)
    }
}
