//! The exploration graph: states, transitions and the unexplored frontier.
//!
//! The [`Graph`] is the agent's record of everything it knows about the
//! system under test: canonical states (deduplicated by [`StateId`]), the
//! append-only list of [`Transition`]s between them, the registered actions,
//! and the frontier of (state, action) pairs that are valid but have never
//! been executed. Frontier iteration order is insertion order, so two runs
//! that discover the same states in the same order see the same frontier.

use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

use crate::action::{Action, ActionResult};
use crate::context::Context;
use crate::observe::{State, StateId};
use crate::world::WorldCheckpoint;

/// A directed edge: executing `action` from `from` produced `to`.
#[derive(Clone, Debug, serde::Serialize)]
pub struct Transition {
    /// State the action was dispatched from.
    pub from: StateId,
    /// Name of the executed action.
    pub action: String,
    /// State observed after the action.
    pub to: StateId,
    /// The recorded outcome of the dispatch.
    pub result: ActionResult,
    /// When the transition was recorded.
    pub at: DateTime<Utc>,
}

/// An unexplored (state, action) pair.
pub type FrontierPair = (StateId, String);

/// States, transitions, registered actions and the unexplored frontier.
#[derive(Debug, Default)]
pub struct Graph {
    states: FxHashMap<StateId, State>,
    state_order: Vec<StateId>,
    transitions: Vec<Transition>,
    actions: Vec<Action>,
    action_index: FxHashMap<String, usize>,
    initial: Option<StateId>,
    explored: FxHashSet<FrontierPair>,
    frontier: Vec<FrontierPair>,
    frontier_set: FxHashSet<FrontierPair>,
    call_counts: FxHashMap<FrontierPair, u32>,
    execution_counts: FxHashMap<String, u64>,
}

impl Graph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action. Returns `false` when the name is already taken.
    pub(crate) fn register_action(&mut self, action: Action) -> bool {
        if self.action_index.contains_key(action.name()) {
            return false;
        }
        self.action_index
            .insert(action.name().to_string(), self.actions.len());
        self.actions.push(action);
        true
    }

    /// All registered actions, in registration order.
    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// A registered action, by name.
    #[must_use]
    pub fn action(&self, name: &str) -> Option<&Action> {
        self.action_index.get(name).map(|&i| &self.actions[i])
    }

    /// Add a state, deduplicating on identity.
    ///
    /// Returns the canonical id and whether the state was new.
    pub fn add_state(&mut self, state: State) -> (StateId, bool) {
        let id = state.id().clone();
        if self.states.contains_key(&id) {
            return (id, false);
        }
        self.state_order.push(id.clone());
        self.states.insert(id.clone(), state);
        (id, true)
    }

    /// Look up a state by id.
    #[must_use]
    pub fn state(&self, id: &StateId) -> Option<&State> {
        self.states.get(id)
    }

    /// All states, in discovery order.
    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.state_order.iter().filter_map(|id| self.states.get(id))
    }

    /// Number of distinct states.
    #[must_use]
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Mark a state as the initial state.
    pub fn set_initial(&mut self, id: StateId) {
        self.initial = Some(id);
    }

    /// The initial state's id, once set.
    #[must_use]
    pub fn initial_state_id(&self) -> Option<&StateId> {
        self.initial.as_ref()
    }

    /// Attach a restoring checkpoint to a state.
    pub fn attach_checkpoint(&mut self, id: &StateId, checkpoint: WorldCheckpoint) {
        if let Some(state) = self.states.get_mut(id) {
            state.attach_checkpoint(checkpoint);
        }
    }

    /// Detach a state's checkpoint (for release when it leaves the
    /// frontier).
    pub fn detach_checkpoint(&mut self, id: &StateId) -> Option<WorldCheckpoint> {
        self.states.get_mut(id).and_then(State::take_checkpoint)
    }

    /// Whether an action can execute from a state under the given context.
    ///
    /// All three gates of the valid-action filter must hold:
    /// preconditions are satisfied by the path history, `requires` fields
    /// match the state's observations, and the per-state call count is
    /// below the action's cap.
    #[must_use]
    pub fn can_execute(&self, action: &Action, state: &State, ctx: &Context) -> bool {
        if !action.preconditions().iter().all(|p| ctx.has_executed(p)) {
            return false;
        }
        if !action
            .required_fields()
            .iter()
            .all(|(field, expected)| state.lookup(field) == Some(expected))
        {
            return false;
        }
        if let Some(limit) = action.call_limit() {
            let calls = self
                .call_counts
                .get(&(state.id().clone(), action.name().to_string()))
                .copied()
                .unwrap_or(0);
            if calls >= limit {
                return false;
            }
        }
        true
    }

    /// The subset of registered actions valid from a state under the given
    /// context, in registration order.
    #[must_use]
    pub fn valid_actions(&self, id: &StateId, ctx: &Context) -> Vec<&Action> {
        let Some(state) = self.states.get(id) else {
            return Vec::new();
        };
        self.actions
            .iter()
            .filter(|action| self.can_execute(action, state, ctx))
            .collect()
    }

    /// Add valid pairs for a state to the frontier, skipping pairs already
    /// present or already explored.
    pub fn push_frontier<I>(&mut self, id: &StateId, actions: I)
    where
        I: IntoIterator<Item = String>,
    {
        for action in actions {
            let pair = (id.clone(), action);
            if self.explored.contains(&pair) || !self.frontier_set.insert(pair.clone()) {
                continue;
            }
            self.frontier.push(pair);
        }
    }

    /// The unexplored frontier, in insertion order.
    #[must_use]
    pub fn frontier(&self) -> &[FrontierPair] {
        &self.frontier
    }

    /// Whether a state still has unexplored pairs.
    #[must_use]
    pub fn has_frontier(&self, id: &StateId) -> bool {
        self.frontier.iter().any(|(sid, _)| sid == id)
    }

    /// Mark a pair as explored, removing it from the frontier.
    pub fn mark_explored(&mut self, pair: &FrontierPair) {
        if self.explored.insert(pair.clone()) {
            self.frontier_set.remove(pair);
            self.frontier.retain(|p| p != pair);
        }
    }

    /// Whether a pair has been explored.
    #[must_use]
    pub fn is_explored(&self, pair: &FrontierPair) -> bool {
        self.explored.contains(pair)
    }

    /// Count one execution of `action` from `state`.
    pub fn record_call(&mut self, id: &StateId, action: &str) {
        *self
            .call_counts
            .entry((id.clone(), action.to_string()))
            .or_insert(0) += 1;
        *self.execution_counts.entry(action.to_string()).or_insert(0) += 1;
    }

    /// How many times `action` has executed from `state`.
    #[must_use]
    pub fn calls(&self, id: &StateId, action: &str) -> u32 {
        self.call_counts
            .get(&(id.clone(), action.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// How many times `action` has executed anywhere in the run.
    #[must_use]
    pub fn execution_count(&self, action: &str) -> u64 {
        self.execution_counts.get(action).copied().unwrap_or(0)
    }

    /// Names of the actions executed at least once.
    #[must_use]
    pub fn executed_actions(&self) -> Vec<&str> {
        self.actions
            .iter()
            .map(Action::name)
            .filter(|name| self.execution_counts.contains_key(*name))
            .collect()
    }

    /// Record a transition. Append-only.
    pub fn add_transition(
        &mut self,
        from: StateId,
        action: impl Into<String>,
        to: StateId,
        result: ActionResult,
    ) {
        self.transitions.push(Transition {
            from,
            action: action.into(),
            to,
            result,
            at: Utc::now(),
        });
    }

    /// All recorded transitions, in execution order.
    #[must_use]
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Incoming transitions of a state.
    pub fn in_edges(&self, id: &StateId) -> impl Iterator<Item = &Transition> {
        self.transitions.iter().filter(move |t| &t.to == id)
    }

    /// Shortest action-name path between two states, by breadth-first
    /// search over recorded transitions. `Some(vec![])` when `from == to`.
    #[must_use]
    pub fn shortest_path(&self, from: &StateId, to: &StateId) -> Option<Vec<String>> {
        if from == to {
            return Some(Vec::new());
        }

        let mut adjacency: FxHashMap<&StateId, Vec<(&String, &StateId)>> = FxHashMap::default();
        for t in &self.transitions {
            adjacency
                .entry(&t.from)
                .or_default()
                .push((&t.action, &t.to));
        }

        let mut queue: VecDeque<&StateId> = VecDeque::new();
        let mut seen: FxHashSet<&StateId> = FxHashSet::default();
        let mut parent: FxHashMap<&StateId, (&StateId, &String)> = FxHashMap::default();

        queue.push_back(from);
        seen.insert(from);
        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = Vec::new();
                let mut cursor = current;
                while cursor != from {
                    let (prev, action) = parent[cursor];
                    path.push(action.clone());
                    cursor = prev;
                }
                path.reverse();
                return Some(path);
            }
            for &(action, next) in adjacency.get(current).into_iter().flatten() {
                if seen.insert(next) {
                    parent.insert(next, (current, action));
                    queue.push_back(next);
                }
            }
        }
        None
    }

    /// Shortest path from the initial state, for violation reproductions.
    #[must_use]
    pub fn path_from_initial(&self, to: &StateId) -> Option<Vec<String>> {
        self.shortest_path(self.initial.as_ref()?, to)
    }
}
