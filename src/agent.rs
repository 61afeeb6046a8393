//! The exploration agent: the loop that drives everything.
//!
//! An [`Agent`] owns one [`World`], a registered set of actions and
//! invariants, and a [`Strategy`]. [`Agent::explore`] runs the loop:
//!
//! 1. ask the strategy for the next (state, action) pair,
//! 2. roll the world back to that state if it is not the current one,
//! 3. evaluate pre-action invariants,
//! 4. dispatch the action,
//! 5. observe, canonicalize and record the resulting state and transition,
//! 6. evaluate post-action invariants,
//! 7. feed the outcome back to the strategy,
//!
//! until the frontier is exhausted or a budget (steps, depth, coverage,
//! wall clock) is spent. The loop is strictly sequential: one request in
//! flight, one observation after it, one checkpoint after that.
//!
//! Construction validates the setup: duplicate action or invariant names,
//! preconditions naming unknown actions, and strategies whose restore
//! discipline the registered adapters cannot serve are all rejected before
//! anything touches the system under test.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;
use miette::Diagnostic;
use rustc_hash::FxHashSet;
use thiserror::Error;
use tracing::instrument;

use crate::action::Action;
use crate::adapters::RestoreOrder;
use crate::config::{ConfigError, ExplorationConfig};
use crate::graph::{FrontierPair, Graph};
use crate::invariant::{CheckOutcome, Invariant, Severity, Violation};
use crate::observe::{IdentityError, State, StateId};
use crate::result::{ExplorationResult, ExplorationStats, StopReason};
use crate::strategy::{StepFeedback, Strategy};
use crate::world::{World, WorldError};

/// Errors that stop an exploration from starting or from finishing.
///
/// Configuration errors (`exit_status` 2) are detected at construction;
/// infrastructure errors (`exit_status` 3) abort a running exploration
/// because the sandbox can no longer be trusted. Violations are *not*
/// errors; they are data on the [`ExplorationResult`].
#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    /// Two actions share a name.
    #[error("duplicate action name `{name}`")]
    #[diagnostic(
        code(roamgraph::agent::duplicate_action),
        help("Action names must be unique within an agent.")
    )]
    DuplicateAction { name: String },

    /// Two invariants share a name.
    #[error("duplicate invariant name `{name}`")]
    #[diagnostic(code(roamgraph::agent::duplicate_invariant))]
    DuplicateInvariant { name: String },

    /// An action's precondition names an unregistered action.
    #[error("action `{action}` has unknown precondition `{precondition}`")]
    #[diagnostic(
        code(roamgraph::agent::unknown_precondition),
        help("Preconditions must name actions registered on the same agent.")
    )]
    UnknownPrecondition { action: String, precondition: String },

    /// The strategy needs arbitrary-order restore but an adapter is
    /// stack-scoped.
    #[error("strategy `{strategy}` requires arbitrary-order restore, but adapter `{adapter}` is stack-scoped")]
    #[diagnostic(
        code(roamgraph::agent::incompatible_strategy),
        help("Use depth-first exploration with savepoint adapters, or swap in a file-backed adapter for this run.")
    )]
    IncompatibleStrategy { strategy: String, adapter: String },

    /// Configuration loading failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    /// A world operation (begin/end/checkpoint/rollback/observe) failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    World(#[from] WorldError),

    /// Observations could not be canonicalized into a state identity.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Identity(#[from] IdentityError),

    /// The strategy picked a state that has no restoring checkpoint.
    #[error("state {state} has no checkpoint to restore")]
    #[diagnostic(code(roamgraph::agent::missing_checkpoint))]
    MissingCheckpoint { state: StateId },
}

impl AgentError {
    /// Process exit status for an invoking CLI: `2` for configuration
    /// errors, `3` for infrastructure failures.
    #[must_use]
    pub fn exit_status(&self) -> i32 {
        match self {
            AgentError::DuplicateAction { .. }
            | AgentError::DuplicateInvariant { .. }
            | AgentError::UnknownPrecondition { .. }
            | AgentError::IncompatibleStrategy { .. }
            | AgentError::Config(_) => 2,
            AgentError::World(_) | AgentError::Identity(_) | AgentError::MissingCheckpoint { .. } => 3,
        }
    }
}

/// Handle for cooperatively cancelling a running exploration.
///
/// Cancellation is honored between loop iterations; the step in flight
/// runs to completion.
#[derive(Clone, Debug)]
pub struct CancellationHandle(Arc<AtomicBool>);

impl CancellationHandle {
    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Builder assembling a validated [`Agent`].
pub struct AgentBuilder {
    world: World,
    actions: Vec<Action>,
    invariants: Vec<Invariant>,
    strategy: Option<Box<dyn Strategy>>,
    config: ExplorationConfig,
}

impl AgentBuilder {
    /// Register an action.
    #[must_use]
    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Register several actions.
    #[must_use]
    pub fn actions<I>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = Action>,
    {
        self.actions.extend(actions);
        self
    }

    /// Register an invariant.
    #[must_use]
    pub fn invariant(mut self, invariant: Invariant) -> Self {
        self.invariants.push(invariant);
        self
    }

    /// Register several invariants.
    #[must_use]
    pub fn invariants<I>(mut self, invariants: I) -> Self
    where
        I: IntoIterator<Item = Invariant>,
    {
        self.invariants.extend(invariants);
        self
    }

    /// Use an explicit strategy instance instead of building one from the
    /// config's [`StrategyKind`](crate::config::StrategyKind).
    #[must_use]
    pub fn strategy(mut self, strategy: Box<dyn Strategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Set the run configuration.
    #[must_use]
    pub fn config(mut self, config: ExplorationConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate and build the agent.
    pub fn build(self) -> Result<Agent, AgentError> {
        let AgentBuilder {
            world,
            actions,
            invariants,
            strategy,
            config,
        } = self;

        let mut graph = Graph::new();
        let mut action_names: FxHashSet<String> = FxHashSet::default();
        for action in &actions {
            if !action_names.insert(action.name().to_string()) {
                return Err(AgentError::DuplicateAction {
                    name: action.name().to_string(),
                });
            }
        }
        for action in &actions {
            for precondition in action.preconditions() {
                if !action_names.contains(precondition) {
                    return Err(AgentError::UnknownPrecondition {
                        action: action.name().to_string(),
                        precondition: precondition.clone(),
                    });
                }
            }
        }
        for action in actions {
            graph.register_action(action);
        }

        let mut invariant_names: FxHashSet<&str> = FxHashSet::default();
        for invariant in &invariants {
            if !invariant_names.insert(invariant.name()) {
                return Err(AgentError::DuplicateInvariant {
                    name: invariant.name().to_string(),
                });
            }
        }

        let strategy = strategy.unwrap_or_else(|| config.strategy.build(config.seed));

        if strategy.restore_discipline() == RestoreOrder::Arbitrary {
            for adapter in world.adapters() {
                if adapter.restore_order() == RestoreOrder::Stack {
                    return Err(AgentError::IncompatibleStrategy {
                        strategy: strategy.name().to_string(),
                        adapter: adapter.name().to_string(),
                    });
                }
            }
        }

        Ok(Agent {
            world,
            graph,
            invariants,
            strategy,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
            violations: Vec::new(),
            invariants_checked: 0,
        })
    }
}

/// Moment an invariant is being evaluated at.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Moment {
    Pre,
    Post,
}

/// The exploration driver.
pub struct Agent {
    world: World,
    graph: Graph,
    invariants: Vec<Invariant>,
    strategy: Box<dyn Strategy>,
    config: ExplorationConfig,
    cancel: Arc<AtomicBool>,
    violations: Vec<Violation>,
    invariants_checked: u64,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("config", &self.config)
            .field("violations", &self.violations)
            .field("invariants_checked", &self.invariants_checked)
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Start building an agent around a world.
    #[must_use]
    pub fn builder(world: World) -> AgentBuilder {
        AgentBuilder {
            world,
            actions: Vec::new(),
            invariants: Vec::new(),
            strategy: None,
            config: ExplorationConfig::default(),
        }
    }

    /// A handle that cancels the exploration between iterations.
    #[must_use]
    pub fn cancellation_handle(&self) -> CancellationHandle {
        CancellationHandle(Arc::clone(&self.cancel))
    }

    /// Run the exploration to completion and return its result.
    ///
    /// Adapter run contexts are always torn down (`end`, which discards),
    /// including on error paths.
    #[instrument(skip(self), fields(strategy = self.strategy.name()))]
    pub async fn explore(mut self) -> Result<ExplorationResult, AgentError> {
        let started = Instant::now();

        if let Err(begin_err) = self.world.begin_all().await {
            let _ = self.world.end_all().await;
            return Err(begin_err.into());
        }

        let run_outcome = self.run(started).await;
        let end_outcome = self.world.end_all().await;

        let stop_reason = run_outcome?;
        end_outcome?;

        let stats = ExplorationStats {
            states_visited: self.graph.state_count(),
            transitions_taken: self.graph.transitions().len(),
            invariants_checked: self.invariants_checked,
            duration: started.elapsed(),
            actions_total: self.graph.actions().len(),
            actions_executed: self
                .graph
                .executed_actions()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        };

        tracing::info!(
            states = stats.states_visited,
            transitions = stats.transitions_taken,
            violations = self.violations.len(),
            stop = %stop_reason,
            "exploration finished"
        );

        Ok(ExplorationResult {
            graph: self.graph,
            violations: self.violations,
            stats,
            seed: self.config.seed,
            stop_reason,
        })
    }

    async fn run(&mut self, started: Instant) -> Result<StopReason, AgentError> {
        let observations = self.world.observe().await?;
        let initial = State::from_observations(observations)?;
        let (initial_id, _) = self.graph.add_state(initial);
        self.graph.set_initial(initial_id.clone());

        let root_checkpoint = self.world.checkpoint("initial").await?;
        self.graph.attach_checkpoint(&initial_id, root_checkpoint);
        self.enqueue_frontier(&initial_id);

        let mut current = initial_id;
        let deadline = self.config.run_timeout.map(|t| started + t);
        let mut steps = 0u64;

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return Ok(StopReason::Cancelled);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Ok(StopReason::TimedOut);
                }
            }
            if steps >= self.config.max_steps {
                return Ok(StopReason::MaxSteps);
            }
            if let Some(target) = self.config.coverage_target {
                if self.action_coverage() >= target {
                    return Ok(StopReason::CoverageReached);
                }
            }

            let Some(pair) = self.strategy.pick(&self.graph) else {
                return Ok(StopReason::FrontierExhausted);
            };
            steps += 1;

            match self.step(&pair, &mut current).await? {
                StepOutcome::Continue => {}
                StepOutcome::FailFast => return Ok(StopReason::FailFast),
            }
        }
    }

    /// Execute one picked pair. `current` tracks the state the world is in.
    async fn step(
        &mut self,
        pair: &FrontierPair,
        current: &mut StateId,
    ) -> Result<StepOutcome, AgentError> {
        let (state_id, action_name) = pair;

        if current != state_id {
            let checkpoint = self
                .graph
                .state(state_id)
                .and_then(State::checkpoint)
                .cloned()
                .ok_or_else(|| AgentError::MissingCheckpoint {
                    state: state_id.clone(),
                })?;
            self.world.rollback(&checkpoint).await?;
            *current = state_id.clone();
            self.verify_restored_state(state_id).await?;
        }

        let source_depth = self
            .graph
            .state(state_id)
            .map(State::depth)
            .unwrap_or_default();

        let (pre_violations, pre_critical) =
            self.check_invariants(Moment::Pre, state_id, action_name).await;
        if self.config.fail_fast && pre_critical {
            return Ok(StepOutcome::FailFast);
        }

        let Some(action) = self.graph.action(action_name).cloned() else {
            self.graph.mark_explored(pair);
            return Ok(StepOutcome::Continue);
        };

        tracing::debug!(state = %state_id, action = %action_name, "dispatching");
        let result = self.world.act(&action).await;
        self.graph.mark_explored(pair);

        if result.is_skipped() {
            self.strategy.feedback(&StepFeedback {
                picked: pair.clone(),
                to_state: None,
                new_state: false,
                violations: pre_violations,
            });
            self.release_exhausted(state_id, current).await;
            return Ok(StepOutcome::Continue);
        }

        self.graph.record_call(state_id, action_name);

        let observations = self.world.observe().await?;
        let post_state = State::from_observations(observations)?.at_depth(source_depth + 1);
        let (post_id, is_new) = self.graph.add_state(post_state);

        if is_new && self.within_depth_bound(&post_id) {
            let checkpoint = self.world.checkpoint(&format!("state-{post_id}")).await?;
            self.graph.attach_checkpoint(&post_id, checkpoint);
            self.enqueue_frontier(&post_id);
        }

        self.graph
            .add_transition(state_id.clone(), action_name.clone(), post_id.clone(), result);
        *current = post_id.clone();

        let (post_violations, post_critical) =
            self.check_invariants(Moment::Post, &post_id, action_name).await;

        self.strategy.feedback(&StepFeedback {
            picked: pair.clone(),
            to_state: Some(post_id.clone()),
            new_state: is_new,
            violations: pre_violations + post_violations,
        });

        self.release_exhausted(state_id, current).await;

        if self.config.fail_fast && post_critical {
            return Ok(StepOutcome::FailFast);
        }
        Ok(StepOutcome::Continue)
    }

    /// Compute the valid actions of a state and hand them to the graph's
    /// frontier and the strategy. States at the depth bound contribute no
    /// pairs.
    fn enqueue_frontier(&mut self, id: &StateId) {
        if !self.within_depth_bound(id) {
            return;
        }
        let names: Vec<String> = self
            .graph
            .valid_actions(id, self.world.context())
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        self.graph.push_frontier(id, names.clone());
        if let Some(state) = self.graph.state(id) {
            self.strategy.notify(state, &names);
        }
    }

    fn within_depth_bound(&self, id: &StateId) -> bool {
        let Some(max_depth) = self.config.max_depth else {
            return true;
        };
        self.graph
            .state(id)
            .map(|s| s.depth() < max_depth)
            .unwrap_or(false)
    }

    /// Evaluate all invariants covering the given moment; record any
    /// violations with a shortest-path reproduction. Returns the number of
    /// violations and whether any was critical.
    async fn check_invariants(
        &mut self,
        moment: Moment,
        state_id: &StateId,
        action_name: &str,
    ) -> (usize, bool) {
        let mut emitted = 0;
        let mut critical = false;

        for invariant in &self.invariants {
            let phase = invariant.evaluation_phase();
            let applies = match moment {
                Moment::Pre => phase.covers_pre(),
                Moment::Post => phase.covers_post(),
            };
            if !applies {
                continue;
            }
            self.invariants_checked += 1;

            let message = match invariant.evaluate(&self.world).await {
                Ok(CheckOutcome::Pass) => continue,
                Ok(CheckOutcome::Fail) => format!("invariant `{}` failed", invariant.name()),
                Ok(CheckOutcome::FailWith(message)) => message,
                Err(e) => e.to_string(),
            };

            let violation = Violation {
                invariant: invariant.name().to_string(),
                severity: invariant.severity_level(),
                message,
                state_id: state_id.clone(),
                action: action_name.to_string(),
                path: self.graph.path_from_initial(state_id).unwrap_or_default(),
                at: Utc::now(),
            };
            tracing::warn!(
                invariant = %violation.invariant,
                severity = %violation.severity,
                state = %violation.state_id,
                action = %violation.action,
                "violation recorded"
            );
            if violation.severity == Severity::Critical {
                critical = true;
            }
            self.violations.push(violation);
            emitted += 1;
        }
        (emitted, critical)
    }

    /// Warn when the post-rollback observation diverges from the restored
    /// state's identity (a background writer touching the system under
    /// test between observation and rollback).
    async fn verify_restored_state(&self, expected: &StateId) -> Result<(), AgentError> {
        let observations = self.world.observe().await?;
        let observed = StateId::compute(&observations)?;
        if &observed != expected {
            tracing::warn!(
                expected = %expected,
                observed = %observed,
                "post-rollback observation diverged from the checkpointed state"
            );
        }
        Ok(())
    }

    /// Release the source state's checkpoint once it has no unexplored
    /// pairs left and the world has moved on.
    async fn release_exhausted(&mut self, source: &StateId, current: &StateId) {
        if source == current || self.graph.has_frontier(source) {
            return;
        }
        if let Some(checkpoint) = self.graph.detach_checkpoint(source) {
            self.world.release(&checkpoint).await;
        }
    }

    fn action_coverage(&self) -> f64 {
        let total = self.graph.actions().len();
        if total == 0 {
            return 1.0;
        }
        self.graph.executed_actions().len() as f64 / total as f64
    }
}

enum StepOutcome {
    Continue,
    FailFast,
}
