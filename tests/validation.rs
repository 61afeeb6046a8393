//! Construction-time validation: the agent refuses broken setups before
//! touching the system under test.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use roamgraph::action::{Action, ActionOutcome};
use roamgraph::adapters::{
    AdapterError, MemoryAdapter, RestoreOrder, Rollbackable, SystemCheckpoint,
};
use roamgraph::agent::{Agent, AgentError};
use roamgraph::client::ApiClient;
use roamgraph::config::{ExplorationConfig, StrategyKind};
use roamgraph::invariant::{CheckOutcome, Invariant};
use roamgraph::observe::Observation;
use roamgraph::world::World;

/// A savepoint-style adapter: stack-scoped restore only.
struct StackScopedAdapter;

#[async_trait]
impl Rollbackable for StackScopedAdapter {
    fn name(&self) -> &str {
        "savepoint_db"
    }

    fn restore_order(&self) -> RestoreOrder {
        RestoreOrder::Stack
    }

    async fn begin(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn end(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn checkpoint(&self, name: &str) -> Result<SystemCheckpoint, AdapterError> {
        Ok(SystemCheckpoint::new(name))
    }

    async fn rollback(&self, _checkpoint: &SystemCheckpoint) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn observe(&self) -> Result<Observation, AdapterError> {
        Ok(Observation::new("savepoint_db", BTreeMap::new()))
    }
}

fn offline_client() -> ApiClient {
    ApiClient::new("http://127.0.0.1:9").unwrap()
}

fn noop(name: &str) -> Action {
    Action::from_fn(name, |_, _| Box::pin(async { Ok(ActionOutcome::Skipped) }))
}

fn pass(name: &str) -> Invariant {
    Invariant::from_fn(name, |_| Box::pin(async { Ok(CheckOutcome::Pass) }))
}

#[test]
fn bfs_refuses_stack_scoped_adapters() {
    let world = World::new(offline_client()).with_adapter(Arc::new(StackScopedAdapter));
    let err = Agent::builder(world)
        .action(noop("ping"))
        .config(ExplorationConfig::new().with_strategy(StrategyKind::Bfs))
        .build()
        .unwrap_err();

    assert!(matches!(
        err,
        AgentError::IncompatibleStrategy { ref strategy, ref adapter }
            if strategy == "bfs" && adapter == "savepoint_db"
    ));
    assert_eq!(err.exit_status(), 2);
}

#[test]
fn dfs_accepts_stack_scoped_adapters() {
    let world = World::new(offline_client()).with_adapter(Arc::new(StackScopedAdapter));
    let agent = Agent::builder(world)
        .action(noop("ping"))
        .config(ExplorationConfig::new().with_strategy(StrategyKind::Dfs))
        .build();
    assert!(agent.is_ok());
}

#[test]
fn random_weighted_and_mcts_also_refuse_stack_scoped_adapters() {
    for kind in [
        StrategyKind::Random,
        StrategyKind::Coverage,
        StrategyKind::Weighted,
        StrategyKind::Mcts,
    ] {
        let world = World::new(offline_client()).with_adapter(Arc::new(StackScopedAdapter));
        let err = Agent::builder(world)
            .action(noop("ping"))
            .config(
                ExplorationConfig::new()
                    .with_strategy(kind)
                    .with_seed(1),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, AgentError::IncompatibleStrategy { .. }), "{kind}");
    }
}

#[test]
fn duplicate_action_names_are_rejected() {
    let world = World::new(offline_client()).with_adapter(Arc::new(MemoryAdapter::new("store")));
    let err = Agent::builder(world)
        .action(noop("create"))
        .action(noop("create"))
        .build()
        .unwrap_err();

    assert!(matches!(err, AgentError::DuplicateAction { ref name } if name == "create"));
    assert_eq!(err.exit_status(), 2);
}

#[test]
fn duplicate_invariant_names_are_rejected() {
    let world = World::new(offline_client()).with_adapter(Arc::new(MemoryAdapter::new("store")));
    let err = Agent::builder(world)
        .action(noop("ping"))
        .invariant(pass("consistent"))
        .invariant(pass("consistent"))
        .build()
        .unwrap_err();

    assert!(matches!(err, AgentError::DuplicateInvariant { ref name } if name == "consistent"));
}

#[test]
fn unknown_preconditions_are_rejected() {
    let world = World::new(offline_client()).with_adapter(Arc::new(MemoryAdapter::new("store")));
    let err = Agent::builder(world)
        .action(noop("refund").precondition("create"))
        .build()
        .unwrap_err();

    assert!(matches!(
        err,
        AgentError::UnknownPrecondition { ref action, ref precondition }
            if action == "refund" && precondition == "create"
    ));
    assert_eq!(err.exit_status(), 2);
}

#[tokio::test]
async fn infrastructure_errors_map_to_exit_status_three() {
    /// Checkpointing fails immediately, so the bootstrap checkpoint aborts
    /// the run.
    struct NoCheckpoints;

    #[async_trait]
    impl Rollbackable for NoCheckpoints {
        fn name(&self) -> &str {
            "fragile"
        }

        async fn begin(&self) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn end(&self) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn checkpoint(&self, _name: &str) -> Result<SystemCheckpoint, AdapterError> {
            Err(AdapterError::Backend {
                system: "fragile".to_string(),
                message: "no space".to_string(),
            })
        }

        async fn rollback(&self, _checkpoint: &SystemCheckpoint) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn observe(&self) -> Result<Observation, AdapterError> {
            let mut data = BTreeMap::new();
            data.insert("ok".to_string(), json!(true));
            Ok(Observation::new("fragile", data))
        }
    }

    let world = World::new(offline_client()).with_adapter(Arc::new(NoCheckpoints));
    let agent = Agent::builder(world)
        .action(noop("ping"))
        .config(ExplorationConfig::new().with_strategy(StrategyKind::Dfs))
        .build()
        .unwrap();

    let err = agent.explore().await.unwrap_err();
    assert_eq!(err.exit_status(), 3);
}
