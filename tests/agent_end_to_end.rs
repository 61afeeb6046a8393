//! End-to-end explorations against a mock system under test.
//!
//! The HTTP surface is served by `httpmock`; the stateful side effects the
//! API would have live in shared [`MemoryAdapter`]s that the action
//! handlers mutate, which is exactly the shape of a real deployment where
//! the adapters watch the database behind the API.

use std::collections::BTreeMap;
use std::sync::Arc;

use httpmock::prelude::*;
use serde_json::json;

use roamgraph::action::{Action, ActionOutcome};
use roamgraph::adapters::MemoryAdapter;
use roamgraph::agent::Agent;
use roamgraph::client::ApiClient;
use roamgraph::config::{ExplorationConfig, StrategyKind};
use roamgraph::invariant::{CheckOutcome, Invariant, Phase, Severity};
use roamgraph::result::StopReason;
use roamgraph::world::World;

fn payments_fixture() -> Arc<MemoryAdapter> {
    let mut initial = BTreeMap::new();
    initial.insert("orders".to_string(), json!(0));
    initial.insert("refunds".to_string(), json!(0));
    Arc::new(MemoryAdapter::with_initial("payments", initial))
}

/// `create_order` posts an order and remembers its id; `refund_order`
/// refunds it. Nothing stops a second refund: that is the bug under test.
async fn payment_actions(server: &MockServer, payments: &Arc<MemoryAdapter>) -> Vec<Action> {
    server
        .mock_async(|when, then| {
            when.method(POST).path("/orders");
            then.status(201).json_body(json!({"id": "ord_1"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/orders/ord_1/refund");
            then.status(200).json_body(json!({"refunded": true}));
        })
        .await;

    let db = payments.clone();
    let create_order = Action::from_fn("create_order", move |api, ctx| {
        let db = db.clone();
        Box::pin(async move {
            let resp = api.post("/orders", &json!({"amount": 100})).await?;
            if let Some(id) = resp.pointer("/id") {
                ctx.set("order_id", id.clone());
            }
            let orders = db.get("orders")?.and_then(|v| v.as_i64()).unwrap_or(0);
            db.insert("orders", json!(orders + 1))?;
            Ok(ActionOutcome::Response(resp))
        })
    });

    let db = payments.clone();
    let refund_order = Action::from_fn("refund_order", move |api, ctx| {
        let db = db.clone();
        Box::pin(async move {
            let Some(order_id) = ctx.get("order_id").and_then(|v| v.as_str()).map(String::from)
            else {
                return Ok(ActionOutcome::Skipped);
            };
            let resp = api
                .post(&format!("/orders/{order_id}/refund"), &json!({}))
                .await?;
            let refunds = db.get("refunds")?.and_then(|v| v.as_i64()).unwrap_or(0);
            db.insert("refunds", json!(refunds + 1))?;
            Ok(ActionOutcome::Response(resp))
        })
    });

    vec![create_order, refund_order]
}

fn refund_at_most_once(payments: &Arc<MemoryAdapter>) -> Invariant {
    let db = payments.clone();
    Invariant::from_fn("refund_at_most_once", move |_| {
        let db = db.clone();
        Box::pin(async move {
            let refunds = db.get("refunds")?.and_then(|v| v.as_i64()).unwrap_or(0);
            if refunds > 1 {
                Ok(CheckOutcome::FailWith(format!(
                    "{refunds} refunds recorded for a single order"
                )))
            } else {
                Ok(CheckOutcome::Pass)
            }
        })
    })
    .severity(Severity::Critical)
    .phase(Phase::PostAction)
}

#[tokio::test]
async fn bfs_finds_the_double_refund() {
    let server = MockServer::start_async().await;
    let payments = payments_fixture();

    let world =
        World::new(ApiClient::new(server.base_url()).unwrap()).with_adapter(payments.clone());
    let agent = Agent::builder(world)
        .actions(payment_actions(&server, &payments).await)
        .invariant(refund_at_most_once(&payments))
        .config(
            ExplorationConfig::new()
                .with_strategy(StrategyKind::Bfs)
                .with_max_steps(50)
                .with_max_depth(3),
        )
        .build()
        .unwrap();

    let result = agent.explore().await.unwrap();

    assert_eq!(result.stop_reason, StopReason::FrontierExhausted);
    assert_eq!(result.violations.len(), 1);
    assert_eq!(result.exit_status(), 1);

    let violation = &result.violations[0];
    assert_eq!(violation.invariant, "refund_at_most_once");
    assert_eq!(violation.severity, Severity::Critical);
    assert_eq!(
        violation.path,
        ["create_order", "refund_order", "refund_order"]
    );

    // The run tears down through `end`, restoring the fixture.
    assert_eq!(payments.get("orders").unwrap(), Some(json!(0)));
    assert_eq!(payments.get("refunds").unwrap(), Some(json!(0)));
}

#[tokio::test]
async fn violation_path_replays_to_a_failing_observation() {
    let server = MockServer::start_async().await;
    let payments = payments_fixture();

    let actions = payment_actions(&server, &payments).await;
    let world =
        World::new(ApiClient::new(server.base_url()).unwrap()).with_adapter(payments.clone());
    let agent = Agent::builder(world)
        .actions(actions.clone())
        .invariant(refund_at_most_once(&payments))
        .config(
            ExplorationConfig::new()
                .with_strategy(StrategyKind::Bfs)
                .with_max_steps(50)
                .with_max_depth(3),
        )
        .build()
        .unwrap();
    let result = agent.explore().await.unwrap();
    let path = result.violations[0].path.clone();

    // Replay the reproduction from a fresh initial world state.
    let mut replay_world =
        World::new(ApiClient::new(server.base_url()).unwrap()).with_adapter(payments.clone());
    replay_world.begin_all().await.unwrap();
    for name in &path {
        let action = actions.iter().find(|a| a.name() == name).unwrap();
        let outcome = replay_world.act(action).await;
        assert!(!outcome.is_skipped(), "replayed step `{name}` was skipped");
    }

    // The replayed observation violates the invariant again.
    let refunds = payments
        .get("refunds")
        .unwrap()
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    assert!(refunds > 1, "replay did not reproduce the double refund");
    replay_world.end_all().await.unwrap();
}

#[tokio::test]
async fn dfs_finds_the_stale_cache_read() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/items");
            then.status(201).json_body(json!({"id": "item_1"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/items/item_1");
            then.status(200).json_body(json!({"id": "item_1"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(DELETE).path("/items/item_1");
            then.status(204);
        })
        .await;

    let mut db_initial = BTreeMap::new();
    db_initial.insert("items".to_string(), json!(0));
    let db = Arc::new(MemoryAdapter::with_initial("db", db_initial));
    let cache = Arc::new(MemoryAdapter::new("cache"));

    let (d, c) = (db.clone(), cache.clone());
    let create_item = Action::from_fn("create_item", move |api, ctx| {
        let (d, c) = (d.clone(), c.clone());
        Box::pin(async move {
            let resp = api.post("/items", &json!({"name": "widget"})).await?;
            if let Some(id) = resp.pointer("/id") {
                ctx.set("item_id", id.clone());
            }
            let items = d.get("items")?.and_then(|v| v.as_i64()).unwrap_or(0);
            d.insert("items", json!(items + 1))?;
            c.insert("item_1", json!("widget"))?;
            Ok(ActionOutcome::Response(resp))
        })
    });

    let (d, c) = (db.clone(), cache.clone());
    let get_item = Action::from_fn("get_item", move |api, _| {
        let (d, c) = (d.clone(), c.clone());
        Box::pin(async move {
            let resp = api.get("/items/item_1").await?;
            // A cache hit for a row the database no longer has is the bug
            // this fixture exists to surface.
            let cached = c.get("item_1")?.is_some();
            let items = d.get("items")?.and_then(|v| v.as_i64()).unwrap_or(0);
            if cached && items == 0 {
                let stale = c.get("stale_reads")?.and_then(|v| v.as_i64()).unwrap_or(0);
                c.insert("stale_reads", json!(stale + 1))?;
            }
            Ok(ActionOutcome::Response(resp))
        })
    })
    .precondition("create_item");

    let d = db.clone();
    let delete_item = Action::from_fn("delete_item", move |api, _| {
        let d = d.clone();
        Box::pin(async move {
            let resp = api.delete("/items/item_1").await?;
            let items = d.get("items")?.and_then(|v| v.as_i64()).unwrap_or(0);
            d.insert("items", json!((items - 1).max(0)))?;
            // The cache entry is left behind: the missing invalidation.
            Ok(ActionOutcome::Response(resp))
        })
    })
    .precondition("create_item");

    let c = cache.clone();
    let no_stale_reads = Invariant::from_fn("deleted_items_are_not_served", move |_| {
        let c = c.clone();
        Box::pin(async move {
            let stale = c.get("stale_reads")?.and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(CheckOutcome::from(stale == 0))
        })
    })
    .severity(Severity::High)
    .phase(Phase::PostAction);

    let world = World::new(ApiClient::new(server.base_url()).unwrap())
        .with_adapter(db.clone())
        .with_adapter(cache.clone());
    let agent = Agent::builder(world)
        .action(create_item)
        .action(get_item)
        .action(delete_item)
        .invariant(no_stale_reads)
        .config(
            ExplorationConfig::new()
                .with_strategy(StrategyKind::Dfs)
                .with_max_steps(60)
                .with_max_depth(3),
        )
        .build()
        .unwrap();

    let result = agent.explore().await.unwrap();

    assert_eq!(result.violations.len(), 1);
    let violation = &result.violations[0];
    assert_eq!(violation.invariant, "deleted_items_are_not_served");
    assert_eq!(violation.path, ["create_item", "delete_item", "get_item"]);
}

#[tokio::test]
async fn refund_is_skipped_until_an_order_exists() {
    let server = MockServer::start_async().await;
    let payments = payments_fixture();

    let world =
        World::new(ApiClient::new(server.base_url()).unwrap()).with_adapter(payments.clone());
    let agent = Agent::builder(world)
        .actions(payment_actions(&server, &payments).await)
        .config(
            ExplorationConfig::new()
                .with_strategy(StrategyKind::Bfs)
                .with_max_steps(20)
                .with_max_depth(2),
        )
        .build()
        .unwrap();

    let result = agent.explore().await.unwrap();

    // The refund attempt from the initial state reported the skipped
    // sentinel: no transition, but the pair is spent.
    let initial = result.graph.initial_state_id().unwrap().clone();
    assert!(
        result
            .graph
            .transitions()
            .iter()
            .all(|t| !(t.from == initial && t.action == "refund_order")),
        "refund must never execute from the empty initial state"
    );
    assert!(result.graph.is_explored(&(initial, "refund_order".to_string())));

    // Refunds do run later on paths where create_order came first.
    assert!(
        result
            .graph
            .transitions()
            .iter()
            .any(|t| t.action == "refund_order")
    );
}
