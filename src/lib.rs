//! # Roamgraph: autonomous state-graph exploration for stateful HTTP APIs
//!
//! Roamgraph drives a stateful API through every reachable (state, action)
//! pair it can find, rolling back databases, caches and mocks between
//! branches so each explored path starts from a known state, and checking
//! user-supplied invariants after every step. Violations are recorded with
//! a shortest-path reproduction from the initial state.
//!
//! ## Core Concepts
//!
//! - **Actions**: named API operations with preconditions, observation
//!   requirements and per-state call caps
//! - **Invariants**: predicates over the world, evaluated before and/or
//!   after each action
//! - **World**: the API client plus every rollbackable adapter plus the
//!   per-path context
//! - **Graph**: canonical states (content-addressed by observation hash),
//!   transitions, and the unexplored frontier
//! - **Strategies**: BFS, DFS, random, coverage-guided, weighted and MCTS
//!   frontier policies
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use reqwest::Method;
//! use serde_json::json;
//!
//! use roamgraph::action::{Action, RequestTemplate};
//! use roamgraph::adapters::MemoryAdapter;
//! use roamgraph::agent::Agent;
//! use roamgraph::client::ApiClient;
//! use roamgraph::config::ExplorationConfig;
//! use roamgraph::invariant::{CheckOutcome, Invariant, Phase, Severity};
//! use roamgraph::world::World;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ApiClient::new("http://localhost:8080")?;
//! let orders = Arc::new(MemoryAdapter::new("orders"));
//! let world = World::new(client).with_adapter(orders.clone());
//!
//! let create_order = Action::request(
//!     "create_order",
//!     RequestTemplate::new(Method::POST, "/orders")
//!         .body(json!({"amount": 100}))
//!         .capture("/id", "order_id"),
//! );
//! let refund_order = Action::request(
//!     "refund_order",
//!     RequestTemplate::new(Method::POST, "/orders/{order_id}/refund"),
//! )
//! .precondition("create_order");
//!
//! let refund_at_most_once = Invariant::from_fn("refund_at_most_once", |world| {
//!     Box::pin(async move {
//!         let observations = world.observe().await?;
//!         let refunds = observations
//!             .iter()
//!             .find_map(|o| o.field("refunds").and_then(|v| v.as_i64()))
//!             .unwrap_or(0);
//!         Ok(CheckOutcome::from(refunds <= 1))
//!     })
//! })
//! .severity(Severity::Critical)
//! .phase(Phase::PostAction);
//!
//! let agent = Agent::builder(world)
//!     .action(create_order)
//!     .action(refund_order)
//!     .invariant(refund_at_most_once)
//!     .config(ExplorationConfig::new().with_max_steps(200))
//!     .build()?;
//!
//! let result = agent.explore().await?;
//! for violation in &result.violations {
//!     eprintln!("{violation}");
//! }
//! std::process::exit(result.exit_status());
//! # }
//! ```
//!
//! ## Rollback Across Backends
//!
//! Every external mutable system plugs in through the
//! [`Rollbackable`](adapters::Rollbackable) contract. Shipped adapters:
//! deep-copied in-memory containers, an external-API stub recorder, a
//! savepoint-scoped PostgreSQL adapter (`postgres` feature), a file-copy
//! SQLite adapter (`sqlite` feature) and a dump/restore Redis adapter
//! (`redis` feature). Savepoint adapters are stack-scoped and can only
//! serve depth-first exploration; the agent rejects incompatible pairings
//! at construction time.
//!
//! ## Module Guide
//!
//! - [`action`] - Action records, handlers and HTTP request templates
//! - [`invariant`] - Invariants, severities, phases and violations
//! - [`adapters`] - The rollbackable SPI and the shipped adapters
//! - [`world`] - Atomic checkpoint/rollback/observe across all adapters
//! - [`graph`] - States, transitions, frontier and shortest paths
//! - [`strategy`] - Frontier policies
//! - [`agent`] - The exploration loop
//! - [`result`] - Run results, counters and exit statuses
//! - [`config`] - Run options and environment loading
//! - [`client`] - The HTTP client for the system under test
//! - [`context`] - Per-path key-value state with snapshot/restore
//! - [`observe`] - Observations and canonical state identity
//! - [`telemetry`] - Tracing subscriber setup for embedders

pub mod action;
pub mod adapters;
pub mod agent;
pub mod client;
pub mod config;
pub mod context;
pub mod graph;
pub mod invariant;
pub mod observe;
pub mod result;
pub mod strategy;
pub mod telemetry;
pub mod utils;
pub mod world;
