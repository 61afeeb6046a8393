//! Actions: the named API operations the explorer may invoke.
//!
//! An [`Action`] bundles an async [`ActionHandler`] with the metadata the
//! graph uses to decide where the action is valid: `preconditions` (action
//! names that must already have executed on the path), `requires` (fields
//! that must hold given values in the current observations) and `max_calls`
//! (a per-state execution cap).
//!
//! Handlers come in two flavors, both compiling down to the same trait
//! object: closures via [`Action::from_fn`], and declarative HTTP request
//! templates via [`Action::request`] where path and body placeholders are
//! resolved from the [`Context`] and response fields can be captured back
//! into it.
//!
//! A handler that cannot proceed from the current path (a placeholder value
//! is missing, a guard fails) returns [`ActionOutcome::Skipped`]; skipping
//! is an ordinary value, not an error.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use miette::Diagnostic;
use reqwest::Method;
use serde_json::Value;
use thiserror::Error;

use crate::client::{ApiClient, ApiResponse, ClientError};
use crate::context::Context;

/// Errors raised by action handlers.
///
/// These abort the single action, never the exploration: the world wraps
/// them into [`ActionResult::Errored`] and the agent continues.
#[derive(Debug, Error, Diagnostic)]
pub enum ActionError {
    /// HTTP transport failure while talking to the system under test.
    #[error(transparent)]
    #[diagnostic(code(roamgraph::action::client))]
    Client(#[from] ClientError),

    /// A context value the handler depends on is missing.
    #[error("missing context value `{key}`")]
    #[diagnostic(
        code(roamgraph::action::missing_context),
        help("Gate the action with a precondition on the action that sets `{key}`, or return the skipped outcome.")
    )]
    MissingContext { key: String },

    /// JSON (de)serialization failure.
    #[error(transparent)]
    #[diagnostic(code(roamgraph::action::serde))]
    Serde(#[from] serde_json::Error),

    /// A test double or adapter the handler drives failed.
    #[error(transparent)]
    #[diagnostic(code(roamgraph::action::adapter))]
    Adapter(#[from] crate::adapters::AdapterError),

    /// Any other handler failure.
    #[error("{0}")]
    #[diagnostic(code(roamgraph::action::failed))]
    Failed(String),
}

/// What an action handler produced.
#[derive(Clone, Debug)]
pub enum ActionOutcome {
    /// The action ran and the system under test answered.
    Response(ApiResponse),
    /// The action declined to run from the current path state.
    Skipped,
}

/// The recorded outcome of dispatching an action, as stored on transitions.
#[derive(Clone, Debug, serde::Serialize)]
pub enum ActionResult {
    /// The action completed with an HTTP exchange.
    Completed {
        status: u16,
        body: Value,
        elapsed: Duration,
    },
    /// The action reported the skipped sentinel; no transition is recorded.
    Skipped,
    /// The handler raised; the transition is still recorded.
    Errored { message: String, elapsed: Duration },
}

impl ActionResult {
    /// Whether the action reported the skipped sentinel.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, ActionResult::Skipped)
    }

    /// Whether the handler raised.
    #[must_use]
    pub fn is_errored(&self) -> bool {
        matches!(self, ActionResult::Errored { .. })
    }

    /// The HTTP status, when the action completed.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            ActionResult::Completed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Async unit of API interaction.
///
/// Implementations receive the API client and the mutable per-path context;
/// they should be deterministic within a path. Handlers are shared across
/// the run via `Arc`, so they must be `Send + Sync`.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Execute against the system under test.
    async fn execute(
        &self,
        api: &ApiClient,
        ctx: &mut Context,
    ) -> Result<ActionOutcome, ActionError>;
}

type HandlerFn = dyn for<'a> Fn(&'a ApiClient, &'a mut Context) -> BoxFuture<'a, Result<ActionOutcome, ActionError>>
    + Send
    + Sync;

struct FnHandler(Box<HandlerFn>);

#[async_trait]
impl ActionHandler for FnHandler {
    async fn execute(
        &self,
        api: &ApiClient,
        ctx: &mut Context,
    ) -> Result<ActionOutcome, ActionError> {
        (self.0)(api, ctx).await
    }
}

/// A named, parameterized API operation.
///
/// # Examples
///
/// A closure-backed action that creates an order and remembers its id:
///
/// ```no_run
/// use roamgraph::action::{Action, ActionOutcome};
/// use serde_json::json;
///
/// let create_order = Action::from_fn("create_order", |api, ctx| {
///     Box::pin(async move {
///         let resp = api.post("/orders", &json!({"amount": 100})).await?;
///         if let Some(id) = resp.pointer("/id") {
///             ctx.set("order_id", id.clone());
///         }
///         Ok(ActionOutcome::Response(resp))
///     })
/// });
/// ```
///
/// The same thing declaratively, with a capture:
///
/// ```
/// use roamgraph::action::{Action, RequestTemplate};
/// use reqwest::Method;
/// use serde_json::json;
///
/// let create_order = Action::request(
///     "create_order",
///     RequestTemplate::new(Method::POST, "/orders")
///         .body(json!({"amount": 100}))
///         .capture("/id", "order_id"),
/// );
///
/// let refund_order = Action::request(
///     "refund_order",
///     RequestTemplate::new(Method::POST, "/orders/{order_id}/refund"),
/// )
/// .precondition("create_order");
/// ```
#[derive(Clone)]
pub struct Action {
    name: String,
    handler: Arc<dyn ActionHandler>,
    preconditions: Vec<String>,
    requires: BTreeMap<String, Value>,
    max_calls: Option<u32>,
    tags: Vec<String>,
}

impl Action {
    /// Wrap an [`ActionHandler`] implementation.
    #[must_use]
    pub fn new(name: impl Into<String>, handler: Arc<dyn ActionHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
            preconditions: Vec::new(),
            requires: BTreeMap::new(),
            max_calls: None,
            tags: Vec::new(),
        }
    }

    /// Build an action from an async closure.
    #[must_use]
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: for<'a> Fn(
                &'a ApiClient,
                &'a mut Context,
            ) -> BoxFuture<'a, Result<ActionOutcome, ActionError>>
            + Send
            + Sync
            + 'static,
    {
        Self::new(name, Arc::new(FnHandler(Box::new(f))))
    }

    /// Build an action from a declarative HTTP request template.
    #[must_use]
    pub fn request(name: impl Into<String>, template: RequestTemplate) -> Self {
        Self::new(name, Arc::new(template))
    }

    /// Require that the named action has executed earlier on the path.
    #[must_use]
    pub fn precondition(mut self, action: impl Into<String>) -> Self {
        self.preconditions.push(action.into());
        self
    }

    /// Require an observation field to equal a value for this action to be
    /// valid. Keys may be qualified (`db.orders`) or bare.
    #[must_use]
    pub fn requires(mut self, field: impl Into<String>, value: Value) -> Self {
        self.requires.insert(field.into(), value);
        self
    }

    /// Cap how many times this action may execute from one state.
    #[must_use]
    pub fn max_calls(mut self, max: u32) -> Self {
        self.max_calls = Some(max);
        self
    }

    /// Attach a free-form tag.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// The action's unique name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Action names that must precede this one on the path.
    #[must_use]
    pub fn preconditions(&self) -> &[String] {
        &self.preconditions
    }

    /// Observation fields this action requires, with their expected values.
    #[must_use]
    pub fn required_fields(&self) -> &BTreeMap<String, Value> {
        &self.requires
    }

    /// Per-state execution cap, if any.
    #[must_use]
    pub fn call_limit(&self) -> Option<u32> {
        self.max_calls
    }

    /// Free-form tags.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Execute the underlying handler.
    pub(crate) async fn execute(
        &self,
        api: &ApiClient,
        ctx: &mut Context,
    ) -> Result<ActionOutcome, ActionError> {
        self.handler.execute(api, ctx).await
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("preconditions", &self.preconditions)
            .field("requires", &self.requires)
            .field("max_calls", &self.max_calls)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

/// Declarative HTTP request template.
///
/// `{placeholder}` segments in the path and in string values of the body are
/// resolved from the context at execution time. A template whose placeholder
/// has no context value reports [`ActionOutcome::Skipped`] instead of
/// executing: an unresolvable request is a dead end on this path, not a
/// failure.
#[derive(Clone, Debug)]
pub struct RequestTemplate {
    method: Method,
    path: String,
    body: Option<Value>,
    captures: Vec<(String, String)>,
}

impl RequestTemplate {
    /// A template for `method` against a path relative to the client's base
    /// URL.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            captures: Vec::new(),
        }
    }

    /// JSON body template; string values may contain `{placeholders}`.
    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Capture a response body field (by JSON pointer) into a context key
    /// after a successful exchange.
    #[must_use]
    pub fn capture(mut self, pointer: impl Into<String>, key: impl Into<String>) -> Self {
        self.captures.push((pointer.into(), key.into()));
        self
    }
}

#[async_trait]
impl ActionHandler for RequestTemplate {
    async fn execute(
        &self,
        api: &ApiClient,
        ctx: &mut Context,
    ) -> Result<ActionOutcome, ActionError> {
        let path = match resolve_placeholders(&self.path, ctx) {
            Some(path) => path,
            None => return Ok(ActionOutcome::Skipped),
        };
        let body = match &self.body {
            Some(template) => match resolve_value(template, ctx) {
                Some(body) => Some(body),
                None => return Ok(ActionOutcome::Skipped),
            },
            None => None,
        };

        let resp = api.request(self.method.clone(), &path, body).await?;

        if resp.is_success() {
            for (pointer, key) in &self.captures {
                if let Some(value) = resp.pointer(pointer) {
                    ctx.set(key.clone(), value.clone());
                }
            }
        }
        Ok(ActionOutcome::Response(resp))
    }
}

/// Substitute `{key}` placeholders from the context; `None` when any key is
/// absent.
fn resolve_placeholders(template: &str, ctx: &Context) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let (head, tail) = rest.split_at(start);
        out.push_str(head);
        let end = tail.find('}')?;
        let key = &tail[1..end];
        let value = ctx.get(key)?;
        match value {
            Value::String(s) => out.push_str(s),
            other => out.push_str(&other.to_string()),
        }
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    Some(out)
}

/// Resolve placeholders inside every string of a body template.
fn resolve_value(template: &Value, ctx: &Context) -> Option<Value> {
    match template {
        Value::String(s) => {
            // A string that is exactly one placeholder keeps the context
            // value's JSON type; embedded placeholders stringify.
            if s.starts_with('{') && s.ends_with('}') && s.len() > 2 && !s[1..s.len() - 1].contains(['{', '}']) {
                let key = &s[1..s.len() - 1];
                return ctx.get(key).cloned();
            }
            resolve_placeholders(s, ctx).map(Value::String)
        }
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, ctx))
            .collect::<Option<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, ctx)?);
            }
            Some(Value::Object(out))
        }
        other => Some(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn placeholders_resolve_from_context() {
        let mut ctx = Context::new();
        ctx.set("order_id", json!("ord_9"));
        assert_eq!(
            resolve_placeholders("/orders/{order_id}/refund", &ctx).as_deref(),
            Some("/orders/ord_9/refund")
        );
    }

    #[test]
    fn missing_placeholder_yields_none() {
        let ctx = Context::new();
        assert_eq!(resolve_placeholders("/orders/{order_id}", &ctx), None);
    }

    #[test]
    fn numeric_placeholders_render_bare() {
        let mut ctx = Context::new();
        ctx.set("id", json!(12));
        assert_eq!(
            resolve_placeholders("/orders/{id}", &ctx).as_deref(),
            Some("/orders/12")
        );
    }

    #[test]
    fn body_placeholder_keeps_json_type() {
        let mut ctx = Context::new();
        ctx.set("amount", json!(100));
        let body = resolve_value(&json!({"amount": "{amount}", "note": "order {amount}"}), &ctx);
        assert_eq!(
            body,
            Some(json!({"amount": 100, "note": "order 100"}))
        );
    }

    #[test]
    fn body_with_missing_key_yields_none() {
        let ctx = Context::new();
        assert_eq!(resolve_value(&json!({"id": "{missing}"}), &ctx), None);
    }

    #[test]
    fn builder_collects_metadata() {
        let action = Action::request(
            "refund_order",
            RequestTemplate::new(Method::POST, "/orders/{order_id}/refund"),
        )
        .precondition("create_order")
        .requires("db.orders", json!(1))
        .max_calls(2)
        .tag("payments");

        assert_eq!(action.name(), "refund_order");
        assert_eq!(action.preconditions(), ["create_order"]);
        assert_eq!(action.required_fields().get("db.orders"), Some(&json!(1)));
        assert_eq!(action.call_limit(), Some(2));
        assert_eq!(action.tags(), ["payments"]);
    }
}
