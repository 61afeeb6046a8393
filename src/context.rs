//! Per-path scratch state carried alongside the system under test.
//!
//! The [`Context`] is the explorer's working memory for a single path through
//! the state graph: identifiers captured from responses (`order_id`,
//! `auth_token`, ...) plus the ordered record of action names executed on the
//! path. It is checkpointed and rolled back together with every external
//! system, so a branch always resumes with exactly the values it had when the
//! checkpoint was taken.
//!
//! # Snapshot semantics
//!
//! [`Context::snapshot`] produces an independent deep copy;
//! [`Context::restore`] replaces the entire contents. Mutating the live
//! context never affects an existing snapshot:
//!
//! ```
//! use roamgraph::context::Context;
//! use serde_json::json;
//!
//! let mut ctx = Context::new();
//! ctx.set("order_id", json!("ord_1"));
//!
//! let snap = ctx.snapshot();
//! ctx.set("order_id", json!("ord_2"));
//! ctx.delete("order_id");
//!
//! ctx.restore(snap);
//! assert_eq!(ctx.get("order_id"), Some(&json!("ord_1")));
//! ```

use std::collections::BTreeMap;

use serde_json::Value;

/// Deep copy of a [`Context`] at a point in time.
///
/// Bundled into every world-level checkpoint so rollback restores the
/// context in the same motion as the external systems.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContextSnapshot {
    values: BTreeMap<String, Value>,
    history: Vec<String>,
}

impl ContextSnapshot {
    /// Names of the actions executed on the path at snapshot time.
    #[must_use]
    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// The captured key-value contents.
    #[must_use]
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }
}

/// Ordered key-value store scoped to one exploration path.
///
/// Keys iterate in lexicographic order, which keeps anything derived from a
/// context (logs, template resolution, equality checks) deterministic across
/// runs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Context {
    values: BTreeMap<String, Value>,
    history: Vec<String>,
}

impl Context {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Store a value, replacing any previous value for the key.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Remove a key, returning its value if present.
    pub fn delete(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Whether a key is present.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// All keys in lexicographic order.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.values.keys().map(String::as_str).collect()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The ordered names of actions executed on this path.
    ///
    /// Actions that reported the skipped outcome are not recorded.
    #[must_use]
    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Whether the named action has executed on this path.
    #[must_use]
    pub fn has_executed(&self, action: &str) -> bool {
        self.history.iter().any(|a| a == action)
    }

    /// Append an executed action name to the path history.
    pub(crate) fn record_action(&mut self, name: impl Into<String>) {
        self.history.push(name.into());
    }

    /// Produce an independent deep copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            values: self.values.clone(),
            history: self.history.clone(),
        }
    }

    /// Replace the entire contents with a previously taken snapshot.
    pub fn restore(&mut self, snapshot: ContextSnapshot) {
        self.values = snapshot.values;
        self.history = snapshot.history;
    }

    /// The full key-value contents as an ordered map.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, Value> {
        self.values.clone()
    }
}
