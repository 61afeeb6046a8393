//! The rollbackable adapter protocol.
//!
//! Every external mutable system the explorer touches (relational
//! databases, caches, in-memory mocks, recorded external APIs) plugs in
//! through the same contract: [`Rollbackable`]. An adapter can bracket the
//! whole run (`begin`/`end`), capture its current state into an opaque
//! [`SystemCheckpoint`], restore exactly that state later, and summarize
//! itself into a deterministic [`Observation`] used for state identity.
//!
//! Adapters differ in their *restore discipline*: most can restore any
//! checkpoint in any order ([`RestoreOrder::Arbitrary`]), but savepoint-based
//! database adapters can only unwind to an earlier point, invalidating
//! everything after it ([`RestoreOrder::Stack`]). Strategies declare the
//! discipline they need and the agent refuses incompatible pairings at
//! construction time.
//!
//! All methods take `&self`; implementations use interior mutability so a
//! shared handle can be captured by action closures and test fixtures.

mod memory;
mod recorder;

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "redis")]
mod redis_cache;
#[cfg(feature = "sqlite")]
mod sqlite_file;

pub use memory::MemoryAdapter;
pub use recorder::{RecordedRequest, RecorderAdapter, Stub};

#[cfg(feature = "postgres")]
pub use postgres::PostgresAdapter;
#[cfg(feature = "redis")]
pub use redis_cache::RedisAdapter;
#[cfg(feature = "sqlite")]
pub use sqlite_file::SqliteFileAdapter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use thiserror::Error;
use uuid::Uuid;

use crate::observe::Observation;

/// Which restore orderings an adapter supports, and which a strategy needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestoreOrder {
    /// Only the most recent live checkpoint can be restored; restoring an
    /// earlier one invalidates everything taken after it (nested database
    /// savepoints).
    Stack,
    /// Any live checkpoint can be restored at any time (file copies, key
    /// dumps, deep-copied containers).
    Arbitrary,
}

/// Errors raised by adapter operations.
#[derive(Debug, Error, Diagnostic)]
pub enum AdapterError {
    /// The adapter was used before `begin` or after `end`.
    #[error("adapter `{system}` has no active session")]
    #[diagnostic(
        code(roamgraph::adapter::not_active),
        help("Call `begin()` once before checkpointing, rolling back or observing.")
    )]
    NotActive { system: String },

    /// A checkpoint handle is unknown to this adapter (already released, or
    /// invalidated by a stack-ordered rollback).
    #[error("adapter `{system}` does not know checkpoint {id}")]
    #[diagnostic(code(roamgraph::adapter::unknown_checkpoint))]
    UnknownCheckpoint { system: String, id: Uuid },

    /// Backend failure (database, cache, filesystem).
    #[error("adapter `{system}` backend error: {message}")]
    #[diagnostic(code(roamgraph::adapter::backend))]
    Backend { system: String, message: String },

    /// Filesystem failure (file-backed adapters).
    #[error("adapter `{system}` I/O error: {source}")]
    #[diagnostic(code(roamgraph::adapter::io))]
    Io {
        system: String,
        #[source]
        source: std::io::Error,
    },
}

impl AdapterError {
    pub(crate) fn backend(system: impl Into<String>, message: impl ToString) -> Self {
        AdapterError::Backend {
            system: system.into(),
            message: message.to_string(),
        }
    }
}

/// Opaque handle to one adapter's captured state.
///
/// The handle itself carries no payload; each adapter keeps its own ledger
/// keyed by the handle's id (a savepoint name, a temp file path, a byte
/// dump). Dropping a handle without [`Rollbackable::release`] leaks nothing
/// more than that ledger entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemCheckpoint {
    id: Uuid,
    name: String,
    taken_at: DateTime<Utc>,
}

impl SystemCheckpoint {
    /// Mint a fresh handle for a named checkpoint.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            taken_at: Utc::now(),
        }
    }

    /// Unique id of this handle.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The name the checkpoint was taken under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// When the checkpoint was taken.
    #[must_use]
    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }
}

/// A labelled scalar query a database adapter runs to build its observation.
///
/// Each query must return one row with one column, typically a count or an
/// aggregate, and the label becomes the observation field name:
///
/// ```
/// use roamgraph::adapters::ObserveQuery;
///
/// let orders = ObserveQuery::new("orders", "SELECT count(*) FROM orders");
/// assert_eq!(orders.label, "orders");
/// ```
#[derive(Clone, Debug)]
pub struct ObserveQuery {
    /// Observation field name.
    pub label: String,
    /// Single-row, single-column SQL.
    pub sql: String,
}

impl ObserveQuery {
    /// Create a labelled observation query.
    #[must_use]
    pub fn new(label: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            sql: sql.into(),
        }
    }
}

/// Uniform checkpoint/rollback/observe contract over an external system.
///
/// # Contract
///
/// - `begin` and `end` bracket one exploration run; `end` must discard all
///   effects, never commit.
/// - `rollback(h)` restores the system to exactly what `observe()` returned
///   when `h` was taken.
/// - `observe` is deterministic, comparison-safe and cheap (target:
///   sub-millisecond for typical fixtures); its data feeds state identity.
/// - `release(h)` frees resources held for `h`; it is advisory and must be
///   safe to call for handles a stack-ordered rollback already invalidated.
#[async_trait]
pub trait Rollbackable: Send + Sync {
    /// The system name used as the adapter registry key and the
    /// observation's `system` field.
    fn name(&self) -> &str;

    /// Restore orderings this adapter can service.
    fn restore_order(&self) -> RestoreOrder {
        RestoreOrder::Arbitrary
    }

    /// Acquire the enclosing transactional context for the run.
    async fn begin(&self) -> Result<(), AdapterError>;

    /// Tear down the run context, discarding all effects.
    async fn end(&self) -> Result<(), AdapterError>;

    /// Capture the current state under an opaque handle.
    async fn checkpoint(&self, name: &str) -> Result<SystemCheckpoint, AdapterError>;

    /// Restore the state captured by `checkpoint`.
    async fn rollback(&self, checkpoint: &SystemCheckpoint) -> Result<(), AdapterError>;

    /// Free resources held for a checkpoint that will not be restored again.
    async fn release(&self, _checkpoint: &SystemCheckpoint) -> Result<(), AdapterError> {
        Ok(())
    }

    /// Summarize the current state for identity comparison.
    async fn observe(&self) -> Result<Observation, AdapterError>;
}
