//! PostgreSQL adapter backed by nested savepoints.
//!
//! `begin` opens one long-running transaction on a dedicated connection and
//! every checkpoint is a nested `SAVEPOINT` inside it; `end` issues the
//! outer `ROLLBACK`, so the database never sees a commit from an exploration
//! run. Savepoints are stack-scoped: rolling back to an earlier savepoint
//! invalidates every savepoint taken after it, which is why this adapter
//! reports [`RestoreOrder::Stack`] and can only serve strategies with a
//! stack restore discipline (depth-first exploration). Projects that need
//! breadth-first exploration over a SQL fixture should swap in the
//! file-backed SQLite adapter for the run.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use sqlx::{Connection, PgConnection, Row};
use uuid::Uuid;

use crate::adapters::{AdapterError, ObserveQuery, RestoreOrder, Rollbackable, SystemCheckpoint};
use crate::observe::Observation;

/// Savepoint-based rollback over a PostgreSQL database.
///
/// The enclosing transaction is exclusive to the explorer for the whole
/// run; no other writer may touch the database while it is active.
pub struct PostgresAdapter {
    name: String,
    url: String,
    conn: tokio::sync::Mutex<Option<PgConnection>>,
    savepoints: Mutex<FxHashMap<Uuid, (u64, String)>>,
    counter: AtomicU64,
    observations: Vec<ObserveQuery>,
}

impl PostgresAdapter {
    /// Create an adapter for the database at `url`. Nothing connects until
    /// `begin`.
    #[must_use]
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            conn: tokio::sync::Mutex::new(None),
            savepoints: Mutex::new(FxHashMap::default()),
            counter: AtomicU64::new(0),
            observations: Vec::new(),
        }
    }

    /// Add a labelled scalar query to the observation set.
    #[must_use]
    pub fn with_observation(mut self, label: impl Into<String>, sql: impl Into<String>) -> Self {
        self.observations.push(ObserveQuery::new(label, sql));
        self
    }

    /// Run a statement inside the enclosing transaction.
    ///
    /// The system under test must write through this adapter's connection
    /// (or a session sharing its transaction) for savepoint rollback to
    /// cover its effects; this is also how fixtures seed data for a run.
    pub async fn execute(&self, sql: &str) -> Result<(), AdapterError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(|| AdapterError::NotActive {
            system: self.name.clone(),
        })?;
        sqlx::query(sql)
            .execute(conn)
            .await
            .map(|_| ())
            .map_err(|e| AdapterError::backend(&self.name, e))
    }

    fn lock_savepoints(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, FxHashMap<Uuid, (u64, String)>>, AdapterError> {
        self.savepoints
            .lock()
            .map_err(|e| AdapterError::backend(&self.name, format!("lock poisoned: {e}")))
    }
}

#[async_trait]
impl Rollbackable for PostgresAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn restore_order(&self) -> RestoreOrder {
        RestoreOrder::Stack
    }

    async fn begin(&self) -> Result<(), AdapterError> {
        let mut guard = self.conn.lock().await;
        if guard.is_some() {
            return Err(AdapterError::backend(
                &self.name,
                "begin called twice without end",
            ));
        }
        let mut conn = PgConnection::connect(&self.url)
            .await
            .map_err(|e| AdapterError::backend(&self.name, e))?;
        sqlx::query("BEGIN")
            .execute(&mut conn)
            .await
            .map_err(|e| AdapterError::backend(&self.name, e))?;
        *guard = Some(conn);
        Ok(())
    }

    async fn end(&self) -> Result<(), AdapterError> {
        let mut guard = self.conn.lock().await;
        if let Some(mut conn) = guard.take() {
            // The outer transaction is always rolled back, never committed.
            sqlx::query("ROLLBACK")
                .execute(&mut conn)
                .await
                .map_err(|e| AdapterError::backend(&self.name, e))?;
            conn.close()
                .await
                .map_err(|e| AdapterError::backend(&self.name, e))?;
        }
        self.lock_savepoints()?.clear();
        Ok(())
    }

    async fn checkpoint(&self, name: &str) -> Result<SystemCheckpoint, AdapterError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(|| AdapterError::NotActive {
            system: self.name.clone(),
        })?;

        let seq = self.counter.fetch_add(1, Ordering::SeqCst);
        let savepoint = format!("roamgraph_sp_{seq}");
        sqlx::query(&format!("SAVEPOINT {savepoint}"))
            .execute(conn)
            .await
            .map_err(|e| AdapterError::backend(&self.name, e))?;

        let handle = SystemCheckpoint::new(name);
        self.lock_savepoints()?
            .insert(handle.id(), (seq, savepoint));
        Ok(handle)
    }

    async fn rollback(&self, checkpoint: &SystemCheckpoint) -> Result<(), AdapterError> {
        let (seq, savepoint) = self
            .lock_savepoints()?
            .get(&checkpoint.id())
            .cloned()
            .ok_or_else(|| AdapterError::UnknownCheckpoint {
                system: self.name.clone(),
                id: checkpoint.id(),
            })?;

        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(|| AdapterError::NotActive {
            system: self.name.clone(),
        })?;
        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {savepoint}"))
            .execute(conn)
            .await
            .map_err(|e| AdapterError::backend(&self.name, e))?;

        // Savepoints taken after the target are destroyed by the rollback.
        self.lock_savepoints()?.retain(|_, (s, _)| *s <= seq);
        Ok(())
    }

    async fn release(&self, checkpoint: &SystemCheckpoint) -> Result<(), AdapterError> {
        let entry = self.lock_savepoints()?.remove(&checkpoint.id());
        let Some((_, savepoint)) = entry else {
            // Already invalidated by a stack rollback; nothing to free.
            return Ok(());
        };
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_mut() {
            if let Err(e) = sqlx::query(&format!("RELEASE SAVEPOINT {savepoint}"))
                .execute(conn)
                .await
            {
                tracing::debug!(system = %self.name, %savepoint, error = %e, "release savepoint failed");
            }
        }
        Ok(())
    }

    async fn observe(&self) -> Result<Observation, AdapterError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(|| AdapterError::NotActive {
            system: self.name.clone(),
        })?;

        let mut data = std::collections::BTreeMap::new();
        for query in &self.observations {
            let row = sqlx::query(&query.sql)
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| AdapterError::backend(&self.name, e))?;
            data.insert(query.label.clone(), decode_scalar(&self.name, &row)?);
        }
        Ok(Observation::new(self.name.clone(), data))
    }
}

/// Decode the single column of an observation row into a JSON value.
fn decode_scalar(system: &str, row: &sqlx::postgres::PgRow) -> Result<Value, AdapterError> {
    if let Ok(v) = row.try_get::<i64, _>(0) {
        return Ok(json!(v));
    }
    if let Ok(v) = row.try_get::<i32, _>(0) {
        return Ok(json!(v));
    }
    if let Ok(v) = row.try_get::<bool, _>(0) {
        return Ok(json!(v));
    }
    if let Ok(v) = row.try_get::<String, _>(0) {
        return Ok(json!(v));
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(0) {
        return Ok(v.map_or(Value::Null, Value::String));
    }
    Err(AdapterError::backend(
        system,
        "observation query returned a non-scalar column (expected int, bool or text)",
    ))
}
