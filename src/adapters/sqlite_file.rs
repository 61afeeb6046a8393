//! File-backed SQLite adapter.
//!
//! Checkpointing an embedded database is a file copy: the pool is closed so
//! the file is quiescent, the database file is copied into a scratch
//! directory, and the pool is reopened. Rollback restores by file
//! replacement, which supports restoring checkpoints in arbitrary order.
//! This is the documented remedy when breadth-first exploration must run
//! against a SQL fixture and the savepoint-scoped Postgres adapter cannot
//! serve it.
//!
//! `begin` takes a baseline copy and `end` restores it, so the fixture file
//! on disk is left exactly as the run found it.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use crate::adapters::{AdapterError, ObserveQuery, Rollbackable, SystemCheckpoint};
use crate::observe::Observation;

/// Copy-on-checkpoint rollback over a SQLite database file.
pub struct SqliteFileAdapter {
    name: String,
    path: PathBuf,
    scratch: PathBuf,
    pool: tokio::sync::Mutex<Option<SqlitePool>>,
    saved: Mutex<FxHashMap<Uuid, PathBuf>>,
    baseline: Mutex<Option<PathBuf>>,
    observations: Vec<ObserveQuery>,
}

impl SqliteFileAdapter {
    /// Create an adapter over the database file at `path`. Nothing opens
    /// until `begin`.
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let name = name.into();
        let scratch = std::env::temp_dir().join(format!("roamgraph-{}-{}", name, Uuid::new_v4()));
        Self {
            name,
            path: path.into(),
            scratch,
            pool: tokio::sync::Mutex::new(None),
            saved: Mutex::new(FxHashMap::default()),
            baseline: Mutex::new(None),
            observations: Vec::new(),
        }
    }

    /// Add a labelled scalar query to the observation set.
    #[must_use]
    pub fn with_observation(mut self, label: impl Into<String>, sql: impl Into<String>) -> Self {
        self.observations.push(ObserveQuery::new(label, sql));
        self
    }

    fn io_err(&self, source: std::io::Error) -> AdapterError {
        AdapterError::Io {
            system: self.name.clone(),
            source,
        }
    }

    async fn open_pool(&self) -> Result<SqlitePool, AdapterError> {
        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true);
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| AdapterError::backend(&self.name, e))
    }

    /// Close the pool, run `f` on the quiescent file, reopen the pool.
    async fn with_closed_pool<F>(&self, f: F) -> Result<(), AdapterError>
    where
        F: FnOnce(&Self) -> Result<(), AdapterError>,
    {
        let mut guard = self.pool.lock().await;
        let pool = guard.take().ok_or_else(|| AdapterError::NotActive {
            system: self.name.clone(),
        })?;
        pool.close().await;
        let result = f(self);
        *guard = Some(self.open_pool().await?);
        result
    }

    fn lock_saved(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, FxHashMap<Uuid, PathBuf>>, AdapterError> {
        self.saved
            .lock()
            .map_err(|e| AdapterError::backend(&self.name, format!("lock poisoned: {e}")))
    }
}

#[async_trait]
impl Rollbackable for SqliteFileAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn begin(&self) -> Result<(), AdapterError> {
        std::fs::create_dir_all(&self.scratch).map_err(|e| self.io_err(e))?;

        let guard = self.pool.lock().await;
        if guard.is_some() {
            return Err(AdapterError::backend(
                &self.name,
                "begin called twice without end",
            ));
        }
        drop(guard);

        // Baseline copy so end() can put the fixture back untouched.
        if self.path.exists() {
            let baseline = self.scratch.join("baseline.db");
            std::fs::copy(&self.path, &baseline).map_err(|e| self.io_err(e))?;
            *self
                .baseline
                .lock()
                .map_err(|e| AdapterError::backend(&self.name, format!("lock poisoned: {e}")))? =
                Some(baseline);
        }

        let pool = self.open_pool().await?;
        *self.pool.lock().await = Some(pool);
        Ok(())
    }

    async fn end(&self) -> Result<(), AdapterError> {
        if let Some(pool) = self.pool.lock().await.take() {
            pool.close().await;
        }
        let baseline = self
            .baseline
            .lock()
            .map_err(|e| AdapterError::backend(&self.name, format!("lock poisoned: {e}")))?
            .take();
        if let Some(baseline) = baseline {
            std::fs::copy(&baseline, &self.path).map_err(|e| self.io_err(e))?;
        }
        self.lock_saved()?.clear();
        let _ = std::fs::remove_dir_all(&self.scratch);
        Ok(())
    }

    async fn checkpoint(&self, name: &str) -> Result<SystemCheckpoint, AdapterError> {
        let handle = SystemCheckpoint::new(name);
        let copy = self.scratch.join(format!("cp-{}.db", handle.id()));
        self.with_closed_pool(|adapter| {
            std::fs::copy(&adapter.path, &copy).map_err(|e| adapter.io_err(e))?;
            Ok(())
        })
        .await?;
        self.lock_saved()?.insert(handle.id(), copy);
        Ok(handle)
    }

    async fn rollback(&self, checkpoint: &SystemCheckpoint) -> Result<(), AdapterError> {
        let copy = self
            .lock_saved()?
            .get(&checkpoint.id())
            .cloned()
            .ok_or_else(|| AdapterError::UnknownCheckpoint {
                system: self.name.clone(),
                id: checkpoint.id(),
            })?;
        self.with_closed_pool(|adapter| {
            std::fs::copy(&copy, &adapter.path).map_err(|e| adapter.io_err(e))?;
            Ok(())
        })
        .await
    }

    async fn release(&self, checkpoint: &SystemCheckpoint) -> Result<(), AdapterError> {
        if let Some(copy) = self.lock_saved()?.remove(&checkpoint.id()) {
            let _ = std::fs::remove_file(copy);
        }
        Ok(())
    }

    async fn observe(&self) -> Result<Observation, AdapterError> {
        let guard = self.pool.lock().await;
        let pool = guard.as_ref().ok_or_else(|| AdapterError::NotActive {
            system: self.name.clone(),
        })?;

        let mut data = std::collections::BTreeMap::new();
        for query in &self.observations {
            let row = sqlx::query(&query.sql)
                .fetch_one(pool)
                .await
                .map_err(|e| AdapterError::backend(&self.name, e))?;
            data.insert(query.label.clone(), decode_scalar(&self.name, &row)?);
        }
        Ok(Observation::new(self.name.clone(), data))
    }
}

/// Decode the single column of an observation row into a JSON value.
fn decode_scalar(system: &str, row: &sqlx::sqlite::SqliteRow) -> Result<Value, AdapterError> {
    if let Ok(v) = row.try_get::<i64, _>(0) {
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
