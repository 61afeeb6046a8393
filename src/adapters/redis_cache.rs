//! Redis adapter: full key dump and restore.
//!
//! Checkpointing captures the binary `DUMP` encoding of every key; rollback
//! issues `FLUSHDB` and re-`RESTORE`s the captured dump, so checkpoints can
//! be restored in arbitrary order. `begin` takes a baseline dump that `end`
//! restores, leaving the cache as the run found it.
//!
//! Keys are scanned with `KEYS *`, which is acceptable for the small fixture
//! databases an exploration run works against. Point this adapter at a
//! dedicated test database, never at shared infrastructure.

use std::sync::Mutex;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::adapters::{AdapterError, Rollbackable, SystemCheckpoint};
use crate::observe::Observation;

type KeyDump = Vec<(String, Vec<u8>)>;

/// Dump/restore rollback over one Redis database.
pub struct RedisAdapter {
    name: String,
    url: String,
    manager: tokio::sync::Mutex<Option<ConnectionManager>>,
    saved: Mutex<FxHashMap<Uuid, KeyDump>>,
    baseline: Mutex<Option<KeyDump>>,
}

impl RedisAdapter {
    /// Create an adapter for the Redis database at `url`
    /// (e.g. `redis://127.0.0.1:6379/15`). Nothing connects until `begin`.
    #[must_use]
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            manager: tokio::sync::Mutex::new(None),
            saved: Mutex::new(FxHashMap::default()),
            baseline: Mutex::new(None),
        }
    }

    fn backend(&self, e: impl ToString) -> AdapterError {
        AdapterError::backend(&self.name, e)
    }

    async fn connection(&self) -> Result<ConnectionManager, AdapterError> {
        self.manager
            .lock()
            .await
            .as_ref()
            .cloned()
            .ok_or_else(|| AdapterError::NotActive {
                system: self.name.clone(),
            })
    }

    async fn sorted_keys(&self, conn: &mut ConnectionManager) -> Result<Vec<String>, AdapterError> {
        let mut keys: Vec<String> = conn.keys("*").await.map_err(|e| self.backend(e))?;
        keys.sort();
        Ok(keys)
    }

    async fn dump_all(&self) -> Result<KeyDump, AdapterError> {
        let mut conn = self.connection().await?;
        let keys = self.sorted_keys(&mut conn).await?;
        let mut dump = Vec::with_capacity(keys.len());
        for key in keys {
            let bytes: Option<Vec<u8>> = redis::cmd("DUMP")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(|e| self.backend(e))?;
            if let Some(bytes) = bytes {
                dump.push((key, bytes));
            }
        }
        Ok(dump)
    }

    async fn restore_all(&self, dump: &KeyDump) -> Result<(), AdapterError> {
        let mut conn = self.connection().await?;
        redis::cmd("FLUSHDB")
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| self.backend(e))?;
        for (key, bytes) in dump {
            redis::cmd("RESTORE")
                .arg(key)
                .arg(0)
                .arg(bytes.as_slice())
                .arg("REPLACE")
                .query_async::<()>(&mut conn)
                .await
                .map_err(|e| self.backend(e))?;
        }
        Ok(())
    }

    fn lock_saved(&self) -> Result<std::sync::MutexGuard<'_, FxHashMap<Uuid, KeyDump>>, AdapterError> {
        self.saved
            .lock()
            .map_err(|e| self.backend(format!("lock poisoned: {e}")))
    }
}

#[async_trait]
impl Rollbackable for RedisAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn begin(&self) -> Result<(), AdapterError> {
        let mut guard = self.manager.lock().await;
        if guard.is_some() {
            return Err(self.backend("begin called twice without end"));
        }
        let client = redis::Client::open(self.url.as_str()).map_err(|e| self.backend(e))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| self.backend(e))?;
        *guard = Some(manager);
        drop(guard);

        let baseline = self.dump_all().await?;
        *self
            .baseline
            .lock()
            .map_err(|e| self.backend(format!("lock poisoned: {e}")))? = Some(baseline);
        Ok(())
    }

    async fn end(&self) -> Result<(), AdapterError> {
        let baseline = self
            .baseline
            .lock()
            .map_err(|e| self.backend(format!("lock poisoned: {e}")))?
            .take();
        if let Some(baseline) = baseline {
            self.restore_all(&baseline).await?;
        }
        *self.manager.lock().await = None;
        self.lock_saved()?.clear();
        Ok(())
    }

    async fn checkpoint(&self, name: &str) -> Result<SystemCheckpoint, AdapterError> {
        let dump = self.dump_all().await?;
        let handle = SystemCheckpoint::new(name);
        self.lock_saved()?.insert(handle.id(), dump);
        Ok(handle)
    }

    async fn rollback(&self, checkpoint: &SystemCheckpoint) -> Result<(), AdapterError> {
        let dump = self
            .lock_saved()?
            .get(&checkpoint.id())
            .cloned()
            .ok_or_else(|| AdapterError::UnknownCheckpoint {
                system: self.name.clone(),
                id: checkpoint.id(),
            })?;
        self.restore_all(&dump).await
    }

    async fn release(&self, checkpoint: &SystemCheckpoint) -> Result<(), AdapterError> {
        self.lock_saved()?.remove(&checkpoint.id());
        Ok(())
    }

    async fn observe(&self) -> Result<Observation, AdapterError> {
        let mut conn = self.connection().await?;
        let keys = self.sorted_keys(&mut conn).await?;

        let mut data = std::collections::BTreeMap::new();
        for key in keys {
            let kind: String = redis::cmd("TYPE")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(|e| self.backend(e))?;
            let value = if kind == "string" {
                let v: Option<String> = conn.get(&key).await.map_err(|e| self.backend(e))?;
                v.map_or(Value::Null, Value::String)
            } else {
                // Non-string types are summarized by type name; cache
                // fixtures for exploration are expected to hold strings.
                json!(format!("<{kind}>"))
            };
            data.insert(key, value);
        }
        Ok(Observation::new(self.name.clone(), data))
    }
}
