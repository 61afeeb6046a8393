//! In-memory mock adapter for queues, outboxes and object stores.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;
use uuid::Uuid;

use crate::adapters::{AdapterError, Rollbackable, SystemCheckpoint};
use crate::observe::Observation;

/// Deep-copied in-memory container with checkpoint/rollback.
///
/// The container is a sorted map from key to JSON value, which covers the
/// usual test doubles: a queue is a key holding an array, a mail outbox a
/// list of message objects, an object store a map of blobs. Checkpointing
/// deep-copies the container; rollback replaces it.
///
/// The adapter is shared (`&self` everywhere), so action handlers and test
/// fixtures can hold a clone of the `Arc` and mutate it to mirror
/// side effects of the system under test:
///
/// ```
/// use std::sync::Arc;
/// use roamgraph::adapters::MemoryAdapter;
/// use serde_json::json;
///
/// let queue = Arc::new(MemoryAdapter::new("queue"));
/// queue.push("emails", json!({"to": "a@example.com"})).unwrap();
/// assert_eq!(queue.get("emails").unwrap(), Some(json!([{"to": "a@example.com"}])));
/// ```
pub struct MemoryAdapter {
    name: String,
    initial: BTreeMap<String, Value>,
    live: RwLock<BTreeMap<String, Value>>,
    saved: RwLock<FxHashMap<Uuid, BTreeMap<String, Value>>>,
    active: AtomicBool,
}

impl MemoryAdapter {
    /// Create an empty container under the given system name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_initial(name, BTreeMap::new())
    }

    /// Create a container pre-seeded with fixture data. `end()` restores
    /// this initial contents.
    #[must_use]
    pub fn with_initial(name: impl Into<String>, initial: BTreeMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            live: RwLock::new(initial.clone()),
            initial,
            saved: RwLock::new(FxHashMap::default()),
            active: AtomicBool::new(false),
        }
    }

    /// Insert or replace a value.
    pub fn insert(&self, key: impl Into<String>, value: Value) -> Result<(), AdapterError> {
        let mut live = self.write_live()?;
        live.insert(key.into(), value);
        Ok(())
    }

    /// Remove a key, returning its value.
    pub fn remove(&self, key: &str) -> Result<Option<Value>, AdapterError> {
        let mut live = self.write_live()?;
        Ok(live.remove(key))
    }

    /// Read a value by key.
    pub fn get(&self, key: &str) -> Result<Option<Value>, AdapterError> {
        let live = self.read_live()?;
        Ok(live.get(key).cloned())
    }

    /// Append to the array stored at `key`, creating it if absent.
    pub fn push(&self, key: impl Into<String>, value: Value) -> Result<(), AdapterError> {
        let mut live = self.write_live()?;
        let slot = live.entry(key.into()).or_insert_with(|| Value::Array(vec![]));
        match slot {
            Value::Array(items) => {
                items.push(value);
                Ok(())
            }
            other => Err(AdapterError::backend(
                &self.name,
                format!("cannot push onto non-array value {other}"),
            )),
        }
    }

    /// A deep copy of the current contents.
    pub fn contents(&self) -> Result<BTreeMap<String, Value>, AdapterError> {
        Ok(self.read_live()?.clone())
    }

    fn read_live(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, Value>>, AdapterError> {
        self.live
            .read()
            .map_err(|e| AdapterError::backend(&self.name, format!("lock poisoned: {e}")))
    }

    fn write_live(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Value>>, AdapterError> {
        self.live
            .write()
            .map_err(|e| AdapterError::backend(&self.name, format!("lock poisoned: {e}")))
    }
}

#[async_trait]
impl Rollbackable for MemoryAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn begin(&self) -> Result<(), AdapterError> {
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn end(&self) -> Result<(), AdapterError> {
        self.active.store(false, Ordering::SeqCst);
        *self.write_live()? = self.initial.clone();
        self.saved
            .write()
            .map_err(|e| AdapterError::backend(&self.name, format!("lock poisoned: {e}")))?
            .clear();
        Ok(())
    }

    async fn checkpoint(&self, name: &str) -> Result<SystemCheckpoint, AdapterError> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(AdapterError::NotActive {
                system: self.name.clone(),
            });
        }
        let snapshot = self.read_live()?.clone();
        let handle = SystemCheckpoint::new(name);
        self.saved
            .write()
            .map_err(|e| AdapterError::backend(&self.name, format!("lock poisoned: {e}")))?
            .insert(handle.id(), snapshot);
        Ok(handle)
    }

    async fn rollback(&self, checkpoint: &SystemCheckpoint) -> Result<(), AdapterError> {
        let saved = self
            .saved
            .read()
            .map_err(|e| AdapterError::backend(&self.name, format!("lock poisoned: {e}")))?
            .get(&checkpoint.id())
            .cloned()
            .ok_or_else(|| AdapterError::UnknownCheckpoint {
                system: self.name.clone(),
                id: checkpoint.id(),
            })?;
        *self.write_live()? = saved;
        Ok(())
    }

    async fn release(&self, checkpoint: &SystemCheckpoint) -> Result<(), AdapterError> {
        self.saved
            .write()
            .map_err(|e| AdapterError::backend(&self.name, format!("lock poisoned: {e}")))?
            .remove(&checkpoint.id());
        Ok(())
    }

    async fn observe(&self) -> Result<Observation, AdapterError> {
        Ok(Observation::new(self.name.clone(), self.read_live()?.clone()))
    }
}
