//! Recorder adapter for stubbed external APIs.
//!
//! Systems under test often call further services (payment gateways, mail
//! providers). The [`RecorderAdapter`] models such a dependency as a set of
//! [`Stub`]s plus a journal of every request it served. Checkpointing
//! captures the stub set and the journal length; rollback restores the stubs
//! and truncates the journal, so each branch sees only the external traffic
//! of its own path.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::adapters::{AdapterError, Rollbackable, SystemCheckpoint};
use crate::observe::Observation;

/// A canned response for requests matching a method and path.
#[derive(Clone, Debug, PartialEq)]
pub struct Stub {
    pub method: String,
    pub path: String,
    pub status: u16,
    pub body: Value,
}

/// One request served by the recorder.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: Option<Value>,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Default)]
struct RecorderState {
    stubs: Vec<Stub>,
    journal: Vec<RecordedRequest>,
}

#[derive(Clone)]
struct RecorderMark {
    stubs: Vec<Stub>,
    journal_len: usize,
}

/// Stub set + request journal with checkpoint/rollback.
pub struct RecorderAdapter {
    name: String,
    state: RwLock<RecorderState>,
    saved: RwLock<FxHashMap<Uuid, RecorderMark>>,
}

impl RecorderAdapter {
    /// Create an empty recorder under the given system name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(RecorderState::default()),
            saved: RwLock::new(FxHashMap::default()),
        }
    }

    /// Register a stubbed response.
    pub fn stub(
        &self,
        method: impl Into<String>,
        path: impl Into<String>,
        status: u16,
        body: Value,
    ) -> Result<(), AdapterError> {
        let mut state = self.write_state()?;
        state.stubs.push(Stub {
            method: method.into().to_uppercase(),
            path: path.into(),
            status,
            body,
        });
        Ok(())
    }

    /// Serve a request: journal it and return the first matching stub's
    /// response, or `None` when nothing matches.
    pub fn record(
        &self,
        method: impl Into<String>,
        path: impl Into<String>,
        body: Option<Value>,
    ) -> Result<Option<(u16, Value)>, AdapterError> {
        let method = method.into().to_uppercase();
        let path = path.into();
        let mut state = self.write_state()?;
        state.journal.push(RecordedRequest {
            method: method.clone(),
            path: path.clone(),
            body,
            at: Utc::now(),
        });
        Ok(state
            .stubs
            .iter()
            .find(|s| s.method == method && s.path == path)
            .map(|s| (s.status, s.body.clone())))
    }

    /// The requests served so far, in order.
    pub fn journal(&self) -> Result<Vec<RecordedRequest>, AdapterError> {
        Ok(self.read_state()?.journal.clone())
    }

    /// How many requests have been served.
    pub fn journal_len(&self) -> Result<usize, AdapterError> {
        Ok(self.read_state()?.journal.len())
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, RecorderState>, AdapterError> {
        self.state
            .read()
            .map_err(|e| AdapterError::backend(&self.name, format!("lock poisoned: {e}")))
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, RecorderState>, AdapterError> {
        self.state
            .write()
            .map_err(|e| AdapterError::backend(&self.name, format!("lock poisoned: {e}")))
    }
}

#[async_trait]
impl Rollbackable for RecorderAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn begin(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn end(&self) -> Result<(), AdapterError> {
        let mut state = self.write_state()?;
        state.stubs.clear();
        state.journal.clear();
        self.saved
            .write()
            .map_err(|e| AdapterError::backend(&self.name, format!("lock poisoned: {e}")))?
            .clear();
        Ok(())
    }

    async fn checkpoint(&self, name: &str) -> Result<SystemCheckpoint, AdapterError> {
        let state = self.read_state()?;
        let mark = RecorderMark {
            stubs: state.stubs.clone(),
            journal_len: state.journal.len(),
        };
        drop(state);
        let handle = SystemCheckpoint::new(name);
        self.saved
            .write()
            .map_err(|e| AdapterError::backend(&self.name, format!("lock poisoned: {e}")))?
            .insert(handle.id(), mark);
        Ok(handle)
    }

    async fn rollback(&self, checkpoint: &SystemCheckpoint) -> Result<(), AdapterError> {
        let mark = self
            .saved
            .read()
            .map_err(|e| AdapterError::backend(&self.name, format!("lock poisoned: {e}")))?
            .get(&checkpoint.id())
            .cloned()
            .ok_or_else(|| AdapterError::UnknownCheckpoint {
                system: self.name.clone(),
                id: checkpoint.id(),
            })?;
        let mut state = self.write_state()?;
        state.stubs = mark.stubs;
        state.journal.truncate(mark.journal_len);
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
        let state = self.read_state()?;
        let mut data = std::collections::BTreeMap::new();
        data.insert("requests".to_string(), json!(state.journal.len()));
        data.insert("stubs".to_string(), json!(state.stubs.len()));
        Ok(Observation::new(self.name.clone(), data))
    }
}
