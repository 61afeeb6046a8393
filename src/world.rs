//! The world: the API client, every rollbackable system, and the context.
//!
//! A [`World`] is the complete observable universe of one exploration run.
//! Its three multi-adapter operations ([`World::checkpoint`],
//! [`World::rollback`] and [`World::observe`]) are logically atomic: either
//! every adapter participates or the world reports failure. There is no
//! distributed-commit machinery behind that guarantee, only sequential
//! execution in deterministic (name) order plus release-on-partial-failure
//! for checkpoints; a rollback failure is unrecoverable because the
//! adapters no longer agree on a state.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use crate::action::{Action, ActionOutcome, ActionResult};
use crate::adapters::{AdapterError, Rollbackable, SystemCheckpoint};
use crate::client::ApiClient;
use crate::context::{Context, ContextSnapshot};
use crate::observe::Observation;

/// Errors raised by world-level operations.
#[derive(Debug, Error, Diagnostic)]
pub enum WorldError {
    /// An adapter failed to begin its run context.
    #[error("adapter `{system}` failed to begin")]
    #[diagnostic(code(roamgraph::world::begin))]
    Begin {
        system: String,
        #[source]
        source: AdapterError,
    },

    /// An adapter failed to end its run context.
    #[error("adapter `{system}` failed to end")]
    #[diagnostic(code(roamgraph::world::end))]
    End {
        system: String,
        #[source]
        source: AdapterError,
    },

    /// An adapter failed to checkpoint; no world checkpoint was produced
    /// and already-captured child handles were released.
    #[error("checkpoint failed on adapter `{system}`")]
    #[diagnostic(
        code(roamgraph::world::checkpoint),
        help("The run cannot branch reliably; treat this as an infrastructure failure.")
    )]
    Checkpoint {
        system: String,
        #[source]
        source: AdapterError,
    },

    /// An adapter failed to roll back. The sandbox is now inconsistent and
    /// the run must stop.
    #[error("rollback failed on adapter `{system}`")]
    #[diagnostic(
        code(roamgraph::world::rollback),
        help("State across systems is no longer consistent; findings after this point would be unreliable.")
    )]
    Rollback {
        system: String,
        #[source]
        source: AdapterError,
    },

    /// An adapter failed to observe.
    #[error("observation failed on adapter `{system}`")]
    #[diagnostic(code(roamgraph::world::observe))]
    Observe {
        system: String,
        #[source]
        source: AdapterError,
    },

    /// A world checkpoint has no child handle for a registered adapter:
    /// the adapter set changed after the checkpoint was taken.
    #[error("checkpoint `{name}` has no handle for adapter `{system}`")]
    #[diagnostic(code(roamgraph::world::missing_system))]
    MissingSystem { name: String, system: String },
}

/// Composite handle restoring every adapter and the context at once.
#[derive(Clone, Debug)]
pub struct WorldCheckpoint {
    id: Uuid,
    name: String,
    systems: BTreeMap<String, SystemCheckpoint>,
    context: ContextSnapshot,
    created_at: DateTime<Utc>,
}

impl WorldCheckpoint {
    /// Unique id of this checkpoint.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The name the checkpoint was taken under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Per-system child handles, keyed by adapter name.
    #[must_use]
    pub fn systems(&self) -> &BTreeMap<String, SystemCheckpoint> {
        &self.systems
    }

    /// The context snapshot taken with the checkpoint.
    #[must_use]
    pub fn context(&self) -> &ContextSnapshot {
        &self.context
    }

    /// When the checkpoint was taken.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// The API client plus all rollbackable adapters plus the context.
///
/// Adapters are keyed by their [`Rollbackable::name`] in a sorted map, so
/// every multi-adapter operation runs in the same deterministic order.
pub struct World {
    client: ApiClient,
    adapters: BTreeMap<String, Arc<dyn Rollbackable>>,
    context: Context,
}

impl World {
    /// Create a world around an API client with no adapters yet.
    #[must_use]
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            adapters: BTreeMap::new(),
            context: Context::new(),
        }
    }

    /// Register an adapter under its own name. Replaces any previously
    /// registered adapter with the same name.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn Rollbackable>) -> Self {
        self.adapters.insert(adapter.name().to_string(), adapter);
        self
    }

    /// The API client for the system under test.
    #[must_use]
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// A registered adapter, by name.
    #[must_use]
    pub fn adapter(&self, name: &str) -> Option<&Arc<dyn Rollbackable>> {
        self.adapters.get(name)
    }

    /// All registered adapters in name order.
    pub fn adapters(&self) -> impl Iterator<Item = &Arc<dyn Rollbackable>> {
        self.adapters.values()
    }

    /// The per-path context.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Mutable access to the per-path context.
    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Begin every adapter's run context, in name order.
    pub async fn begin_all(&self) -> Result<(), WorldError> {
        for (name, adapter) in &self.adapters {
            adapter.begin().await.map_err(|source| WorldError::Begin {
                system: name.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// End every adapter's run context. All adapters are attempted even if
    /// one fails; the first failure is returned.
    pub async fn end_all(&self) -> Result<(), WorldError> {
        let mut first_error = None;
        for (name, adapter) in &self.adapters {
            if let Err(source) = adapter.end().await {
                tracing::error!(system = %name, error = %source, "adapter end failed");
                first_error.get_or_insert(WorldError::End {
                    system: name.clone(),
                    source,
                });
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Dispatch an action against the system under test.
    ///
    /// Handler failures are caught and wrapped into
    /// [`ActionResult::Errored`]; the path continues. Executed and errored
    /// actions are appended to the context history, skipped ones are not.
    pub async fn act(&mut self, action: &Action) -> ActionResult {
        let started = Instant::now();
        match action.execute(&self.client, &mut self.context).await {
            Ok(ActionOutcome::Response(resp)) => {
                self.context.record_action(action.name());
                ActionResult::Completed {
                    status: resp.status(),
                    body: resp.body().clone(),
                    elapsed: started.elapsed(),
                }
            }
            Ok(ActionOutcome::Skipped) => ActionResult::Skipped,
            Err(e) => {
                tracing::debug!(action = %action.name(), error = %e, "action errored");
                self.context.record_action(action.name());
                ActionResult::Errored {
                    message: e.to_string(),
                    elapsed: started.elapsed(),
                }
            }
        }
    }

    /// Checkpoint every adapter and snapshot the context, atomically.
    ///
    /// On a mid-loop failure every already-captured child handle is
    /// released and no world-level handle is returned.
    #[instrument(skip(self), err)]
    pub async fn checkpoint(&self, name: &str) -> Result<WorldCheckpoint, WorldError> {
        let mut systems: BTreeMap<String, SystemCheckpoint> = BTreeMap::new();
        for (system, adapter) in &self.adapters {
            match adapter.checkpoint(name).await {
                Ok(handle) => {
                    systems.insert(system.clone(), handle);
                }
                Err(source) => {
                    for (captured_system, handle) in &systems {
                        if let Some(adapter) = self.adapters.get(captured_system) {
                            if let Err(e) = adapter.release(handle).await {
                                tracing::debug!(
                                    system = %captured_system,
                                    error = %e,
                                    "release after failed checkpoint"
                                );
                            }
                        }
                    }
                    return Err(WorldError::Checkpoint {
                        system: system.clone(),
                        source,
                    });
                }
            }
        }
        Ok(WorldCheckpoint {
            id: Uuid::new_v4(),
            name: name.to_string(),
            systems,
            context: self.context.snapshot(),
            created_at: Utc::now(),
        })
    }

    /// Restore every adapter and the context from a checkpoint.
    ///
    /// Any adapter failure here is fatal to the run: the systems no longer
    /// agree on a state.
    #[instrument(skip(self, checkpoint), fields(checkpoint = %checkpoint.name), err)]
    pub async fn rollback(&mut self, checkpoint: &WorldCheckpoint) -> Result<(), WorldError> {
        for (system, adapter) in &self.adapters {
            let handle =
                checkpoint
                    .systems
                    .get(system)
                    .ok_or_else(|| WorldError::MissingSystem {
                        name: checkpoint.name.clone(),
                        system: system.clone(),
                    })?;
            adapter
                .rollback(handle)
                .await
                .map_err(|source| WorldError::Rollback {
                    system: system.clone(),
                    source,
                })?;
        }
        self.context.restore(checkpoint.context.clone());
        Ok(())
    }

    /// Release every child handle of a checkpoint, best-effort.
    pub async fn release(&self, checkpoint: &WorldCheckpoint) {
        for (system, handle) in &checkpoint.systems {
            if let Some(adapter) = self.adapters.get(system) {
                if let Err(e) = adapter.release(handle).await {
                    tracing::debug!(system = %system, error = %e, "checkpoint release failed");
                }
            }
        }
    }

    /// Observe every adapter, in name order.
    pub async fn observe(&self) -> Result<Vec<Observation>, WorldError> {
        let mut observations = Vec::with_capacity(self.adapters.len());
        for (system, adapter) in &self.adapters {
            let obs = adapter
                .observe()
                .await
                .map_err(|source| WorldError::Observe {
                    system: system.clone(),
                    source,
                })?;
            observations.push(obs);
        }
        Ok(observations)
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("base_url", &self.client.base_url())
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .field("context_keys", &self.context.keys())
            .finish()
    }
}
