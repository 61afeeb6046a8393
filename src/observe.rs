//! Observations and canonical state identity.
//!
//! Every rollbackable system summarizes itself into an [`Observation`]; the
//! sorted list of observations taken at one moment identifies a [`State`].
//! Identity is content-addressed: the [`StateId`] is a truncated SHA-256 over
//! the canonical encoding of the observation list, so the same observable
//! world always maps to the same graph node no matter which path produced it
//! or in which order the adapters reported.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::utils::canonical::{self, CanonicalError};
use crate::world::WorldCheckpoint;

/// Number of hex characters kept from the SHA-256 digest.
const STATE_ID_LEN: usize = 16;

/// Errors raised while deriving a state identity from observations.
#[derive(Debug, Error, Diagnostic)]
pub enum IdentityError {
    /// Observation data could not be canonicalized.
    #[error("observation from `{system}` is not canonicalizable: {source}")]
    #[diagnostic(
        code(roamgraph::identity::canonical),
        help("Adapters must observe integers, booleans, strings, nulls, arrays and objects only.")
    )]
    Canonical {
        system: String,
        #[source]
        source: CanonicalError,
    },

    /// Two adapters reported the same system name in one observation set.
    #[error("duplicate observation for system `{system}`")]
    #[diagnostic(code(roamgraph::identity::duplicate_system))]
    DuplicateSystem { system: String },
}

/// One system's deterministic view of itself at a moment in time.
///
/// `data` participates in state identity; `meta` is opaque diagnostic
/// baggage (timings, connection info) excluded from hashing.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    system: String,
    data: BTreeMap<String, Value>,
    meta: Option<Value>,
}

impl Observation {
    /// Create an observation for a named system.
    #[must_use]
    pub fn new(system: impl Into<String>, data: BTreeMap<String, Value>) -> Self {
        Self {
            system: system.into(),
            data,
            meta: None,
        }
    }

    /// Attach opaque metadata excluded from identity.
    #[must_use]
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// The observed system's name.
    #[must_use]
    pub fn system(&self) -> &str {
        &self.system
    }

    /// The comparison-safe observation data.
    #[must_use]
    pub fn data(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    /// One field of the observation data.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Metadata excluded from identity, if any.
    #[must_use]
    pub fn meta(&self) -> Option<&Value> {
        self.meta.as_ref()
    }
}

/// Canonical identifier of a state: 16 hex characters of SHA-256 over the
/// sorted observation list.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct StateId(String);

impl StateId {
    /// Derive the identity of an observation set.
    ///
    /// The observations are sorted by system name before hashing, so any
    /// permutation of the same set yields the same id. `meta` fields never
    /// contribute.
    pub fn compute(observations: &[Observation]) -> Result<Self, IdentityError> {
        let mut sorted: Vec<&Observation> = observations.iter().collect();
        sorted.sort_by(|a, b| a.system.cmp(&b.system));
        for pair in sorted.windows(2) {
            if pair[0].system == pair[1].system {
                return Err(IdentityError::DuplicateSystem {
                    system: pair[0].system.clone(),
                });
            }
        }

        let mut hasher = Sha256::new();
        for obs in sorted {
            let data = Value::Object(
                obs.data
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            );
            let encoded =
                canonical::canonical_string(&data).map_err(|source| IdentityError::Canonical {
                    system: obs.system.clone(),
                    source,
                })?;
            hasher.update(obs.system.as_bytes());
            hasher.update(b"=");
            hasher.update(encoded.as_bytes());
            hasher.update(b";");
        }

        let digest = hasher.finalize();
        let mut hex = String::with_capacity(STATE_ID_LEN);
        for byte in digest.iter().take(STATE_ID_LEN / 2) {
            hex.push_str(&format!("{byte:02x}"));
        }
        Ok(StateId(hex))
    }

    /// The id as a hex string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A canonical node of the exploration graph.
///
/// Two states with the same [`StateId`] are the same node; the graph
/// deduplicates on insertion. A state optionally carries the world-level
/// checkpoint that restores it, and remembers the transition depth at which
/// it was first discovered.
#[derive(Clone, Debug)]
pub struct State {
    id: StateId,
    observations: Vec<Observation>,
    checkpoint: Option<WorldCheckpoint>,
    depth: u32,
    discovered_at: DateTime<Utc>,
}

impl State {
    /// Build a state from an observation set, deriving its identity.
    pub fn from_observations(observations: Vec<Observation>) -> Result<Self, IdentityError> {
        let id = StateId::compute(&observations)?;
        let mut observations = observations;
        observations.sort_by(|a, b| a.system().cmp(b.system()));
        Ok(Self {
            id,
            observations,
            checkpoint: None,
            depth: 0,
            discovered_at: Utc::now(),
        })
    }

    /// Set the discovery depth (transitions from the initial state).
    #[must_use]
    pub fn at_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// The canonical identity.
    #[must_use]
    pub fn id(&self) -> &StateId {
        &self.id
    }

    /// The observations that produced this state, sorted by system name.
    #[must_use]
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// The observation for a particular system, if present.
    #[must_use]
    pub fn observation(&self, system: &str) -> Option<&Observation> {
        self.observations.iter().find(|o| o.system() == system)
    }

    /// The checkpoint restoring this state, once taken.
    #[must_use]
    pub fn checkpoint(&self) -> Option<&WorldCheckpoint> {
        self.checkpoint.as_ref()
    }

    pub(crate) fn attach_checkpoint(&mut self, checkpoint: WorldCheckpoint) {
        self.checkpoint = Some(checkpoint);
    }

    pub(crate) fn take_checkpoint(&mut self) -> Option<WorldCheckpoint> {
        self.checkpoint.take()
    }

    /// Discovery depth in transitions from the initial state.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// When this state was first added to the graph.
    #[must_use]
    pub fn discovered_at(&self) -> DateTime<Utc> {
        self.discovered_at
    }

    /// Look up a field across all observations.
    ///
    /// A qualified key `system.field` matches only that system; a bare key
    /// matches the first system (in name order) carrying the field.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        if let Some((system, field)) = key.split_once('.') {
            return self.observation(system).and_then(|o| o.field(field));
        }
        self.observations.iter().find_map(|o| o.field(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obs(system: &str, pairs: &[(&str, Value)]) -> Observation {
        let data = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        Observation::new(system, data)
    }

    #[test]
    fn identity_ignores_observation_order() {
        let a = obs("db", &[("orders", json!(1))]);
        let b = obs("cache", &[("keys", json!(0))]);

        let forward = StateId::compute(&[a.clone(), b.clone()]).unwrap();
        let reverse = StateId::compute(&[b, a]).unwrap();
        assert_eq!(forward, reverse);
    }

    #[test]
    fn identity_ignores_meta() {
        let plain = obs("db", &[("orders", json!(1))]);
        let annotated = obs("db", &[("orders", json!(1))]).with_meta(json!({"elapsed_us": 250}));

        let a = StateId::compute(&[plain]).unwrap();
        let b = StateId::compute(&[annotated]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn identity_is_sixteen_hex_chars() {
        let id = StateId::compute(&[obs("db", &[("orders", json!(0))])]).unwrap();
        assert_eq!(id.as_str().len(), 16);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_data_differs() {
        let a = StateId::compute(&[obs("db", &[("orders", json!(0))])]).unwrap();
        let b = StateId::compute(&[obs("db", &[("orders", json!(1))])]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn duplicate_system_is_rejected() {
        let err = StateId::compute(&[
            obs("db", &[("orders", json!(0))]),
            obs("db", &[("orders", json!(1))]),
        ])
        .unwrap_err();
        assert!(matches!(err, IdentityError::DuplicateSystem { .. }));
    }

    #[test]
    fn fractional_float_fails_identity() {
        let err = StateId::compute(&[obs("db", &[("ratio", json!(0.5))])]).unwrap_err();
        assert!(matches!(err, IdentityError::Canonical { .. }));
    }

    #[test]
    fn state_lookup_supports_qualified_keys() {
        let state = State::from_observations(vec![
            obs("db", &[("orders", json!(2))]),
            obs("cache", &[("orders", json!(1))]),
        ])
        .unwrap();

        assert_eq!(state.lookup("db.orders"), Some(&json!(2)));
        assert_eq!(state.lookup("cache.orders"), Some(&json!(1)));
        // Bare key resolves in system-name order: cache before db.
        assert_eq!(state.lookup("orders"), Some(&json!(1)));
        assert_eq!(state.lookup("missing"), None);
    }
}
