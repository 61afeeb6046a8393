//! Invariants: predicates over the world that must always hold.
//!
//! An [`Invariant`] is evaluated around action execution (before, after or
//! both, per its [`Phase`]) and yields a [`CheckOutcome`]. Failures become
//! [`Violation`]s carrying a severity, a message and a shortest-path
//! reproduction from the initial state. A check that returns `Err` is itself
//! treated as a failure of that invariant (with the error's message), never
//! as a failure of the run.
//!
//! Checks must be side-effect-free with respect to the system under test:
//! they may read the API and the adapters, but an invariant that mutates
//! state corrupts the exploration.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use miette::Diagnostic;
use thiserror::Error;

use crate::adapters::AdapterError;
use crate::client::ClientError;
use crate::observe::StateId;
use crate::world::World;

/// How grave a violation of an invariant is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// When an invariant is evaluated relative to the action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Before the action executes, against the pre-action state.
    PreAction,
    /// After the action and its observation, against the post-action state.
    PostAction,
    /// Both moments.
    Both,
}

impl Phase {
    /// Whether this phase covers the pre-action moment.
    #[must_use]
    pub fn covers_pre(self) -> bool {
        matches!(self, Phase::PreAction | Phase::Both)
    }

    /// Whether this phase covers the post-action moment.
    #[must_use]
    pub fn covers_post(self) -> bool {
        matches!(self, Phase::PostAction | Phase::Both)
    }
}

/// The result of one invariant check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The invariant holds.
    Pass,
    /// The invariant is violated; a default message is used.
    Fail,
    /// The invariant is violated with a specific message.
    FailWith(String),
}

impl From<bool> for CheckOutcome {
    fn from(ok: bool) -> Self {
        if ok { CheckOutcome::Pass } else { CheckOutcome::Fail }
    }
}

/// Errors raised by invariant checks.
///
/// Surfaced as a violation of the raising invariant, not as a run failure.
#[derive(Debug, Error, Diagnostic)]
pub enum InvariantError {
    /// Reading the system under test failed.
    #[error(transparent)]
    #[diagnostic(code(roamgraph::invariant::client))]
    Client(#[from] ClientError),

    /// Reading an adapter failed.
    #[error(transparent)]
    #[diagnostic(code(roamgraph::invariant::adapter))]
    Adapter(#[from] AdapterError),

    /// Any other check failure.
    #[error("{0}")]
    #[diagnostic(code(roamgraph::invariant::failed))]
    Failed(String),
}

/// Async predicate over the world.
#[async_trait]
pub trait InvariantCheck: Send + Sync {
    /// Evaluate the predicate. Must not mutate the system under test.
    async fn check(&self, world: &World) -> Result<CheckOutcome, InvariantError>;
}

type CheckFn = dyn for<'a> Fn(&'a World) -> BoxFuture<'a, Result<CheckOutcome, InvariantError>>
    + Send
    + Sync;

struct FnCheck(Box<CheckFn>);

#[async_trait]
impl InvariantCheck for FnCheck {
    async fn check(&self, world: &World) -> Result<CheckOutcome, InvariantError> {
        (self.0)(world).await
    }
}

/// A named invariant with severity and evaluation phase.
///
/// # Examples
///
/// ```no_run
/// use roamgraph::invariant::{CheckOutcome, Invariant, Phase, Severity};
/// use serde_json::json;
///
/// let at_most_one_refund = Invariant::from_fn("refund_at_most_once", |world| {
///     Box::pin(async move {
///         let observations = world.observe().await?;
///         let refunds = observations
///             .iter()
///             .find_map(|o| o.field("refunds"))
///             .cloned()
///             .unwrap_or(json!(0));
///         if refunds.as_i64().unwrap_or(0) > 1 {
///             Ok(CheckOutcome::FailWith(format!("{refunds} refunds recorded")))
///         } else {
///             Ok(CheckOutcome::Pass)
///         }
///     })
/// })
/// .severity(Severity::Critical)
/// .phase(Phase::PostAction);
/// ```
#[derive(Clone)]
pub struct Invariant {
    name: String,
    check: Arc<dyn InvariantCheck>,
    severity: Severity,
    phase: Phase,
}

impl Invariant {
    /// Wrap an [`InvariantCheck`] implementation.
    ///
    /// Defaults: severity [`Severity::High`], phase [`Phase::PostAction`].
    #[must_use]
    pub fn new(name: impl Into<String>, check: Arc<dyn InvariantCheck>) -> Self {
        Self {
            name: name.into(),
            check,
            severity: Severity::High,
            phase: Phase::PostAction,
        }
    }

    /// Build an invariant from an async closure.
    #[must_use]
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: for<'a> Fn(&'a World) -> BoxFuture<'a, Result<CheckOutcome, InvariantError>>
            + Send
            + Sync
            + 'static,
    {
        Self::new(name, Arc::new(FnCheck(Box::new(f))))
    }

    /// Set the severity.
    #[must_use]
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Set the evaluation phase.
    #[must_use]
    pub fn phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    /// The invariant's unique name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configured severity.
    #[must_use]
    pub fn severity_level(&self) -> Severity {
        self.severity
    }

    /// The configured evaluation phase.
    #[must_use]
    pub fn evaluation_phase(&self) -> Phase {
        self.phase
    }

    /// Run the check.
    pub(crate) async fn evaluate(&self, world: &World) -> Result<CheckOutcome, InvariantError> {
        self.check.check(world).await
    }
}

impl fmt::Debug for Invariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invariant")
            .field("name", &self.name)
            .field("severity", &self.severity)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

/// A recorded invariant failure with its reproduction.
///
/// Serializable so reporters can render findings without depending on the
/// core's internals.
#[derive(Clone, Debug, serde::Serialize)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: String,
    /// Severity of the violated invariant.
    pub severity: Severity,
    /// Failure message (the invariant's own, or a default).
    pub message: String,
    /// The state the violation was observed in.
    pub state_id: StateId,
    /// The action whose step triggered the violation.
    pub action: String,
    /// Shortest action-name path from the initial state to `state_id`.
    pub path: Vec<String>,
    /// When the violation was recorded.
    pub at: DateTime<Utc>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} at state {} after `{}` (path: {}): {}",
            self.severity,
            self.invariant,
            self.state_id,
            self.action,
            self.path.join(" -> "),
            self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_low_to_critical() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn phase_coverage() {
        assert!(Phase::PreAction.covers_pre());
        assert!(!Phase::PreAction.covers_post());
        assert!(Phase::PostAction.covers_post());
        assert!(!Phase::PostAction.covers_pre());
        assert!(Phase::Both.covers_pre() && Phase::Both.covers_post());
    }

    #[test]
    fn bool_converts_to_outcome() {
        assert_eq!(CheckOutcome::from(true), CheckOutcome::Pass);
        assert_eq!(CheckOutcome::from(false), CheckOutcome::Fail);
    }
}
