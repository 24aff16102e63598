//! Poll state snapshots and transition requests.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::frequency::NEVER;

/// The reason a tick was scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Constructed,
    Started,
    Stopped,
    Standby,
    Refreshed,
    Resolved,
    Rejected,
    Reconnected,
    WhenResolved,
    WhenRejected,
    /// Scheduled by a rate limiter invocation
    Invoked,
    Disposed,
}

impl Phase {
    /// Kebab-case name, as it appears in logs and settings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Constructed => "constructed",
            Phase::Started => "started",
            Phase::Stopped => "stopped",
            Phase::Standby => "standby",
            Phase::Refreshed => "refreshed",
            Phase::Resolved => "resolved",
            Phase::Rejected => "rejected",
            Phase::Reconnected => "reconnected",
            Phase::WhenResolved => "when-resolved",
            Phase::WhenRejected => "when-rejected",
            Phase::Invoked => "invoked",
            Phase::Disposed => "disposed",
        }
    }

    /// Whether this phase records the settlement of the `when` gate.
    pub fn is_gate(&self) -> bool {
        matches!(self, Phase::WhenResolved | Phase::WhenRejected)
    }

    /// Whether this phase carries a factory outcome in its payload.
    pub fn has_payload(&self) -> bool {
        matches!(
            self,
            Phase::Resolved | Phase::Rejected | Phase::Reconnected
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of a poll. Every transition replaces it wholesale.
#[derive(Debug, Clone)]
pub struct State<T, U> {
    /// Why this tick was scheduled
    pub phase: Phase,

    /// Last factory outcome; only set for resolved, rejected and reconnected
    pub payload: Option<Result<T, U>>,

    /// Time until the next execution attempt
    pub interval: Duration,

    /// When this snapshot was created
    pub timestamp: Instant,
}

impl<T, U> State<T, U> {
    pub(crate) fn constructed() -> Self {
        Self {
            phase: Phase::Constructed,
            payload: None,
            interval: NEVER,
            timestamp: Instant::now(),
        }
    }

    pub(crate) fn disposed() -> Self {
        Self {
            phase: Phase::Disposed,
            payload: None,
            interval: NEVER,
            timestamp: Instant::now(),
        }
    }

    /// The resolved value, if this state carries one.
    pub fn value(&self) -> Option<&T> {
        self.payload.as_ref().and_then(|payload| payload.as_ref().ok())
    }

    /// The rejection reason, if this state carries one.
    pub fn error(&self) -> Option<&U> {
        self.payload.as_ref().and_then(|payload| payload.as_ref().err())
    }
}

/// Predicate deciding whether a requested transition should be dropped.
pub type CancelFn<T, U> = Box<dyn FnOnce(&State<T, U>) -> bool + Send>;

/// A requested transition for [`Poll::schedule`](crate::Poll::schedule).
///
/// Unset fields fall back to `{ phase: standby, interval: frequency.interval, payload: None }`.
pub struct Next<T, U> {
    pub(crate) cancel: Option<CancelFn<T, U>>,
    pub(crate) interval: Option<Duration>,
    pub(crate) payload: Option<Result<T, U>>,
    pub(crate) phase: Option<Phase>,
}

impl<T, U> Default for Next<T, U> {
    fn default() -> Self {
        Self {
            cancel: None,
            interval: None,
            payload: None,
            phase: None,
        }
    }
}

impl<T, U> Next<T, U> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn payload(mut self, payload: Result<T, U>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Drop the transition when `cancel` returns true for the current state.
    pub fn cancel<F>(mut self, cancel: F) -> Self
    where
        F: FnOnce(&State<T, U>) -> bool + Send + 'static,
    {
        self.cancel = Some(Box::new(cancel));
        self
    }

    pub(crate) fn requested_phase(&self) -> Phase {
        self.phase.unwrap_or(Phase::Standby)
    }

    /// Overlay the requested fields onto the defaults.
    pub(crate) fn into_state(self, default_interval: Duration) -> Arc<State<T, U>> {
        Arc::new(State {
            phase: self.phase.unwrap_or(Phase::Standby),
            payload: self.payload,
            interval: self.interval.unwrap_or(default_interval),
            timestamp: Instant::now(),
        })
    }
}

impl<T, U> fmt::Debug for Next<T, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("phase", &self.phase)
            .field("interval", &self.interval)
            .field("has_payload", &self.payload.is_some())
            .field("has_cancel", &self.cancel.is_some())
            .finish()
    }
}
