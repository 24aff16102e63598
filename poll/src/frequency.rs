//! Polling frequency: base interval, ceiling and backoff growth.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PollError, Result};

/// Interval sentinel: run on the next scheduler turn.
pub const IMMEDIATE: Duration = Duration::ZERO;

/// Interval sentinel: never run automatically.
pub const NEVER: Duration = Duration::MAX;

/// Largest finite interval a poll accepts (2^31 - 1 milliseconds).
pub const MAX_INTERVAL: Duration = Duration::from_millis(2_147_483_647);

/// Growth factor used when backoff is simply enabled.
pub const DEFAULT_BACKOFF: f64 = 3.0;

/// Default base interval (1 second).
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

/// Default maximum interval (30 seconds).
pub const DEFAULT_MAX: Duration = Duration::from_millis(30_000);

/// How the delay grows after consecutive factory failures.
///
/// Serialized the same way settings files spell it: `true`, `false`, or a
/// numeric growth factor.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "BackoffRepr", into = "BackoffRepr")]
pub enum Backoff {
    /// Retry at the base interval
    Disabled,
    /// Grow by [`DEFAULT_BACKOFF`]
    #[default]
    Enabled,
    /// Grow by a custom factor (must be at least 1)
    Growth(f64),
}

impl Backoff {
    /// The multiplier applied to the previous delay.
    pub fn growth(&self) -> f64 {
        match self {
            Backoff::Disabled => 1.0,
            Backoff::Enabled => DEFAULT_BACKOFF,
            Backoff::Growth(factor) => *factor,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum BackoffRepr {
    Flag(bool),
    Factor(f64),
}

impl From<BackoffRepr> for Backoff {
    fn from(repr: BackoffRepr) -> Self {
        match repr {
            BackoffRepr::Flag(true) => Backoff::Enabled,
            BackoffRepr::Flag(false) => Backoff::Disabled,
            BackoffRepr::Factor(factor) => Backoff::Growth(factor),
        }
    }
}

impl From<Backoff> for BackoffRepr {
    fn from(backoff: Backoff) -> Self {
        match backoff {
            Backoff::Enabled => BackoffRepr::Flag(true),
            Backoff::Disabled => BackoffRepr::Flag(false),
            Backoff::Growth(factor) => BackoffRepr::Factor(factor),
        }
    }
}

/// Polling frequency of a [`Poll`](crate::Poll).
///
/// Fields are public so a frequency can be built literally, but a poll only
/// ever stores a frequency that passed [`Frequency::validate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frequency {
    /// Growth applied to the delay after each consecutive failure
    /// Default: enabled (factor 3)
    pub backoff: Backoff,

    /// Base interval between executions
    /// Default: 1 second
    pub interval: Duration,

    /// Ceiling for backed-off intervals
    /// Default: 30 seconds
    pub max: Duration,
}

impl Default for Frequency {
    fn default() -> Self {
        Self {
            backoff: Backoff::Enabled,
            interval: DEFAULT_INTERVAL,
            max: DEFAULT_MAX,
        }
    }
}

impl Frequency {
    /// Create a validated frequency.
    pub fn new(backoff: Backoff, interval: Duration, max: Duration) -> Result<Self> {
        Self {
            backoff,
            interval,
            max,
        }
        .validate()
    }

    /// A frequency that never fires on its own and never backs off.
    ///
    /// Used by pollers that are driven entirely by explicit `schedule` calls.
    pub fn never() -> Self {
        Self {
            backoff: Backoff::Disabled,
            interval: NEVER,
            max: NEVER,
        }
    }

    /// Round both intervals to whole milliseconds and check the invariants.
    ///
    /// Returns the normalized frequency on success.
    pub fn validate(self) -> Result<Self> {
        let interval = round_millis(self.interval);
        let max = round_millis(self.max);

        if let Backoff::Growth(factor) = self.backoff {
            if !factor.is_finite() || factor < 1.0 {
                return Err(PollError::InvalidBackoff(factor));
            }
        }

        if interval > max {
            return Err(PollError::InvalidInterval { interval, max });
        }

        if max > MAX_INTERVAL && max != NEVER {
            return Err(PollError::MaxIntervalTooLarge {
                max,
                limit: MAX_INTERVAL,
            });
        }

        Ok(Self {
            backoff: self.backoff,
            interval,
            max,
        })
    }

    /// Builder pattern methods for fluent configuration

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }
}

/// Round to the nearest millisecond, leaving [`NEVER`] untouched.
pub(crate) fn round_millis(duration: Duration) -> Duration {
    if duration == NEVER {
        return NEVER;
    }
    let millis = (duration.as_nanos() + 500_000) / 1_000_000;
    match u64::try_from(millis) {
        Ok(millis) => Duration::from_millis(millis),
        Err(_) => NEVER,
    }
}
