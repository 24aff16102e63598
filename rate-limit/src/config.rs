//! Limiter settings

use std::time::Duration;

use poll::{PollError, MAX_INTERVAL};
use serde::{Deserialize, Serialize};

/// Default window of both limiters.
pub const DEFAULT_LIMIT: Duration = Duration::from_millis(500);

/// Which end of a throttle window runs the function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Edge {
    /// Run at once with the first arguments of the window
    #[default]
    Leading,
    /// Run when the window closes with the latest arguments
    Trailing,
}

/// Configuration for a [`Throttler`](crate::Throttler)
///
/// Deserializes from `{ "limit": ms, "edge": "leading" | "trailing" }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottlerOptions {
    #[serde(default = "default_limit", with = "millis")]
    pub limit: Duration,

    #[serde(default)]
    pub edge: Edge,
}

impl Default for ThrottlerOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            edge: Edge::default(),
        }
    }
}

impl ThrottlerOptions {
    pub fn with_limit(mut self, limit: Duration) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edge = edge;
        self
    }
}

impl From<Duration> for ThrottlerOptions {
    fn from(limit: Duration) -> Self {
        Self::default().with_limit(limit)
    }
}

/// Reject windows a poll could not schedule.
pub(crate) fn validate_limit(limit: Duration) -> poll::Result<Duration> {
    if limit > MAX_INTERVAL {
        return Err(PollError::MaxIntervalTooLarge {
            max: limit,
            limit: MAX_INTERVAL,
        });
    }
    Ok(limit)
}

fn default_limit() -> Duration {
    DEFAULT_LIMIT
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
