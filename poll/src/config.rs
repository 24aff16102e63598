//! Configuration types for the poll crate
//!
//! `FrequencyOptions` is the partial frequency a caller (or a settings file)
//! supplies; it is merged over the defaults when a poll is built.
//! `PollOptions` gathers everything `Poll::new` needs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::frequency::{Backoff, Frequency};
use crate::standby::{AlwaysVisible, Standby, Visibility};
use crate::state::State;

/// Name given to polls built without one.
pub const DEFAULT_NAME: &str = "unknown";

/// Default buffer of the tick notification channel.
pub const DEFAULT_CAPACITY: usize = 64;

/// The user operation a poll invokes on every executed tick.
pub type Factory<T, U> =
    Arc<dyn Fn(Arc<State<T, U>>) -> BoxFuture<'static, std::result::Result<T, U>> + Send + Sync>;

/// Gate future; `Err` carries the rejection reason for logging.
pub(crate) type Gate = BoxFuture<'static, std::result::Result<(), String>>;

/// A partial [`Frequency`], merged over the defaults.
///
/// Deserializes from the settings shape
/// `{ "backoff": true | false | n, "interval": ms, "max": ms }`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FrequencyOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<Backoff>,

    #[serde(default, with = "option_millis", skip_serializing_if = "Option::is_none")]
    pub interval: Option<Duration>,

    #[serde(default, with = "option_millis", skip_serializing_if = "Option::is_none")]
    pub max: Option<Duration>,
}

impl FrequencyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge over the defaults and validate.
    pub fn resolve(&self) -> Result<Frequency> {
        let defaults = Frequency::default();
        Frequency {
            backoff: self.backoff.unwrap_or(defaults.backoff),
            interval: self.interval.unwrap_or(defaults.interval),
            max: self.max.unwrap_or(defaults.max),
        }
        .validate()
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = Some(max);
        self
    }
}

impl From<Frequency> for FrequencyOptions {
    fn from(frequency: Frequency) -> Self {
        Self {
            backoff: Some(frequency.backoff),
            interval: Some(frequency.interval),
            max: Some(frequency.max),
        }
    }
}

/// Options for constructing a [`Poll`](crate::Poll).
pub struct PollOptions<T, U> {
    pub(crate) factory: Factory<T, U>,
    pub(crate) frequency: FrequencyOptions,
    pub(crate) name: String,
    pub(crate) standby: Standby,
    pub(crate) when: Option<Gate>,
    pub(crate) visibility: Arc<dyn Visibility>,
    pub(crate) auto: bool,
    pub(crate) capacity: usize,
}

impl<T, U> PollOptions<T, U>
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
{
    /// Options with default frequency, standby `WhenHidden` and no gate.
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: Fn(Arc<State<T, U>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, U>> + Send + 'static,
    {
        Self {
            factory: Arc::new(move |state: Arc<State<T, U>>| factory(state).boxed()),
            frequency: FrequencyOptions::default(),
            name: DEFAULT_NAME.to_string(),
            standby: Standby::default(),
            when: None,
            visibility: Arc::new(AlwaysVisible),
            auto: true,
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Builder pattern methods for fluent configuration

    pub fn frequency(mut self, frequency: impl Into<FrequencyOptions>) -> Self {
        self.frequency = frequency.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn standby(mut self, standby: Standby) -> Self {
        self.standby = standby;
        self
    }

    /// Hold every tick until `gate` settles. A failed gate is logged and the
    /// poll proceeds anyway.
    pub fn when<G, V, E>(mut self, gate: G) -> Self
    where
        G: Future<Output = std::result::Result<V, E>> + Send + 'static,
        V: Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        self.when = Some(into_gate(gate));
        self
    }

    pub fn visibility(mut self, visibility: impl Visibility + 'static) -> Self {
        self.visibility = Arc::new(visibility);
        self
    }

    /// When false, the gate tick arms nothing and the poll waits for an
    /// explicit `start`, `refresh` or `schedule`.
    pub fn auto(mut self, auto: bool) -> Self {
        self.auto = auto;
        self
    }

    /// Buffer size of the [`subscribe`](crate::Poll::subscribe) channel.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

impl<T, U> std::fmt::Debug for PollOptions<T, U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollOptions")
            .field("frequency", &self.frequency)
            .field("name", &self.name)
            .field("standby", &self.standby)
            .field("has_when", &self.when.is_some())
            .field("auto", &self.auto)
            .field("capacity", &self.capacity)
            .finish()
    }
}

fn into_gate<G, V, E>(gate: G) -> Gate
where
    G: Future<Output = std::result::Result<V, E>> + Send + 'static,
    V: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async move { gate.await.map(|_| ()).map_err(|e| e.to_string()) }.boxed()
}

mod option_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(duration) => {
                serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
            }
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
