//! Throttling: at most one call per window.

use std::future::Future;
use std::time::Duration;

use poll::{Phase, IMMEDIATE};

use crate::config::{Edge, ThrottlerOptions};
use crate::error::Result;
use crate::limiter::{Limiter, Plan};

/// Runs the function at most once per window.
///
/// A window opens with the first invocation while the throttler is idle and
/// closes once the call settles. With [`Edge::Leading`] the call runs at once
/// with the window's first arguments; with [`Edge::Trailing`] it runs after
/// `limit` with the latest arguments. Every caller in a window receives the
/// same outcome.
pub struct Throttler<A, T, U>
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
{
    limiter: Limiter<A, T, U>,
    edge: Edge,
}

impl<A, T, U> Throttler<A, T, U>
where
    A: Send + 'static,
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
{
    /// Accepts a bare `Duration` as the limit of a leading-edge throttler.
    pub fn new<F, Fut>(func: F, options: impl Into<ThrottlerOptions>) -> poll::Result<Self>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, U>> + Send + 'static,
    {
        let options = options.into();
        Ok(Self {
            limiter: Limiter::new("throttler", func, options.limit)?,
            edge: options.edge,
        })
    }

    pub async fn invoke(&self, args: A) -> Result<T, U> {
        let edge = self.edge;
        let interval = match edge {
            Edge::Leading => IMMEDIATE,
            Edge::Trailing => self.limiter.limit(),
        };

        self.limiter
            .submit(args, move |phase| {
                let idle = phase != Phase::Invoked;
                Plan {
                    store: idle || edge == Edge::Trailing,
                    interval: idle.then_some(interval),
                }
            })
            .await
    }

    pub fn edge(&self) -> Edge {
        self.edge
    }

    pub fn limit(&self) -> Duration {
        self.limiter.limit()
    }

    /// Cancel the pending call; its callers fail with `Stopped`.
    pub async fn stop(&self) {
        self.limiter.stop().await
    }

    pub fn is_disposed(&self) -> bool {
        self.limiter.is_disposed()
    }

    pub fn dispose(&self) {
        self.limiter.dispose()
    }
}
