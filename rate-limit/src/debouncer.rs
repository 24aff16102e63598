//! Debouncing: run once a burst of calls has been quiet for `limit`.

use std::future::Future;
use std::time::Duration;

use poll::Phase;

use crate::config::DEFAULT_LIMIT;
use crate::error::Result;
use crate::limiter::{Limiter, Plan};

/// Collapses a burst of invocations into one call with the latest arguments.
///
/// Every invocation pushes the execution back by `limit`. All callers of a
/// burst receive the outcome of that single call.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use rate_limit::Debouncer;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let save = Debouncer::new(
///     |contents: String| async move { Ok::<_, String>(contents.len()) },
///     Duration::from_millis(300),
/// )?;
///
/// // Only the last edit is written.
/// let (_, written) = tokio::join!(save.invoke("draf".into()), save.invoke("draft".into()));
/// assert_eq!(written, Ok(5));
/// # Ok(())
/// # }
/// ```
pub struct Debouncer<A, T, U>
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
{
    limiter: Limiter<A, T, U>,
}

impl<A, T, U> Debouncer<A, T, U>
where
    A: Send + 'static,
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
{
    /// Fails only if `limit` is longer than a poll can wait.
    pub fn new<F, Fut>(func: F, limit: Duration) -> poll::Result<Self>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, U>> + Send + 'static,
    {
        Ok(Self {
            limiter: Limiter::new("debouncer", func, limit)?,
        })
    }

    /// A debouncer with the default 500 ms window.
    pub fn with_default_limit<F, Fut>(func: F) -> poll::Result<Self>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, U>> + Send + 'static,
    {
        Self::new(func, DEFAULT_LIMIT)
    }

    /// Invoke the function `limit` after the last call of the current burst.
    pub async fn invoke(&self, args: A) -> Result<T, U> {
        let limit = self.limiter.limit();
        self.limiter
            .submit(args, |_: Phase| Plan {
                store: true,
                interval: Some(limit),
            })
            .await
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
