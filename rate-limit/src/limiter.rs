//! Shared machinery of both limiters.
//!
//! A limiter drives a private poll that never fires on its own. Each
//! accepted invocation schedules an `invoked` tick; the poll's transitions
//! then settle every caller waiting on that tick.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use poll::{Frequency, Next, Phase, Poll, PollOptions, Standby, State};
use tokio::sync::oneshot;
use tracing::trace;

use crate::config::validate_limit;
use crate::error::{RateLimitError, Result};

type Waiter<T, U> = oneshot::Sender<Result<T, U>>;

/// What an invocation does, decided from the current phase.
pub(crate) struct Plan {
    /// Replace the arguments of the pending execution
    pub(crate) store: bool,
    /// Schedule an `invoked` tick after this delay
    pub(crate) interval: Option<Duration>,
}

pub(crate) struct Limiter<A, T, U>
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
{
    poll: Poll<T, RateLimitError<U>>,
    /// Arguments for the next execution. Held across the scheduling of a
    /// tick so the phase check and the new tick are atomic.
    args: Arc<tokio::sync::Mutex<Option<A>>>,
    waiters: Arc<Mutex<Vec<Waiter<T, U>>>>,
    limit: Duration,
}

impl<A, T, U> Limiter<A, T, U>
where
    A: Send + 'static,
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
{
    pub(crate) fn new<F, Fut>(name: &str, func: F, limit: Duration) -> poll::Result<Self>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, U>> + Send + 'static,
    {
        let limit = validate_limit(limit)?;
        let args: Arc<tokio::sync::Mutex<Option<A>>> = Arc::new(tokio::sync::Mutex::new(None));
        let func = Arc::new(func);

        let slot = Arc::clone(&args);
        let options = PollOptions::new(move |_state: Arc<State<T, RateLimitError<U>>>| {
            let slot = Arc::clone(&slot);
            let func = Arc::clone(&func);
            async move {
                let args = slot.lock().await.take();
                match args {
                    Some(args) => func(args).await.map_err(RateLimitError::Rejected),
                    // An execution without arguments has nothing left to run.
                    None => Err(RateLimitError::Stopped),
                }
            }
        })
        .name(name)
        .frequency(Frequency::never())
        .standby(Standby::Never)
        .auto(false);

        let poll = Poll::new(options)?;
        let waiters: Arc<Mutex<Vec<Waiter<T, U>>>> = Arc::new(Mutex::new(Vec::new()));

        let pending = Arc::clone(&waiters);
        poll.connect(move |state: &Arc<State<T, RateLimitError<U>>>| {
            if let Some(outcome) = outcome(state) {
                let settled = std::mem::take(&mut *pending.lock());
                for waiter in settled {
                    // The caller may have stopped waiting.
                    let _ = waiter.send(outcome.clone());
                }
            }
        });

        Ok(Self {
            poll,
            args,
            waiters,
            limit,
        })
    }

    pub(crate) fn limit(&self) -> Duration {
        self.limit
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.poll.is_disposed()
    }

    /// Register the caller, apply `plan` and wait for the outcome.
    pub(crate) async fn submit<P>(&self, args: A, plan: P) -> Result<T, U>
    where
        P: FnOnce(Phase) -> Plan,
    {
        if self.poll.state().phase == Phase::Constructed && self.poll.tick().await.is_err() {
            return Err(RateLimitError::Disposed);
        }

        let receiver = {
            let mut slot = self.args.lock().await;
            if self.poll.is_disposed() {
                return Err(RateLimitError::Disposed);
            }

            let (sender, receiver) = oneshot::channel();
            self.waiters.lock().push(sender);

            let plan = plan(self.poll.state().phase);
            if plan.store {
                *slot = Some(args);
            }
            if let Some(interval) = plan.interval {
                trace!(limiter = %self.poll.name(), ?interval, "Invocation scheduled");
                self.poll
                    .schedule(Next::new().interval(interval).phase(Phase::Invoked))
                    .await;
            }
            receiver
        };

        receiver.await.unwrap_or(Err(RateLimitError::Disposed))
    }

    /// Reject pending callers with [`RateLimitError::Stopped`].
    pub(crate) async fn stop(&self) {
        self.poll.stop().await
    }

    /// Dispose the poll; pending callers fail with [`RateLimitError::Disposed`].
    pub(crate) fn dispose(&self) {
        self.poll.dispose();
        self.waiters.lock().clear();
    }
}

/// The result a transition delivers to waiting callers, if it settles them.
fn outcome<T, U>(state: &State<T, RateLimitError<U>>) -> Option<Result<T, U>>
where
    T: Clone,
    U: Clone,
{
    match (state.phase, &state.payload) {
        (Phase::Resolved | Phase::Reconnected, Some(Ok(value))) => Some(Ok(value.clone())),
        (Phase::Rejected, Some(Err(error))) => Some(Err(error.clone())),
        (Phase::Stopped, _) => Some(Err(RateLimitError::Stopped)),
        _ => None,
    }
}
