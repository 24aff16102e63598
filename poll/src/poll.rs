//! The polling engine.
//!
//! A [`Poll`] owns one immutable [`State`] at a time. Every transition goes
//! through `schedule`, which swaps the state, bumps the tick generation,
//! notifies observers and arms the next execution. Executions run the
//! factory and feed its outcome back into `schedule`; results from ticks
//! that were superseded in the meantime are dropped.
//!
//! ```text
//!  gate settles ──► when-resolved ──► execute ──► resolved ──► execute ...
//!                                        │
//!                                        └──────► rejected (backoff) ──► reconnected
//! ```

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use crate::backoff;
use crate::config::{Factory, FrequencyOptions, Gate, PollOptions};
use crate::error::{PollError, Result};
use crate::frequency::{Frequency, IMMEDIATE, NEVER};
use crate::standby::{Standby, Visibility};
use crate::state::{Next, Phase, State};

/// Synchronous tick listener registered with [`Poll::connect`].
pub type Listener<T, U> = Arc<dyn Fn(&Arc<State<T, U>>) + Send + Sync>;

/// Read-only view of a poll, for code that observes but must not drive it.
#[async_trait]
pub trait ReadonlyPoll<T, U>: Send + Sync
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
{
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// The current state snapshot
    fn state(&self) -> Arc<State<T, U>>;

    /// Wait until the next scheduled state becomes current.
    async fn tick(&self) -> Result<()>;

    /// Stream of every installed state
    fn subscribe(&self) -> broadcast::Receiver<Arc<State<T, U>>>;

    fn is_disposed(&self) -> bool;

    /// Wait until the poll is disposed.
    async fn disposed(&self);
}

/// Published after every installed transition; `tick()` waiters watch it.
#[derive(Debug, Clone, Copy, Default)]
struct Beat {
    generation: u64,
    disposed: bool,
}

struct Shared<T, U> {
    state: Arc<State<T, U>>,
    /// Identity of the currently scheduled tick
    generation: u64,
    frequency: Frequency,
    standby: Standby,
    timer: Option<AbortHandle>,
    ticked: Option<broadcast::Sender<Arc<State<T, U>>>>,
    listeners: Vec<Listener<T, U>>,
    disposed: bool,
}

struct Inner<T, U> {
    name: String,
    factory: Factory<T, U>,
    visibility: Arc<dyn Visibility>,
    shared: Mutex<Shared<T, U>>,
    /// Last generation handed to the connected listeners
    delivered: Mutex<u64>,
    beat: watch::Sender<Beat>,
}

/// A self-scheduling, backoff-aware, cancellable task runner.
///
/// Dropping the poll disposes it.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use poll::{FrequencyOptions, Poll, PollOptions, Standby};
///
/// # async fn run() -> Result<(), poll::PollError> {
/// let poll: Poll<u32, String> = Poll::new(
///     PollOptions::new(|_state| async { Ok(42) })
///         .name("kernel-status")
///         .standby(Standby::Never)
///         .frequency(FrequencyOptions::new().with_interval(Duration::from_secs(5))),
/// )?;
///
/// let mut ticks = poll.subscribe();
/// while let Ok(state) = ticks.recv().await {
///     println!("{} -> {:?}", state.phase, state.value());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Poll<T, U>
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
{
    inner: Arc<Inner<T, U>>,
}

impl<T, U> Poll<T, U>
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
{
    /// Create a poll and start waiting on its gate.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(options: PollOptions<T, U>) -> Result<Self> {
        let frequency = options.frequency.resolve()?;
        let (ticked, _) = broadcast::channel(options.capacity);
        let (beat, _) = watch::channel(Beat::default());

        let inner = Arc::new(Inner {
            name: options.name,
            factory: options.factory,
            visibility: options.visibility,
            shared: Mutex::new(Shared {
                state: Arc::new(State::constructed()),
                generation: 0,
                frequency,
                standby: options.standby,
                timer: None,
                ticked: Some(ticked),
                listeners: Vec::new(),
                disposed: false,
            }),
            delivered: Mutex::new(0),
            beat,
        });

        debug!(poll = %inner.name, ?frequency, "Poll constructed");
        Inner::await_gate(&inner, options.when, options.auto);

        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The current state snapshot.
    pub fn state(&self) -> Arc<State<T, U>> {
        self.inner.state()
    }

    /// Resolve with this poll once the next scheduled state becomes current.
    ///
    /// Fails with [`PollError::Disposed`] if the poll is (or becomes) disposed.
    pub async fn tick(&self) -> Result<&Self> {
        self.inner.tick().await?;
        Ok(self)
    }

    /// Receive every installed state, one item per transition.
    ///
    /// The stream closes when the poll is disposed. Slow receivers observe
    /// `RecvError::Lagged` once the buffer set by
    /// [`PollOptions::capacity`] overflows.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<State<T, U>>> {
        self.inner.subscribe()
    }

    /// Call `listener` synchronously with installed states, in generation order.
    ///
    /// Listeners run before `tick()` waiters are released and are dropped on
    /// disposal. A state overtaken by a newer one before delivery is skipped.
    /// They must not block.
    pub fn connect<F>(&self, listener: F)
    where
        F: Fn(&Arc<State<T, U>>) + Send + Sync + 'static,
    {
        let mut shared = self.inner.shared.lock();
        if !shared.disposed {
            shared.listeners.push(Arc::new(listener));
        }
    }

    pub fn frequency(&self) -> Frequency {
        self.inner.shared.lock().frequency
    }

    /// Replace the frequency. Invalid values are rejected and the current
    /// frequency is kept. Takes effect from the next transition.
    pub fn set_frequency(&self, frequency: impl Into<FrequencyOptions>) -> Result<()> {
        let options = frequency.into();
        let current = self.frequency();
        let frequency = Frequency {
            backoff: options.backoff.unwrap_or(current.backoff),
            interval: options.interval.unwrap_or(current.interval),
            max: options.max.unwrap_or(current.max),
        }
        .validate()?;

        let mut shared = self.inner.shared.lock();
        if !shared.disposed {
            shared.frequency = frequency;
        }
        Ok(())
    }

    pub fn standby(&self) -> Standby {
        self.inner.shared.lock().standby.clone()
    }

    pub fn set_standby(&self, standby: Standby) {
        let mut shared = self.inner.shared.lock();
        if !shared.disposed {
            shared.standby = standby;
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Wait until the poll is disposed.
    pub async fn disposed(&self) {
        self.inner.disposed().await
    }

    /// Run the factory as soon as possible.
    ///
    /// Coalesces with a refresh that has not fired yet.
    pub async fn refresh(&self) {
        let next = Next::new()
            .cancel(|last: &State<T, U>| last.phase == Phase::Refreshed)
            .interval(IMMEDIATE)
            .phase(Phase::Refreshed);
        self.inner.transition(next, None).await
    }

    /// Resume polling.
    ///
    /// Only takes effect when the poll would not execute on its own: it is
    /// constructed, standing by, stopped, or parked on a `NEVER` interval.
    /// Otherwise the poll is already active and the call does nothing.
    pub async fn start(&self) {
        let next = Next::new()
            .cancel(|last: &State<T, U>| {
                !matches!(
                    last.phase,
                    Phase::Constructed | Phase::Standby | Phase::Stopped
                ) && last.interval != NEVER
            })
            .interval(IMMEDIATE)
            .phase(Phase::Started);
        self.inner.transition(next, None).await
    }

    /// Stop polling until an explicit `start`, `refresh` or `schedule`.
    pub async fn stop(&self) {
        let next = Next::new()
            .cancel(|last: &State<T, U>| last.phase == Phase::Stopped)
            .interval(NEVER)
            .phase(Phase::Stopped);
        self.inner.transition(next, None).await
    }

    /// Install a new state and arm its execution.
    ///
    /// Resolves once the state is current and observers were notified, not
    /// when the factory settles. A cancel predicate runs while the poll is
    /// locked and must not call back into the poll.
    pub async fn schedule(&self, next: Next<T, U>) {
        self.inner.transition(next, None).await
    }

    /// Dispose the poll. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose()
    }
}

impl<T, U> Drop for Poll<T, U>
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl<T, U> std::fmt::Debug for Poll<T, U>
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Poll")
            .field("name", &self.inner.name)
            .field("phase", &state.phase)
            .field("interval", &state.interval)
            .field("frequency", &self.frequency())
            .finish()
    }
}

#[async_trait]
impl<T, U> ReadonlyPoll<T, U> for Poll<T, U>
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn state(&self) -> Arc<State<T, U>> {
        self.inner.state()
    }

    async fn tick(&self) -> Result<()> {
        self.inner.tick().await
    }

    fn subscribe(&self) -> broadcast::Receiver<Arc<State<T, U>>> {
        self.inner.subscribe()
    }

    fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    async fn disposed(&self) {
        self.inner.disposed().await
    }
}

impl<T, U> Inner<T, U>
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
{
    /// Wait for the gate off-task, then schedule the first tick.
    fn await_gate(this: &Arc<Self>, gate: Option<Gate>, auto: bool) {
        let weak = Arc::downgrade(this);
        let mut beat = this.beat.subscribe();

        tokio::spawn(async move {
            let settled = match gate {
                Some(gate) => tokio::select! {
                    settled = gate => settled,
                    _ = beat.wait_for(|beat| beat.disposed) => return,
                },
                None => Ok(()),
            };

            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.is_disposed() {
                return;
            }

            let phase = match settled {
                Ok(()) => Phase::WhenResolved,
                Err(reason) => {
                    warn!(poll = %inner.name, %reason, "Poll started despite gate rejection");
                    Phase::WhenRejected
                }
            };
            let interval = if auto { IMMEDIATE } else { NEVER };
            inner
                .transition(Next::new().interval(interval).phase(phase), None)
                .await;
        });
    }

    fn state(&self) -> Arc<State<T, U>> {
        Arc::clone(&self.shared.lock().state)
    }

    fn is_disposed(&self) -> bool {
        self.shared.lock().disposed
    }

    fn is_current(&self, generation: u64) -> bool {
        let shared = self.shared.lock();
        !shared.disposed && shared.generation == generation
    }

    fn disposed_error(&self) -> PollError {
        PollError::Disposed {
            name: self.name.clone(),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<Arc<State<T, U>>> {
        match &self.shared.lock().ticked {
            Some(ticked) => ticked.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    async fn tick(&self) -> Result<()> {
        let (start, mut beat) = {
            let shared = self.shared.lock();
            if shared.disposed {
                return Err(self.disposed_error());
            }
            (shared.generation, self.beat.subscribe())
        };

        let disposed = beat
            .wait_for(|beat| beat.disposed || beat.generation > start)
            .await
            .map(|beat| beat.disposed)
            .unwrap_or(true);

        if disposed {
            Err(self.disposed_error())
        } else {
            Ok(())
        }
    }

    async fn disposed(&self) {
        let mut beat = self.beat.subscribe();
        let _ = beat.wait_for(|beat| beat.disposed).await;
    }

    /// The central state transition.
    ///
    /// With `expected` set, the transition only applies if that generation is
    /// still current, which makes the staleness check and the swap atomic.
    async fn transition(self: &Arc<Self>, mut next: Next<T, U>, expected: Option<u64>) {
        if self.is_disposed() {
            return;
        }

        // Nothing overtakes the gate tick.
        if self.state().phase == Phase::Constructed
            && !next.requested_phase().is_gate()
            && self.tick().await.is_err()
        {
            return;
        }

        let cancel = next.cancel.take();
        let (state, generation, listeners) = {
            let mut shared = self.shared.lock();
            if shared.disposed {
                return;
            }
            if let Some(expected) = expected {
                if shared.generation != expected {
                    trace!(
                        poll = %self.name,
                        phase = %next.requested_phase(),
                        "Dropping transition for a superseded tick"
                    );
                    return;
                }
            }
            if let Some(cancel) = cancel {
                if cancel(shared.state.as_ref()) {
                    trace!(
                        poll = %self.name,
                        phase = %next.requested_phase(),
                        current = %shared.state.phase,
                        "Transition canceled"
                    );
                    return;
                }
            }

            let state = next.into_state(shared.frequency.interval);
            shared.state = Arc::clone(&state);
            shared.generation += 1;
            if let Some(timer) = shared.timer.take() {
                timer.abort();
            }
            // Sent under the lock so subscribers see generations in order.
            if let Some(ticked) = &shared.ticked {
                // No receivers is fine.
                let _ = ticked.send(Arc::clone(&state));
            }
            (state, shared.generation, shared.listeners.clone())
        };

        debug!(
            poll = %self.name,
            phase = %state.phase,
            interval = ?state.interval,
            generation,
            "Poll tick scheduled"
        );

        {
            let mut delivered = self.delivered.lock();
            // A newer transition already reached the listeners.
            if *delivered < generation {
                *delivered = generation;
                for listener in &listeners {
                    listener(&state);
                }
            }
        }
        self.beat.send_if_modified(|beat| {
            if beat.disposed || beat.generation >= generation {
                return false;
            }
            beat.generation = generation;
            true
        });

        tokio::task::yield_now().await;
        self.arm(state.interval, generation);
    }

    /// Arm the execution of `generation` after `interval`.
    fn arm(self: &Arc<Self>, interval: std::time::Duration, generation: u64) {
        if interval == NEVER {
            return;
        }

        let mut shared = self.shared.lock();
        if shared.disposed || shared.generation != generation {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            if interval == IMMEDIATE {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(interval).await;
            }

            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.is_current(generation) {
                return;
            }
            // Detached so a later timer abort never cancels the factory.
            tokio::spawn(inner.execute(generation));
        });
        shared.timer = Some(timer.abort_handle());
    }

    async fn execute(self: Arc<Self>, generation: u64) {
        let (state, standby) = {
            let shared = self.shared.lock();
            if shared.disposed || shared.generation != generation {
                return;
            }
            (Arc::clone(&shared.state), shared.standby.clone())
        };

        if standby.is_active(self.visibility.as_ref()) {
            trace!(poll = %self.name, "Standing by");
            self.transition(Next::new(), Some(generation)).await;
            return;
        }

        let outcome = (self.factory)(Arc::clone(&state)).await;

        let next = match outcome {
            Ok(value) => {
                let phase = if state.phase == Phase::Rejected {
                    Phase::Reconnected
                } else {
                    Phase::Resolved
                };
                Next::new().payload(Ok(value)).phase(phase)
            }
            Err(error) => {
                let frequency = self.shared.lock().frequency;
                Next::new()
                    .interval(backoff::sleep(&frequency, &state))
                    .payload(Err(error))
                    .phase(Phase::Rejected)
            }
        };
        self.transition(next, Some(generation)).await;
    }

    fn dispose(&self) {
        let timer = {
            let mut shared = self.shared.lock();
            if shared.disposed {
                return;
            }
            shared.disposed = true;
            shared.state = Arc::new(State::disposed());
            shared.ticked = None;
            shared.listeners.clear();
            shared.timer.take()
        };

        if let Some(timer) = timer {
            timer.abort();
        }
        self.beat.send_modify(|beat| beat.disposed = true);

        debug!(poll = %self.name, "Poll disposed");
    }
}
