//! Behavioral tests for the polling engine.
//!
//! All tests run on a paused tokio clock, so intervals elapse instantly and
//! deterministically whenever the runtime is otherwise idle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use poll::{
    Backoff, FrequencyOptions, Next, Phase, Poll, PollError, PollOptions, Standby, State,
    VisibilityFlag, IMMEDIATE, NEVER,
};
use tokio::sync::{broadcast, oneshot};
use tokio::time::{sleep, timeout};

// ============================================================================
// Test Helpers
// ============================================================================

type Ticks<T, U> = broadcast::Receiver<Arc<State<T, U>>>;

fn frequency(backoff: Backoff, interval_ms: u64, max_ms: u64) -> FrequencyOptions {
    FrequencyOptions::new()
        .with_backoff(backoff)
        .with_interval(Duration::from_millis(interval_ms))
        .with_max(Duration::from_millis(max_ms))
}

/// Factory that counts its calls and always resolves with the call number.
fn counting_options(calls: Arc<AtomicUsize>) -> PollOptions<usize, String> {
    PollOptions::new(move |_| {
        let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move { Ok(call) }
    })
    .standby(Standby::Never)
    .frequency(frequency(Backoff::Disabled, 10, 100))
}

async fn next_state<T, U>(ticks: &mut Ticks<T, U>) -> Arc<State<T, U>> {
    timeout(Duration::from_secs(60), ticks.recv())
        .await
        .expect("timed out waiting for a tick")
        .expect("tick stream closed")
}

/// Receive until the stream closes and return every phase seen.
async fn drain<T, U>(ticks: &mut Ticks<T, U>) -> Vec<Phase> {
    let mut phases = Vec::new();
    loop {
        match ticks.recv().await {
            Ok(state) => phases.push(state.phase),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return phases,
        }
    }
}

fn count(phases: &[Phase], phase: Phase) -> usize {
    phases.iter().filter(|p| **p == phase).count()
}

// ============================================================================
// Factory outcomes
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_resolves_after_gate() {
    let poll: Poll<&'static str, String> = Poll::new(
        PollOptions::new(|_| async { Ok("ok") })
            .frequency(frequency(Backoff::Disabled, 10, 100)),
    )
    .unwrap();
    let mut ticks = poll.subscribe();

    let first = next_state(&mut ticks).await;
    assert_eq!(first.phase, Phase::WhenResolved);
    assert_eq!(first.interval, IMMEDIATE);
    assert!(first.payload.is_none());

    let second = next_state(&mut ticks).await;
    assert_eq!(second.phase, Phase::Resolved);
    assert_eq!(second.value(), Some(&"ok"));
    assert_eq!(second.interval, Duration::from_millis(10));
}

#[tokio::test(start_paused = true)]
async fn test_factory_receives_current_state() {
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let recorded = Arc::clone(&seen);
    let poll: Poll<u8, String> = Poll::new(
        PollOptions::new(move |state: Arc<State<u8, String>>| {
            recorded.lock().push(state.phase);
            async { Ok(0) }
        })
        .standby(Standby::Never)
        .frequency(frequency(Backoff::Disabled, 10, 100)),
    )
    .unwrap();
    let mut ticks = poll.subscribe();

    next_state(&mut ticks).await;
    next_state(&mut ticks).await;
    next_state(&mut ticks).await;

    let seen = seen.lock().clone();
    assert_eq!(seen[0], Phase::WhenResolved);
    assert_eq!(seen[1], Phase::Resolved);
}

#[tokio::test(start_paused = true)]
async fn test_rejections_back_off_within_bounds() {
    let poll: Poll<(), &'static str> = Poll::new(
        PollOptions::new(|_| async { Err("fail") })
            .standby(Standby::Never)
            .frequency(frequency(Backoff::Enabled, 10, 100)),
    )
    .unwrap();
    let mut ticks = poll.subscribe();

    assert_eq!(next_state(&mut ticks).await.phase, Phase::WhenResolved);

    let mut intervals = Vec::new();
    for _ in 0..12 {
        let state = next_state(&mut ticks).await;
        assert_eq!(state.phase, Phase::Rejected);
        assert_eq!(state.error(), Some(&"fail"));
        intervals.push(state.interval);
    }

    assert!(intervals
        .iter()
        .all(|i| *i >= Duration::from_millis(10) && *i <= Duration::from_millis(100)));
    // The first failure follows an immediate tick, so it retries at the base interval.
    assert_eq!(intervals[0], Duration::from_millis(10));
    assert!(intervals.iter().any(|i| *i > Duration::from_millis(10)));
    assert_eq!(poll.state().phase, Phase::Rejected);
}

#[tokio::test(start_paused = true)]
async fn test_success_after_failure_reconnects() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let poll: Poll<usize, usize> = Poll::new(
        PollOptions::new(move |_| {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if call % 2 == 1 {
                    Err(call)
                } else {
                    Ok(call)
                }
            }
        })
        .standby(Standby::Never)
        .frequency(frequency(Backoff::Disabled, 10, 100)),
    )
    .unwrap();
    let mut ticks = poll.subscribe();

    let mut outcomes = Vec::new();
    while outcomes.len() < 4 {
        let state = next_state(&mut ticks).await;
        if state.phase.has_payload() {
            outcomes.push(state.phase);
        }
    }

    assert_eq!(
        outcomes,
        vec![
            Phase::Rejected,
            Phase::Reconnected,
            Phase::Rejected,
            Phase::Reconnected
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stale_result_is_dropped() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let poll: Poll<usize, String> = Poll::new(
        PollOptions::new(move |_| {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                sleep(Duration::from_millis(50)).await;
                Ok(call)
            }
        })
        .standby(Standby::Never)
        .frequency(frequency(Backoff::Disabled, 1000, 5000)),
    )
    .unwrap();
    let mut ticks = poll.subscribe();

    assert_eq!(next_state(&mut ticks).await.phase, Phase::WhenResolved);
    sleep(Duration::from_millis(10)).await;
    poll.refresh().await;
    assert_eq!(next_state(&mut ticks).await.phase, Phase::Refreshed);

    // The first call finishes first but belongs to a superseded tick.
    let resolved = next_state(&mut ticks).await;
    assert_eq!(resolved.phase, Phase::Resolved);
    assert_eq!(resolved.value(), Some(&2));
}

// ============================================================================
// Standby
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_standby_predicate_skips_factory() {
    let calls = Arc::new(AtomicUsize::new(0));
    let poll = Poll::new(counting_options(Arc::clone(&calls)).standby(Standby::when(|| true)))
        .unwrap();
    let mut ticks = poll.subscribe();

    assert_eq!(next_state(&mut ticks).await.phase, Phase::WhenResolved);
    for _ in 0..5 {
        let state = next_state(&mut ticks).await;
        assert_eq!(state.phase, Phase::Standby);
        assert_eq!(state.interval, Duration::from_millis(10));
    }

    sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(poll.state().phase, Phase::Standby);
}

#[tokio::test(start_paused = true)]
async fn test_when_hidden_follows_visibility() {
    let calls = Arc::new(AtomicUsize::new(0));
    let visibility = VisibilityFlag::new(false);
    let poll = Poll::new(
        counting_options(Arc::clone(&calls))
            .standby(Standby::WhenHidden)
            .visibility(visibility.clone()),
    )
    .unwrap();

    sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(poll.state().phase, Phase::Standby);

    visibility.set_visible(true);
    sleep(Duration::from_millis(100)).await;
    assert!(calls.load(Ordering::SeqCst) > 0);
}

#[tokio::test(start_paused = true)]
async fn test_set_standby_applies_to_next_execution() {
    let calls = Arc::new(AtomicUsize::new(0));
    let poll = Poll::new(counting_options(Arc::clone(&calls))).unwrap();

    sleep(Duration::from_millis(55)).await;
    assert!(calls.load(Ordering::SeqCst) > 0);

    poll.set_standby(Standby::when(|| true));
    sleep(Duration::from_millis(20)).await;
    let frozen = calls.load(Ordering::SeqCst);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), frozen);
}

// ============================================================================
// start / stop / refresh
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stop_twice_transitions_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let poll = Poll::new(counting_options(Arc::clone(&calls))).unwrap();
    let mut ticks = poll.subscribe();

    poll.stop().await;
    poll.stop().await;
    assert_eq!(poll.state().phase, Phase::Stopped);
    assert_eq!(poll.state().interval, NEVER);

    let frozen = calls.load(Ordering::SeqCst);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(calls.load(Ordering::SeqCst), frozen);

    poll.dispose();
    let phases = drain(&mut ticks).await;
    assert_eq!(count(&phases, Phase::Stopped), 1);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_coalesces() {
    let calls = Arc::new(AtomicUsize::new(0));
    let poll = Poll::new(counting_options(Arc::clone(&calls))).unwrap();
    let mut ticks = poll.subscribe();

    poll.tick().await.unwrap();
    poll.stop().await;
    tokio::join!(poll.refresh(), poll.refresh());

    poll.dispose();
    let phases = drain(&mut ticks).await;
    assert_eq!(count(&phases, Phase::Refreshed), 1);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_runs_factory() {
    let calls = Arc::new(AtomicUsize::new(0));
    let poll = Poll::new(counting_options(Arc::clone(&calls))).unwrap();
    let mut ticks = poll.subscribe();

    poll.stop().await;
    let stopped_at = calls.load(Ordering::SeqCst);

    poll.refresh().await;
    loop {
        let state = next_state(&mut ticks).await;
        if state.phase == Phase::Resolved && state.value() > Some(&stopped_at) {
            break;
        }
    }
    assert!(calls.load(Ordering::SeqCst) > stopped_at);
}

#[tokio::test(start_paused = true)]
async fn test_start_resumes_stopped_poll() {
    let calls = Arc::new(AtomicUsize::new(0));
    let poll = Poll::new(counting_options(Arc::clone(&calls))).unwrap();
    let mut ticks = poll.subscribe();

    poll.stop().await;
    poll.start().await;
    assert_eq!(poll.state().phase, Phase::Started);
    assert_eq!(poll.state().interval, IMMEDIATE);

    loop {
        if next_state(&mut ticks).await.phase == Phase::Started {
            break;
        }
    }
    assert_eq!(next_state(&mut ticks).await.phase, Phase::Resolved);
}

#[tokio::test(start_paused = true)]
async fn test_start_is_noop_while_active() {
    let calls = Arc::new(AtomicUsize::new(0));
    let poll = Poll::new(
        counting_options(Arc::clone(&calls)).frequency(frequency(Backoff::Disabled, 1000, 5000)),
    )
    .unwrap();
    let mut ticks = poll.subscribe();

    loop {
        if next_state(&mut ticks).await.phase == Phase::Resolved {
            break;
        }
    }
    poll.start().await;
    poll.start().await;
    assert_eq!(poll.state().phase, Phase::Resolved);

    poll.dispose();
    let phases = drain(&mut ticks).await;
    assert_eq!(count(&phases, Phase::Started), 0);
}

#[tokio::test(start_paused = true)]
async fn test_manual_poll_waits_for_start() {
    let calls = Arc::new(AtomicUsize::new(0));
    let poll = Poll::new(counting_options(Arc::clone(&calls)).auto(false)).unwrap();
    let mut ticks = poll.subscribe();

    let gate = next_state(&mut ticks).await;
    assert_eq!(gate.phase, Phase::WhenResolved);
    assert_eq!(gate.interval, NEVER);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    poll.start().await;
    assert_eq!(next_state(&mut ticks).await.phase, Phase::Started);
    assert_eq!(next_state(&mut ticks).await.phase, Phase::Resolved);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_schedule_custom_transition() {
    let calls = Arc::new(AtomicUsize::new(0));
    let poll = Poll::new(counting_options(Arc::clone(&calls)).auto(false)).unwrap();
    poll.tick().await.unwrap();

    poll.schedule(
        Next::new()
            .phase(Phase::Invoked)
            .interval(Duration::from_millis(30)),
    )
    .await;
    assert_eq!(poll.state().phase, Phase::Invoked);

    sleep(Duration::from_millis(20)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    sleep(Duration::from_millis(15)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    poll.schedule(Next::new().phase(Phase::Started).cancel(|_| true))
        .await;
    assert_ne!(poll.state().phase, Phase::Started);
}

// ============================================================================
// Gate
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_gate_rejection_still_ticks() {
    let poll: Poll<u8, String> = Poll::new(
        PollOptions::new(|_| async { Ok(7) })
            .standby(Standby::Never)
            .when(async { Err::<(), _>("kernel failed to start") }),
    )
    .unwrap();
    let mut ticks = poll.subscribe();

    assert_eq!(next_state(&mut ticks).await.phase, Phase::WhenRejected);
    let resolved = next_state(&mut ticks).await;
    assert_eq!(resolved.phase, Phase::Resolved);
    assert_eq!(resolved.value(), Some(&7));
}

#[tokio::test(start_paused = true)]
async fn test_gate_holds_requested_transitions() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (open, gate) = oneshot::channel::<()>();
    let poll = Poll::new(counting_options(Arc::clone(&calls)).when(gate)).unwrap();
    let mut ticks = poll.subscribe();

    tokio::join!(poll.stop(), async {
        sleep(Duration::from_millis(500)).await;
        assert_eq!(poll.state().phase, Phase::Constructed);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        open.send(()).unwrap();
    });

    assert_eq!(next_state(&mut ticks).await.phase, Phase::WhenResolved);
    let mut phase = next_state(&mut ticks).await.phase;
    while phase != Phase::Stopped {
        phase = next_state(&mut ticks).await.phase;
    }
    assert_eq!(poll.state().phase, Phase::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_before_gate_skips_first_tick() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (open, gate) = oneshot::channel::<()>();
    let poll = Poll::new(counting_options(Arc::clone(&calls)).when(gate)).unwrap();

    poll.dispose();
    let _ = open.send(());
    sleep(Duration::from_millis(100)).await;

    assert_eq!(poll.state().phase, Phase::Disposed);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Disposal
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_dispose_is_terminal() {
    let calls = Arc::new(AtomicUsize::new(0));
    let poll = Poll::new(counting_options(Arc::clone(&calls)).name("files")).unwrap();
    let mut ticks = poll.subscribe();
    poll.tick().await.unwrap();

    poll.dispose();
    poll.dispose();
    assert!(poll.is_disposed());
    assert_eq!(poll.state().phase, Phase::Disposed);
    assert_eq!(poll.state().interval, NEVER);
    poll.disposed().await;

    let error = poll.tick().await.unwrap_err();
    assert_eq!(
        error,
        PollError::Disposed {
            name: "files".to_string()
        }
    );

    poll.refresh().await;
    poll.start().await;
    poll.stop().await;
    assert_eq!(poll.state().phase, Phase::Disposed);

    let frozen = calls.load(Ordering::SeqCst);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(calls.load(Ordering::SeqCst), frozen);

    drain(&mut ticks).await;
    assert!(matches!(
        poll.subscribe().recv().await,
        Err(broadcast::error::RecvError::Closed)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_dispose_rejects_pending_tick() {
    let poll: Poll<u8, String> = Poll::new(
        PollOptions::new(|_| async { Ok(1) })
            .when(futures::future::pending::<Result<(), String>>()),
    )
    .unwrap();

    let (tick, ()) = tokio::join!(poll.tick(), async {
        sleep(Duration::from_millis(10)).await;
        poll.dispose();
    });

    assert!(matches!(tick, Err(PollError::Disposed { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_connected_listener_sees_every_transition() {
    let calls = Arc::new(AtomicUsize::new(0));
    let poll = Poll::new(counting_options(Arc::clone(&calls))).unwrap();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let recorded = Arc::clone(&seen);
    poll.connect(move |state| recorded.lock().push(state.phase));

    poll.stop().await;
    poll.dispose();

    let seen = seen.lock().clone();
    assert_eq!(seen.first(), Some(&Phase::WhenResolved));
    assert_eq!(seen.last(), Some(&Phase::Stopped));
}

// ============================================================================
// Notification order
// ============================================================================

/// Return the newest state already buffered in `ticks`.
fn latest<T, U>(ticks: &mut Ticks<T, U>) -> Option<Arc<State<T, U>>> {
    let mut latest = None;
    while let Ok(state) = ticks.try_recv() {
        latest = Some(state);
    }
    latest
}

#[tokio::test(start_paused = true)]
async fn test_observers_are_notified_before_tick_resolves() {
    let calls = Arc::new(AtomicUsize::new(0));
    let poll = Poll::new(counting_options(Arc::clone(&calls)).auto(false)).unwrap();
    let mut ticks = poll.subscribe();
    let seen: Arc<parking_lot::Mutex<Vec<Arc<State<usize, String>>>>> = Arc::default();
    let recorded = Arc::clone(&seen);
    poll.connect(move |state| recorded.lock().push(Arc::clone(state)));

    poll.tick().await.unwrap();
    let current = poll.state();
    assert_eq!(current.phase, Phase::WhenResolved);
    assert!(Arc::ptr_eq(&current, seen.lock().last().unwrap()));
    assert!(Arc::ptr_eq(&current, &latest(&mut ticks).unwrap()));

    let (ticked, ()) = tokio::join!(poll.tick(), poll.stop());
    ticked.unwrap();
    let current = poll.state();
    assert_eq!(current.phase, Phase::Stopped);
    assert!(Arc::ptr_eq(&current, seen.lock().last().unwrap()));
    assert!(Arc::ptr_eq(&current, &latest(&mut ticks).unwrap()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transitions_are_observed_in_order() {
    let calls = Arc::new(AtomicUsize::new(0));
    let poll = Arc::new(Poll::new(counting_options(Arc::clone(&calls)).capacity(4096)).unwrap());
    let mut ticks = poll.subscribe();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let recorded = Arc::clone(&seen);
    poll.connect(move |state| recorded.lock().push(state.timestamp));
    poll.tick().await.unwrap();

    let mut tasks = Vec::new();
    for task in 0..16 {
        let poll = Arc::clone(&poll);
        tasks.push(tokio::spawn(async move {
            for round in 0..40 {
                match (task + round) % 3 {
                    0 => poll.stop().await,
                    1 => poll.start().await,
                    _ => poll.refresh().await,
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    poll.dispose();

    let mut streamed = Vec::new();
    loop {
        match ticks.recv().await {
            Ok(state) => streamed.push(state.timestamp),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    let seen = seen.lock().clone();
    assert!(seen.len() > 1);
    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(streamed.len() > 1);
    assert!(streamed.windows(2).all(|pair| pair[0] <= pair[1]));
}
