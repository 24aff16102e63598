//! Decorrelated-jitter backoff.
//!
//! Each failure draws the next delay uniformly from `[interval, last * growth]`
//! and caps it at `max`, so consecutive failures widen the range off the
//! previously chosen delay rather than following a fixed sequence.

use std::time::Duration;

use rand::Rng;

use crate::frequency::{Frequency, NEVER};
use crate::state::State;

/// Compute the delay before retrying after `last` was rejected.
pub fn sleep<T, U>(frequency: &Frequency, last: &State<T, U>) -> Duration {
    sleep_with(&mut rand::thread_rng(), frequency, last.interval)
}

/// [`sleep`] with an explicit random source and previous delay.
pub fn sleep_with<R: Rng + ?Sized>(
    rng: &mut R,
    frequency: &Frequency,
    last_interval: Duration,
) -> Duration {
    if frequency.interval == NEVER {
        return NEVER;
    }

    let min = millis(frequency.interval);
    let grown = (millis(last_interval) as f64 * frequency.backoff.growth()).floor();
    let upper = if grown >= u64::MAX as f64 {
        u64::MAX
    } else {
        (grown as u64).max(min)
    };

    let drawn = rng.gen_range(min..=upper);
    Duration::from_millis(drawn).min(frequency.max)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
