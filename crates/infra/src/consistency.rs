//! Retry-until-predicate utility for read-after-write.
//!
//! Read views lag commands by an unbounded (in practice short) amount.
//! Callers that need to observe their own write poll a check with
//! [`eventually`] instead of sleeping ad hoc.

use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// Doubles after every failed attempt, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

/// How long and how often to retry a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_wait: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    /// One minute, polling every 100ms.
    fn default() -> Self {
        Self::fixed(Duration::from_secs(60), Duration::from_millis(100))
    }
}

impl RetryPolicy {
    pub fn fixed(max_wait: Duration, tick: Duration) -> Self {
        Self {
            max_wait,
            backoff: Backoff::Fixed(tick),
        }
    }

    pub fn exponential(max_wait: Duration, initial: Duration, max: Duration) -> Self {
        Self {
            max_wait,
            backoff: Backoff::Exponential { initial, max },
        }
    }

    /// Delay before attempt `attempt + 1` (attempts counted from 0).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(tick) => tick,
            Backoff::Exponential { initial, max } => initial
                .checked_mul(1u32 << attempt.min(16))
                .map_or(max, |d| d.min(max)),
        }
    }

    /// Sleep schedule bounded by `max_wait`: the last delay is shortened so
    /// the total never exceeds the window. Async callers drive their own
    /// sleeps from this.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        let mut elapsed = Duration::ZERO;
        let mut attempt = 0u32;
        std::iter::from_fn(move || {
            if elapsed >= self.max_wait {
                return None;
            }
            let delay = self.delay(attempt).min(self.max_wait - elapsed);
            elapsed += delay;
            attempt = attempt.saturating_add(1);
            Some(delay)
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsistencyError<O: core::fmt::Debug> {
    /// The check never succeeded within the window; `last` is its final observation.
    #[error("condition not met after {attempts} attempts in {waited:?} (last observation: {last:?})")]
    Timeout {
        attempts: u32,
        waited: Duration,
        last: O,
    },
}

/// Call `check` until it returns `Ok`, sleeping per `policy` between attempts.
///
/// `Err(observation)` marks a transient mismatch. The check runs at least
/// once, and once more when the window closes.
pub fn eventually<T, O, F>(policy: &RetryPolicy, mut check: F) -> Result<T, ConsistencyError<O>>
where
    O: core::fmt::Debug,
    F: FnMut() -> Result<T, O>,
{
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let last = match check() {
            Ok(value) => return Ok(value),
            Err(observation) => observation,
        };

        let waited = started.elapsed();
        if waited >= policy.max_wait {
            return Err(ConsistencyError::Timeout {
                attempts,
                waited,
                last,
            });
        }

        debug!(attempts, observation = ?last, "condition not met yet, retrying");
        let delay = policy.delay(attempts - 1).min(policy.max_wait - waited);
        thread::sleep(delay);
    }
}
