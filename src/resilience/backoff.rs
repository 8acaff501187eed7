//! Reconnect backoff for the message bus subscriber.

use rand::Rng;
use std::time::Duration;

/// Capped exponential delay between reconnect rounds.
///
/// A round is one pass over every configured server. The delay doubles per
/// failed round from `base` up to `max`, with up to 10% jitter on top so a
/// fleet of routers does not reconnect in lockstep.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failed_rounds: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failed_rounds: 0,
        }
    }

    /// Record a failed round and return how long to wait before the next.
    pub fn next_delay(&mut self) -> Duration {
        self.failed_rounds = self.failed_rounds.saturating_add(1);
        let factor = 2u32.saturating_pow(self.failed_rounds - 1);
        let delay = self.base.saturating_mul(factor).min(self.max);

        let jitter_ms = (delay.as_millis() / 10) as u64;
        if jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }

    /// A session got established; start over from `base`.
    pub fn reset(&mut self) {
        self.failed_rounds = 0;
    }

    pub fn failed_rounds(&self) -> u32 {
        self.failed_rounds
    }
}
