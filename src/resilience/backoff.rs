//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Doubling delay sequence, capped at `max`, with up to 10% jitter added.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            max,
        }
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        base + jitter(base)
    }
}

fn jitter(delay: Duration) -> Duration {
    let range_ms = (delay.as_millis() / 10) as u64;
    if range_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..range_ms))
}
