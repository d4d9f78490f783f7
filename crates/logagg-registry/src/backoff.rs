//! Retry delay for heartbeat pollers.
//!
//! Doubles after every failed session up to a cap, and resets once a
//! session makes progress. With `max == initial` it degenerates to a
//! fixed retry interval.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryBackoff {
    initial: Duration,
    max: Duration,
    /// Delay handed out by the next `fail()`.
    current: Duration,
    failures: u32,
}

impl RetryBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
            failures: 0,
        }
    }

    /// Record a failure and return how long to wait before retrying.
    pub fn fail(&mut self) -> Duration {
        let delay = self.current;
        self.failures = self.failures.saturating_add(1);
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
        self.failures = 0;
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }
}
