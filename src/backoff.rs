//! Reconnect delay calculator.

use std::time::Duration;

/// Reconnect delay state for one account loop.
///
/// With `factor == 1` every retry waits the same `initial` delay.
/// Larger factors grow the delay up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    factor: u32,
    max: Duration,
    next: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(initial: Duration, factor: u32, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            factor: factor.max(1),
            max,
            next: initial,
        }
    }

    /// A constant delay.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self::new(delay, 1, delay)
    }

    /// Return the delay to wait now and precompute the next one.
    pub fn advance(&mut self) -> Duration {
        let current = self.next;
        self.next = current.saturating_mul(self.factor).min(self.max);
        current
    }

    /// Back to the initial delay after a connection succeeded.
    pub const fn reset(&mut self) {
        self.next = self.initial;
    }

    #[must_use]
    pub const fn peek(&self) -> Duration {
        self.next
    }
}
