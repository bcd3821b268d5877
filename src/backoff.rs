//! Capped exponential backoff for reconnection attempts.
//!
//! Pure bookkeeping: the reconnect worker asks for the current delay, sleeps,
//! and calls [`Backoff::advance`] after a failed attempt or
//! [`Backoff::reset`] after a successful one.

use std::time::Duration;

/// Default initial delay between reconnection attempts.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(2);

/// Default upper bound on the delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default growth factor per failed attempt.
pub const DEFAULT_MULTIPLIER: f64 = 1.5;

/// Backoff state: current delay plus the count of failed attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    /// Create a backoff starting at `initial`, capped at `max`.
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max,
            multiplier,
            current: initial,
            attempts: 0,
        }
    }

    /// Delay to wait before the next attempt.
    #[inline]
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Number of consecutive failed attempts since the last reset.
    #[inline]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a failed attempt and return the new delay.
    ///
    /// `next = min(current * multiplier, max)`
    pub fn advance(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        let next = self.current.as_secs_f64() * self.multiplier;
        self.current = Duration::try_from_secs_f64(next)
            .unwrap_or(self.max)
            .min(self.max);
        self.current
    }

    /// Return to the initial delay and zero attempts.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }

    /// Closed form of the delay after `failures` consecutive failures:
    /// `min(initial * multiplier^failures, max)`.
    pub fn delay_after(&self, failures: u32) -> Duration {
        let factor = self.multiplier.powi(failures.min(i32::MAX as u32) as i32);
        let secs = self.initial.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MULTIPLIER)
    }
}
