//! # Reconnection backoff
//!
//! Bounded exponential backoff between reconnection attempts on a failed link.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Backoff {
    initial_s: f64,
    max_s: f64,
    multiplier: f64,

    /// Delay which will be applied after the next failure
    delay_s: f64,

    /// Earliest time of the next attempt, `None` if an attempt may be made now
    next_attempt: Option<Instant>,

    /// Consecutive failed attempts
    failures: u32,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Backoff {
    /// Create a new backoff. The delay starts at `initial_s`, is multiplied by `multiplier` after
    /// every failure and never exceeds `max_s`.
    pub fn new(initial_s: f64, max_s: f64, multiplier: f64) -> Self {
        Self {
            initial_s,
            max_s,
            multiplier,
            delay_s: initial_s.min(max_s),
            next_attempt: None,
            failures: 0,
        }
    }

    /// Whether an attempt may be made at `now`.
    pub fn ready(&self, now: Instant) -> bool {
        match self.next_attempt {
            Some(t) => now >= t,
            None => true
        }
    }

    /// Record a failed attempt made at `now`, returning the delay before the next one.
    pub fn failed(&mut self, now: Instant) -> Duration {
        let delay = Duration::from_secs_f64(self.delay_s.max(0.0));

        self.next_attempt = Some(now + delay);
        self.failures = self.failures.saturating_add(1);
        self.delay_s = (self.delay_s * self.multiplier).min(self.max_s);

        delay
    }

    /// Clear the backoff after a successful attempt.
    pub fn reset(&mut self) {
        self.delay_s = self.initial_s.min(self.max_s);
        self.next_attempt = None;
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_backoff_grows_and_saturates() {
        let mut b = Backoff::new(0.1, 0.5, 2.0);
        let t0 = Instant::now();

        assert!(b.ready(t0));

        let delays: Vec<Duration> = (0..5).map(|_| b.failed(t0)).collect();
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(200));
        assert_eq!(delays[2], Duration::from_millis(400));
        assert_eq!(delays[3], Duration::from_millis(500));
        assert_eq!(delays[4], Duration::from_millis(500));
        assert_eq!(b.failures(), 5);

        assert!(!b.ready(t0));
        assert!(b.ready(t0 + Duration::from_millis(500)));

        b.reset();
        assert!(b.ready(t0));
        assert_eq!(b.failed(t0), Duration::from_millis(100));
    }
}
