//! Reconnection policy: one owned object with explicit attempt count, backoff and in-flight flag.

use std::time::Duration;

use rand::Rng;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Jitter added on top of the backoff, as a fraction of it.
const JITTER_FRACTION: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    attempts: u32,
    in_flight: bool,
    jitter: bool,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
            attempts: 0,
            in_flight: false,
            jitter: true,
        }
    }

    /// Disable random jitter (deterministic delays).
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Start an attempt. `None` if one is already in flight or attempts are used up;
    /// otherwise the delay to wait before connecting.
    pub fn begin(&mut self) -> Option<Duration> {
        if self.in_flight || self.exhausted() {
            return None;
        }
        self.in_flight = true;
        Some(self.delay_for(self.attempts))
    }

    /// Exponential backoff `base * 2^attempt`, capped at `max_delay`, plus jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..JITTER_FRACTION);
        delay + delay.mul_f64(extra)
    }

    pub fn succeeded(&mut self) {
        self.attempts = 0;
        self.in_flight = false;
    }

    pub fn failed(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
        self.in_flight = false;
    }

    /// Forget previous failures (manual reconnect).
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_ATTEMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy::new(Duration::from_millis(100), Duration::from_millis(500), 3)
            .without_jitter()
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let p = policy();
        assert_eq!(p.delay_for(0), Duration::from_millis(100));
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(2), Duration::from_millis(400));
        assert_eq!(p.delay_for(3), Duration::from_millis(500));
        assert_eq!(p.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn non_reentrant() {
        let mut p = policy();
        assert!(p.begin().is_some());
        assert!(p.in_flight());
        assert!(p.begin().is_none());
        p.failed();
        assert!(!p.in_flight());
        assert_eq!(p.begin(), Some(Duration::from_millis(200)));
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let mut p = policy();
        for _ in 0..3 {
            assert!(p.begin().is_some());
            p.failed();
        }
        assert!(p.exhausted());
        assert!(p.begin().is_none());
        p.reset();
        assert!(p.begin().is_some());
    }

    #[test]
    fn success_resets_attempts() {
        let mut p = policy();
        p.begin();
        p.failed();
        p.begin();
        p.succeeded();
        assert_eq!(p.attempts(), 0);
        assert_eq!(p.begin(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let p = ReconnectPolicy::new(Duration::from_millis(100), Duration::from_secs(1), 3);
        for _ in 0..50 {
            let d = p.delay_for(1);
            assert!(d >= Duration::from_millis(200));
            assert!(d < Duration::from_millis(240));
        }
    }
}
