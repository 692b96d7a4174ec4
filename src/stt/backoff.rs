use super::STTConfig;
use std::time::Duration;

/// Exponential reconnect schedule with a delay cap and an attempt cap
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max_delay: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_delay,
            max_attempts,
            attempt: 0,
        }
    }

    pub fn from_config(config: &STTConfig) -> Self {
        Self::new(
            config.reconnect_base,
            config.reconnect_max_delay,
            config.reconnect_max_attempts,
        )
    }

    /// Delay before the next attempt, or `None` once the attempt cap is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let factor = 1u32 << self.attempt.min(16);
        self.attempt += 1;
        Some(self.base.saturating_mul(factor).min(self.max_delay))
    }

    /// Attempts handed out since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_then_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5), 6);
        let delays: Vec<u64> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5, 5]);
        assert_eq!(backoff.attempts(), 6);
    }

    #[test]
    fn test_exhaustion_is_sticky_until_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(40), 2);
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert!(backoff.next_delay().is_none());

        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_large_attempt_counts_do_not_overflow() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 64);
        let last = std::iter::from_fn(|| backoff.next_delay()).last();
        assert_eq!(last, Some(Duration::from_secs(30)));
    }
}
