use std::time::Duration;

/// Exponential retry delays: `base * factor^failures`, capped at `max`.
///
/// No jitter, so retry schedules are reproducible in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base: Duration,
    pub factor: u32,
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(4),
            factor: 2,
            max: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    failures: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay to wait after one more failure.
    pub fn next_delay(&mut self) -> Duration {
        let factor = self.config.factor.max(1);
        let multiplier = factor.checked_pow(self.failures).unwrap_or(u32::MAX);
        self.failures = self.failures.saturating_add(1);

        self.config
            .base
            .checked_mul(multiplier)
            .unwrap_or(self.config.max)
            .min(self.config.max)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::{Backoff, BackoffConfig};
    use std::time::Duration;

    fn config() -> BackoffConfig {
        BackoffConfig {
            base: Duration::from_secs(4),
            factor: 2,
            max: Duration::from_secs(30),
        }
    }

    #[test]
    fn doubles_until_capped() {
        let mut b = Backoff::new(config());
        let delays: Vec<u64> = (0..6).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![4, 8, 16, 30, 30, 30]);
        assert_eq!(b.failures(), 6);
    }

    #[test]
    fn reset_starts_over() {
        let mut b = Backoff::new(config());
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(4));
    }

    #[test]
    fn survives_many_failures() {
        let mut b = Backoff::new(config());
        for _ in 0..100 {
            b.next_delay();
        }
        assert_eq!(b.next_delay(), Duration::from_secs(30));
    }
}
