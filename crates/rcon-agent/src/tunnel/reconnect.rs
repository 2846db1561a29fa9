//! Re-dial pacing after the tunnel is lost

use std::time::Duration;

use rand::Rng;

use rcon_core::config::BackoffConfig;

/// Exponential backoff with additive jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    current: Duration,
    max: Duration,
    multiplier: f64,
    /// Fraction of the base delay added at random (0.0 to 1.0)
    jitter: f64,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.initial, config.max, config.multiplier, config.jitter)
    }

    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            initial,
            current: initial.min(max),
            max,
            multiplier: multiplier.max(1.0),
            jitter: jitter.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    /// Delay before the next attempt; advances the schedule
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.attempt = self.attempt.saturating_add(1);

        let grown = base.as_secs_f64() * self.multiplier;
        self.current = Duration::try_from_secs_f64(grown)
            .unwrap_or(self.max)
            .min(self.max);

        if self.jitter == 0.0 {
            return base;
        }
        let extra = base.as_secs_f64() * rand::thread_rng().gen_range(0.0..=self.jitter);
        base + Duration::from_secs_f64(extra)
    }

    /// Attempts since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Start over after a successful connection
    pub fn reset(&mut self) {
        self.current = self.initial.min(self.max);
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_doubles_until_capped() {
        let mut backoff = ExponentialBackoff::new(secs(1), secs(10), 2.0, 0.0);
        let delays: Vec<_> = (0..6).map(|_| backoff.next_delay()).collect();

        assert_eq!(delays, vec![secs(1), secs(2), secs(4), secs(8), secs(10), secs(10)]);
        assert_eq!(backoff.attempt(), 6);
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let mut backoff = ExponentialBackoff::new(secs(4), secs(4), 2.0, 0.5);
        for _ in 0..100 {
            let delay = backoff.next_delay();
            assert!(delay >= secs(4) && delay <= secs(6), "{:?}", delay);
        }
    }

    #[test]
    fn test_reset_restarts_schedule() {
        let mut backoff = ExponentialBackoff::from_config(&BackoffConfig {
            initial: secs(1),
            max: secs(60),
            multiplier: 3.0,
            jitter: 0.0,
        });
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();

        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), secs(1));
    }

    #[test]
    fn test_degenerate_parameters_are_sane() {
        let mut backoff = ExponentialBackoff::new(secs(90), secs(30), 0.5, 7.0);
        assert!(backoff.next_delay() <= secs(60));
        assert!(backoff.next_delay() >= secs(30));
    }
}
