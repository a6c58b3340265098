//! Shared exponential-backoff helper used by every reconnect loop
//! (MQTT service, presence watchers, FTPS service) so retry behavior is
//! consistent across transports (§9 Design Notes).

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base_delay: f64,
    factor: f64,
    max_delay: f64,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(base_delay: f64, max_delay: f64) -> Self {
        Self {
            base_delay,
            factor: 1.8,
            max_delay,
            jitter: 0.1,
            attempt: 0,
        }
    }

    pub fn default_connection() -> Self {
        Self::new(5.0, 60.0)
    }

    /// Compute the next delay, advancing the internal attempt counter.
    /// Delay grows geometrically by `factor` per attempt, capped at
    /// `max_delay`, with up to `±jitter` fractional noise applied.
    pub fn next_delay(&mut self) -> Duration {
        let raw = self.base_delay * self.factor.powi(self.attempt as i32);
        let capped = raw.min(self.max_delay);
        self.attempt = self.attempt.saturating_add(1);
        let jitter_span = capped * self.jitter;
        let noise = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
        Duration::from_secs_f64((capped + noise).max(0.0))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        let mut b = Backoff::new(5.0, 60.0);
        let first = b.next_delay().as_secs_f64();
        assert!(first > 4.0 && first < 6.0);
        for _ in 0..20 {
            b.next_delay();
        }
        let capped = b.next_delay().as_secs_f64();
        assert!(capped <= 66.0);
    }

    #[test]
    fn reset_restarts_from_base() {
        let mut b = Backoff::new(5.0, 60.0);
        b.next_delay();
        b.next_delay();
        b.reset();
        let after_reset = b.next_delay().as_secs_f64();
        assert!(after_reset > 4.0 && after_reset < 6.0);
    }
}
