//! Adaptive retransmission timeout.
//!
//! Reliable delivery requires that unacknowledged packets are re-sent if no
//! answer arrives within a bounded time.  [`RttEstimator`] turns round-trip
//! samples into that bound with the classic Jacobson/Karels rule:
//!
//! ```text
//! estimated = 7/8 · estimated + 1/8 · sample
//! dev       = 3/4 · dev       + 1/4 · |sample − estimated|
//! timeout   = estimated + 4 · dev
//! ```
//!
//! The timeout is clamped to the configured `[min_timeout, max_timeout]`.
//! Retransmitted packets still produce samples; the resulting noise is
//! accepted.

use std::time::Duration;

use crate::config::TransportConfig;

/// Smoothed RTT state for one session.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    estimated_rtt: Duration,
    dev_rtt: Duration,
    timeout: Duration,
    min_timeout: Duration,
    max_timeout: Duration,
}

impl RttEstimator {
    /// Seed the estimator from `config.initial_rtt`, with zero deviation.
    pub fn new(config: &TransportConfig) -> Self {
        let mut this = Self {
            estimated_rtt: config.initial_rtt,
            dev_rtt: Duration::ZERO,
            timeout: config.initial_rtt,
            min_timeout: config.min_timeout,
            max_timeout: config.max_timeout,
        };
        this.timeout = this.clamp(config.initial_rtt);
        this
    }

    /// Fold one round-trip sample into the estimate.
    pub fn on_sample(&mut self, sample: Duration) {
        self.estimated_rtt = self.estimated_rtt * 7 / 8 + sample / 8;
        let diff = if sample > self.estimated_rtt {
            sample - self.estimated_rtt
        } else {
            self.estimated_rtt - sample
        };
        self.dev_rtt = self.dev_rtt * 3 / 4 + diff / 4;
        self.timeout = self.clamp(self.estimated_rtt + self.dev_rtt * 4);
    }

    /// How long to wait for an answer before retransmitting.
    pub fn current_timeout(&self) -> Duration {
        self.timeout
    }

    pub fn estimated_rtt(&self) -> Duration {
        self.estimated_rtt
    }

    pub fn dev_rtt(&self) -> Duration {
        self.dev_rtt
    }

    fn clamp(&self, timeout: Duration) -> Duration {
        timeout.max(self.min_timeout).min(self.max_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> RttEstimator {
        RttEstimator::new(
            &TransportConfig::default()
                .with_timeout_bounds(Duration::from_millis(1), Duration::from_secs(60)),
        )
    }

    #[test]
    fn seed_gives_conservative_first_timeout() {
        let est = RttEstimator::new(&TransportConfig::default());
        assert_eq!(est.current_timeout(), Duration::from_secs(1));
        assert_eq!(est.dev_rtt(), Duration::ZERO);
    }

    #[test]
    fn single_sample_follows_formula() {
        let mut est = estimator();
        est.on_sample(Duration::from_millis(200));
        // 0.875 * 1000 + 0.125 * 200 = 900
        assert_eq!(est.estimated_rtt(), Duration::from_millis(900));
        // 0.25 * |200 - 900| = 175
        assert_eq!(est.dev_rtt(), Duration::from_millis(175));
        assert_eq!(est.current_timeout(), Duration::from_millis(900 + 4 * 175));
    }

    #[test]
    fn steady_samples_converge() {
        let mut est = estimator();
        let rtt = Duration::from_millis(100);
        for _ in 0..300 {
            est.on_sample(rtt);
        }
        let timeout = est.current_timeout();
        assert!(timeout >= rtt, "timeout {timeout:?} below rtt");
        assert!(timeout < rtt + Duration::from_millis(2), "timeout {timeout:?} did not settle");

        // Further identical samples keep it put.
        est.on_sample(rtt);
        let again = est.current_timeout();
        assert!(again.abs_diff(timeout) < Duration::from_millis(1));
    }

    #[test]
    fn timeout_equal_to_sample_is_stable() {
        let mut est = estimator();
        for _ in 0..200 {
            let sample = est.current_timeout();
            est.on_sample(sample);
        }
        let settled = est.current_timeout();
        assert!(settled <= Duration::from_secs(2), "diverged to {settled:?}");
        est.on_sample(settled);
        assert!(est.current_timeout().abs_diff(settled) < Duration::from_millis(5));
    }

    #[test]
    fn timeout_respects_bounds() {
        let config = TransportConfig::default()
            .with_timeout_bounds(Duration::from_millis(50), Duration::from_millis(500));
        let mut est = RttEstimator::new(&config);
        assert_eq!(est.current_timeout(), Duration::from_millis(500));
        for _ in 0..200 {
            est.on_sample(Duration::ZERO);
        }
        assert_eq!(est.current_timeout(), Duration::from_millis(50));
    }
}
