//! Round-trip estimation (RFC 6298).
//!
//! ```text
//! first sample:  srtt = R, rttvar = R / 2
//! afterwards:    rttvar += beta  * (|R - srtt| - rttvar)
//!                srtt   += alpha * (R - srtt)
//! rto = clamp(srtt + max(G, 4 * rttvar), min_rto, max_rto)
//! ```

use crate::config::ReliabilityConfig;
use std::time::Duration;

const SRTT_ALPHA: f64 = 0.125;
const RTTVAR_BETA: f64 = 0.25;
const RTO_K: f64 = 4.0;

fn millis_to_duration(ms: f64) -> Duration {
    Duration::from_micros((ms * 1000.0).round() as u64)
}

#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Smoothed RTT in milliseconds
    srtt: f64,
    /// RTT variance in milliseconds
    rttvar: f64,
    initialized: bool,
    initial_rto: Duration,
    min_rto: Duration,
    max_rto: Duration,
    granularity_ms: f64,
}

impl RttEstimator {
    pub fn new(config: &ReliabilityConfig) -> Self {
        Self {
            srtt: 0.0,
            rttvar: 0.0,
            initialized: false,
            initial_rto: config.initial_rto,
            min_rto: config.min_rto,
            max_rto: config.max_rto,
            granularity_ms: config.clock_granularity.as_secs_f64() * 1000.0,
        }
    }

    /// Adopt new timing bounds, keeping the current estimate
    pub fn configure(&mut self, config: &ReliabilityConfig) {
        self.initial_rto = config.initial_rto;
        self.min_rto = config.min_rto;
        self.max_rto = config.max_rto;
        self.granularity_ms = config.clock_granularity.as_secs_f64() * 1000.0;
    }

    pub fn update(&mut self, sample: Duration) {
        let sample_ms = sample.as_secs_f64() * 1000.0;

        if !self.initialized {
            self.srtt = sample_ms;
            self.rttvar = sample_ms / 2.0;
            self.initialized = true;
        } else {
            self.rttvar += RTTVAR_BETA * ((sample_ms - self.srtt).abs() - self.rttvar);
            self.srtt += SRTT_ALPHA * (sample_ms - self.srtt);
        }
    }

    /// Current retransmission timeout; `initial_rto` until the first sample
    pub fn rto(&self) -> Duration {
        if !self.initialized {
            return self.initial_rto;
        }

        let rto_ms = self.srtt + f64::max(self.granularity_ms, RTO_K * self.rttvar);
        let rto_ms = rto_ms.clamp(
            self.min_rto.as_secs_f64() * 1000.0,
            self.max_rto.as_secs_f64() * 1000.0,
        );
        millis_to_duration(rto_ms)
    }

    pub fn srtt(&self) -> Duration {
        millis_to_duration(self.srtt)
    }

    pub fn rttvar(&self) -> Duration {
        millis_to_duration(self.rttvar)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn reset(&mut self) {
        self.srtt = 0.0;
        self.rttvar = 0.0;
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> RttEstimator {
        RttEstimator::new(&ReliabilityConfig::default())
    }

    #[test]
    fn test_initial_rto_before_samples() {
        let rtt = estimator();
        assert!(!rtt.is_initialized());
        assert_eq!(rtt.rto(), ReliabilityConfig::default().initial_rto);
    }

    #[test]
    fn test_first_sample() {
        let mut rtt = estimator();
        rtt.update(Duration::from_millis(100));
        assert_eq!(rtt.srtt(), Duration::from_millis(100));
        assert_eq!(rtt.rttvar(), Duration::from_millis(50));
        // 100 + 4 * 50
        assert_eq!(rtt.rto(), Duration::from_millis(300));
    }

    #[test]
    fn test_smoothing() {
        let mut rtt = estimator();
        rtt.update(Duration::from_millis(100));
        rtt.update(Duration::from_millis(200));
        // rttvar = 50 + 0.25 * (100 - 50) = 62.5, srtt = 100 + 0.125 * 100 = 112.5
        assert!((rtt.srtt().as_secs_f64() * 1000.0 - 112.5).abs() < 1e-6);
        assert!((rtt.rttvar().as_secs_f64() * 1000.0 - 62.5).abs() < 1e-6);
    }

    #[test]
    fn test_rto_clamped() {
        let config = ReliabilityConfig::default();
        let mut rtt = RttEstimator::new(&config);
        rtt.update(Duration::from_millis(1));
        assert_eq!(rtt.rto(), config.min_rto);

        let mut rtt = RttEstimator::new(&config);
        rtt.update(Duration::from_secs(30));
        assert_eq!(rtt.rto(), config.max_rto);
    }

    #[test]
    fn test_reset() {
        let mut rtt = estimator();
        rtt.update(Duration::from_millis(80));
        rtt.reset();
        assert!(!rtt.is_initialized());
    }
}
