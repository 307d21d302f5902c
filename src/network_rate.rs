// Smoothed network throughput from raw interface byte counters

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::models::NetworkInterface;

pub const EMA_ALPHA: f64 = 0.4;
/// Rates below this (bits/s) decay the average instead of feeding it.
pub const MIN_RATE_BPS: f64 = 0.001;
/// Samples closer together than this keep the previous rate.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Exponential moving average over one byte counter.
#[derive(Debug, Clone, Default)]
pub struct RateSmoother {
    last_bytes: u64,
    last_sample: Option<Instant>,
    ema: f64,
}

impl RateSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> f64 {
        self.ema.max(0.0)
    }

    /// Feeds a counter reading taken at `now` and returns the smoothed rate in bits/s.
    /// The first reading only primes the smoother and yields 0.
    pub fn update(&mut self, bytes: u64, now: Instant) -> f64 {
        let Some(last) = self.last_sample else {
            self.last_bytes = bytes;
            self.last_sample = Some(now);
            return 0.0;
        };

        let elapsed = now.saturating_duration_since(last);
        if elapsed < MIN_SAMPLE_INTERVAL {
            tracing::debug!(
                elapsed_ms = elapsed.as_millis() as u64,
                rate = self.ema,
                "Sample too soon, keeping previous rate"
            );
            return self.current();
        }

        let secs = elapsed.as_secs_f64();
        let delta = if bytes < self.last_bytes {
            tracing::debug!(
                previous = self.last_bytes,
                current = bytes,
                "Counter reset detected"
            );
            bytes
        } else {
            bytes - self.last_bytes
        };
        let raw = delta as f64 * 8.0 / secs;

        if raw >= MIN_RATE_BPS {
            self.ema = EMA_ALPHA * raw + (1.0 - EMA_ALPHA) * self.ema;
        } else {
            self.ema *= 1.0 - EMA_ALPHA;
        }

        self.last_bytes = bytes;
        self.last_sample = Some(now);
        self.current()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Direction {
    Rx,
    Tx,
}

/// Smoothers for every interface seen so far, keyed by interface and direction.
#[derive(Debug, Default)]
pub struct NetworkRateTracker {
    smoothers: HashMap<(String, Direction), RateSmoother>,
}

impl NetworkRateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fills `rx_rate_bps`/`tx_rate_bps` from the raw counters. Interfaces that
    /// disappeared are forgotten so a later reappearance starts fresh.
    pub fn apply(&mut self, interfaces: &mut [NetworkInterface], now: Instant) {
        self.smoothers
            .retain(|(name, _), _| interfaces.iter().any(|i| &i.name == name));
        for iface in interfaces.iter_mut() {
            iface.rx_rate_bps = self
                .smoothers
                .entry((iface.name.clone(), Direction::Rx))
                .or_default()
                .update(iface.rx_bytes, now);
            iface.tx_rate_bps = self
                .smoothers
                .entry((iface.name.clone(), Direction::Tx))
                .or_default()
                .update(iface.tx_bytes, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn first_sample_is_zero_then_ema() {
        let t0 = Instant::now();
        let mut s = RateSmoother::new();
        assert_eq!(s.update(1_000, t0), 0.0);
        // 1000 bytes over 1s = 8000 bit/s, EMA from 0 with alpha 0.4.
        let r = s.update(2_000, t0 + Duration::from_secs(1));
        assert!(approx(r, 3_200.0));
        let r = s.update(3_000, t0 + Duration::from_secs(2));
        assert!(approx(r, 0.4 * 8_000.0 + 0.6 * 3_200.0));
    }

    #[test]
    fn short_interval_keeps_previous_rate() {
        let t0 = Instant::now();
        let mut s = RateSmoother::new();
        s.update(0, t0);
        let r1 = s.update(1_000, t0 + Duration::from_secs(1));
        let r2 = s.update(50_000, t0 + Duration::from_millis(1_500));
        assert_eq!(r1, r2);
    }

    #[test]
    fn idle_link_decays_and_reset_uses_current_bytes() {
        let t0 = Instant::now();
        let mut s = RateSmoother::new();
        s.update(0, t0);
        let r = s.update(1_000, t0 + Duration::from_secs(1));
        let idle = s.update(1_000, t0 + Duration::from_secs(2));
        assert!(approx(idle, r * 0.6));

        let after_reset = s.update(500, t0 + Duration::from_secs(3));
        assert!(approx(after_reset, 0.4 * 4_000.0 + 0.6 * idle));
    }

    #[test]
    fn tracker_fills_both_directions() {
        let t0 = Instant::now();
        let mut tracker = NetworkRateTracker::new();
        let mut ifaces = vec![NetworkInterface {
            name: "eth0".into(),
            rx_bytes: 0,
            tx_bytes: 0,
            ..Default::default()
        }];
        tracker.apply(&mut ifaces, t0);
        ifaces[0].rx_bytes = 1_000;
        ifaces[0].tx_bytes = 500;
        tracker.apply(&mut ifaces, t0 + Duration::from_secs(1));
        assert!(approx(ifaces[0].rx_rate_bps, 3_200.0));
        assert!(approx(ifaces[0].tx_rate_bps, 1_600.0));

        tracker.apply(&mut [], t0 + Duration::from_secs(2));
        assert!(tracker.smoothers.is_empty());
    }
}
