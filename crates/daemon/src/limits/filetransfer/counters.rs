//! Byte counters and smoothed throughput statistics.
//!
//! Two kinds of [`Counters`] exist at once: the device-wide aggregate held by
//! [`DeviceCounters`], shared by every permit and folded periodically by the
//! rate tracker, and one private record per permit.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Exponential decay weights for the 1, 5 and 15 minute horizons.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayWeights {
    /// Weight kept by the 1 minute average per sample.
    pub one: f64,
    /// Weight kept by the 5 minute average per sample.
    pub five: f64,
    /// Weight kept by the 15 minute average per sample.
    pub fifteen: f64,
}

impl DecayWeights {
    /// Weights for samples taken every `interval`.
    pub fn for_interval(interval: Duration) -> Self {
        let secs = interval.as_secs_f64();
        Self {
            one: (-secs / 60.0).exp(),
            five: (-secs / 300.0).exp(),
            fifteen: (-secs / 900.0).exp(),
        }
    }
}

/// Exponentially weighted averages over three horizons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RateAverages {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

impl RateAverages {
    fn fold(&mut self, sample: f64, weights: &DecayWeights) {
        self.one = ewma(self.one, sample, weights.one);
        self.five = ewma(self.five, sample, weights.five);
        self.fifteen = ewma(self.fifteen, sample, weights.fifteen);
    }
}

fn ewma(smoothed: f64, sample: f64, weight: f64) -> f64 {
    weight * smoothed + sample * (1.0 - weight)
}

/// Point-in-time copy of a counters record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CounterSnapshot {
    /// Cumulative bytes transmitted.
    pub tx_bytes: u64,
    /// Cumulative bytes received.
    pub rx_bytes: u64,
    /// Average transmit rate since start, bytes per second.
    pub tx_rate: f64,
    /// Average receive rate since start, bytes per second.
    pub rx_rate: f64,
    /// Smoothed per-interval transmit rate, bytes per second.
    pub tx_rate_smoothed: f64,
    /// Smoothed per-interval receive rate, bytes per second.
    pub rx_rate_smoothed: f64,
    /// Smoothed transmitted bytes per interval.
    pub tx_avg: RateAverages,
    /// Smoothed received bytes per interval.
    pub rx_avg: RateAverages,
    /// Number of folded sample periods.
    pub period: u32,
}

/// Mutable counters record. Always accessed under a lock.
#[derive(Debug, Clone)]
pub struct Counters {
    tx_bytes: u64,
    rx_bytes: u64,
    tx_rate: f64,
    rx_rate: f64,
    tx_rate_smoothed: f64,
    rx_rate_smoothed: f64,
    tx_avg: RateAverages,
    rx_avg: RateAverages,
    period: u32,
    started: Instant,
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

impl Counters {
    pub fn new() -> Self {
        Self {
            tx_bytes: 0,
            rx_bytes: 0,
            tx_rate: 0.0,
            rx_rate: 0.0,
            tx_rate_smoothed: 0.0,
            rx_rate_smoothed: 0.0,
            tx_avg: RateAverages::default(),
            rx_avg: RateAverages::default(),
            period: 0,
            started: Instant::now(),
        }
    }

    /// Add to the transmitted total. Skipped when the total would overflow.
    pub fn add_tx(&mut self, n: u64) {
        if let Some(total) = self.tx_bytes.checked_add(n) {
            self.tx_bytes = total;
        }
    }

    /// Add to the received total. Skipped when the total would overflow.
    pub fn add_rx(&mut self, n: u64) {
        if let Some(total) = self.rx_bytes.checked_add(n) {
            self.rx_bytes = total;
        }
    }

    pub fn tx_bytes(&self) -> u64 {
        self.tx_bytes
    }

    pub fn rx_bytes(&self) -> u64 {
        self.rx_bytes
    }

    /// Fold one sample period into the smoothed statistics.
    ///
    /// `last` holds the `(tx, rx)` totals observed at the start of the
    /// period. Returns the totals at the end of it, to be passed back on the
    /// next call.
    pub fn fold(
        &mut self,
        last: (u64, u64),
        interval: Duration,
        weights: &DecayWeights,
    ) -> (u64, u64) {
        let tx_delta = self.tx_bytes.saturating_sub(last.0) as f64;
        let rx_delta = self.rx_bytes.saturating_sub(last.1) as f64;

        self.tx_avg.fold(tx_delta, weights);
        self.rx_avg.fold(rx_delta, weights);

        let secs = interval.as_secs_f64();
        if secs > 0.0 {
            self.tx_rate_smoothed = ewma(self.tx_rate_smoothed, tx_delta / secs, weights.one);
            self.rx_rate_smoothed = ewma(self.rx_rate_smoothed, rx_delta / secs, weights.one);
        }

        if self.period >= u32::MAX - 1 {
            self.period = 0;
        }
        self.period += 1;

        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            if self.tx_bytes != 0 {
                self.tx_rate = self.tx_bytes as f64 / elapsed;
            }
            if self.rx_bytes != 0 {
                self.rx_rate = self.rx_bytes as f64 / elapsed;
            }
        }

        (self.tx_bytes, self.rx_bytes)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            tx_bytes: self.tx_bytes,
            rx_bytes: self.rx_bytes,
            tx_rate: self.tx_rate,
            rx_rate: self.rx_rate,
            tx_rate_smoothed: self.tx_rate_smoothed,
            rx_rate_smoothed: self.rx_rate_smoothed,
            tx_avg: self.tx_avg,
            rx_avg: self.rx_avg,
            period: self.period,
        }
    }
}

/// Device-wide counters shared by every permit and the rate tracker.
#[derive(Debug, Default)]
pub struct DeviceCounters {
    inner: Mutex<Counters>,
}

impl DeviceCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the aggregate. A poisoned lock is recovered: the data are plain numbers.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Counters> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current telemetry values.
    pub fn snapshot(&self) -> CounterSnapshot {
        self.lock().snapshot()
    }
}
