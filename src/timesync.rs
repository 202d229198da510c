//! Clock synchronization estimator.
//!
//! One exchange gives four stamps: the sink sends at `t1`, the source
//! receives at `t2` and replies at `t3`, the sink receives at `t4`. From
//! those the standard NTP formulas yield:
//!
//! - `rtt = (t4 - t1) - (t3 - t2)` — wire time with source processing removed
//! - `offset = ((t2 - t1) + (t3 - t4)) / 2` — `source_time = local_time + offset`
//!
//! The estimator keeps the most recent [`config::SYNC_SAMPLES`] samples.
//! The effective offset is an RTT-weighted mean so low-RTT samples dominate
//! without discarding jitter outliers. Drift (ms/s) is the least-squares
//! slope of offset over sample time; it is diagnostic only and is not used
//! to pre-correct playout.

use crate::config;
use log::warn;
use std::collections::VecDeque;

/// Smallest RTT considered for weighting, so a zero-RTT loopback sample does
/// not swallow the whole window.
const MIN_WEIGHT_RTT_MS: f64 = 0.1;

/// One accepted sync exchange.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSample {
    pub offset: f64,
    pub rtt: f64,
    pub at_local: f64,
}

#[derive(Debug)]
pub struct SyncEstimator {
    samples: VecDeque<TimeSample>,
    window: usize,
    offset: f64,
    rtt: f64,
    drift: f64,
    last_sync_at: f64,
    converged: bool,
}

impl SyncEstimator {
    pub fn new() -> Self {
        Self::with_window(config::SYNC_SAMPLES)
    }

    pub fn with_window(window: usize) -> Self {
        assert!(window > 0);
        Self {
            samples: VecDeque::with_capacity(window),
            window,
            offset: 0.0,
            rtt: 0.0,
            drift: 0.0,
            last_sync_at: 0.0,
            converged: false,
        }
    }

    /// Fold one completed exchange into the window. `t4` is the local stamp
    /// taken when the response arrived.
    pub fn add_exchange(&mut self, t1: f64, t2: f64, t3: f64, t4: f64) -> TimeSample {
        let rtt = (t4 - t1) - (t3 - t2);
        let offset = ((t2 - t1) + (t3 - t4)) / 2.0;
        let sample = TimeSample {
            offset,
            rtt,
            at_local: t4,
        };

        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.last_sync_at = t4;
        // First accepted sample converges the estimator; it never regresses
        // within a session.
        self.converged = true;
        self.recompute();

        if self.drift.abs() > config::MAX_DRIFT_MS as f64 {
            warn!(
                "clock drift {:.2} ms/s exceeds {} ms/s",
                self.drift,
                config::MAX_DRIFT_MS
            );
        }

        sample
    }

    fn recompute(&mut self) {
        let mut weight_sum = 0.0;
        let mut offset_sum = 0.0;
        let mut rtt_sum = 0.0;
        for sample in &self.samples {
            let weight = 1.0 / sample.rtt.max(MIN_WEIGHT_RTT_MS);
            weight_sum += weight;
            offset_sum += weight * sample.offset;
            rtt_sum += sample.rtt;
        }
        self.offset = offset_sum / weight_sum;
        self.rtt = rtt_sum / self.samples.len() as f64;
        self.drift = self.regress_drift();
    }

    /// Ordinary least-squares slope of offset on sample time, scaled from
    /// ms/ms to ms/s. Zero until two distinct sample times exist.
    fn regress_drift(&self) -> f64 {
        let n = self.samples.len() as f64;
        if self.samples.len() < 2 {
            return 0.0;
        }

        let mean_t = self.samples.iter().map(|s| s.at_local).sum::<f64>() / n;
        let mean_offset = self.samples.iter().map(|s| s.offset).sum::<f64>() / n;
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for sample in &self.samples {
            let dt = sample.at_local - mean_t;
            numerator += dt * (sample.offset - mean_offset);
            denominator += dt * dt;
        }
        if denominator == 0.0 {
            return 0.0;
        }
        numerator / denominator * 1000.0
    }

    /// Effective offset: `source_time = local_time + offset`.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn rtt(&self) -> f64 {
        self.rtt
    }

    /// Estimated drift in ms/s. Diagnostic only.
    pub fn drift(&self) -> f64 {
        self.drift
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn last_sync_at(&self) -> f64 {
        self.last_sync_at
    }

    /// True when a new exchange should be scheduled.
    pub fn needs_resync(&self, local_now: f64) -> bool {
        !self.converged || local_now - self.last_sync_at > config::SYNC_INTERVAL_MS as f64
    }

    /// Translate a source timestamp into the local clock domain.
    pub fn source_to_local(&self, source_ms: f64) -> f64 {
        source_ms - self.offset
    }
}

impl Default for SyncEstimator {
    fn default() -> Self {
        Self::new()
    }
}
