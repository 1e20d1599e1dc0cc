//! Streaming statistics
//!
//! Running min/max/mean over every sample of the current acquisition,
//! including samples the store has already evicted. The mean and variance
//! use Welford's update.

use super::protocol::{DeviceTimestamp, Sample};
use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Immutable statistics copy
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Samples observed
    pub count: u64,
    /// Smallest value, `None` before the first sample
    pub min: Option<f64>,
    /// Largest value
    pub max: Option<f64>,
    /// Running mean
    pub mean: Option<f64>,
    /// Population standard deviation
    pub std_dev: Option<f64>,
    /// Latest value
    pub last: Option<f64>,
    /// Wall time since the first sample
    pub elapsed: Duration,
    /// Latest device time from Timestamp metadata
    pub device_time_ms: Option<u64>,
    /// Latest device buffer load in percent
    pub buffer_load: Option<u8>,
}

#[derive(Debug, Default)]
struct Accumulator {
    count: u64,
    min: f64,
    max: f64,
    mean: f64,
    m2: f64,
    last: f64,
    first_at: Option<Instant>,
    finished_at: Option<Instant>,
    device: Option<DeviceTimestamp>,
}

impl Accumulator {
    fn observe(&mut self, value: f64, now: Instant) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
            self.first_at = Some(now);
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.last = value;
    }

    fn snapshot(&self) -> StatsSnapshot {
        let has = self.count > 0;
        let elapsed = match (self.first_at, self.finished_at) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        };
        StatsSnapshot {
            count: self.count,
            min: has.then_some(self.min),
            max: has.then_some(self.max),
            mean: has.then_some(self.mean),
            std_dev: has.then(|| (self.m2 / self.count as f64).sqrt()),
            last: has.then_some(self.last),
            elapsed,
            device_time_ms: self.device.map(|d| d.time_ms),
            buffer_load: self.device.map(|d| d.buffer_load),
        }
    }
}

/// Incremental statistics for one acquisition
#[derive(Debug, Default)]
pub struct StatsAggregator {
    inner: Mutex<Accumulator>,
}

impl StatsAggregator {
    /// Create an empty aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one sample
    pub fn observe(&self, sample: &Sample) {
        self.inner.lock().observe(sample.value, Instant::now());
    }

    /// Fold in a batch under a single lock
    pub fn observe_all(&self, samples: &[Sample]) {
        if samples.is_empty() {
            return;
        }
        let now = Instant::now();
        let mut acc = self.inner.lock();
        for sample in samples {
            acc.observe(sample.value, now);
        }
    }

    /// Remember the latest device timestamp
    pub fn record_timestamp(&self, timestamp: DeviceTimestamp) {
        self.inner.lock().device = Some(timestamp);
    }

    /// Freeze elapsed time at the end of an acquisition
    pub fn finish(&self) {
        let mut acc = self.inner.lock();
        if acc.first_at.is_some() && acc.finished_at.is_none() {
            acc.finished_at = Some(Instant::now());
        }
    }

    /// Start over
    pub fn reset(&self) {
        *self.inner.lock() = Accumulator::default();
    }

    /// Consistent copy of the current values
    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.lock().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::SampleStore;
    use rand::{Rng, SeedableRng};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn test_empty_snapshot() {
        let stats = StatsAggregator::new();
        let snap = stats.snapshot();
        assert_eq!(snap.count, 0);
        assert!(snap.mean.is_none());
        assert_eq!(snap.elapsed, Duration::ZERO);
    }

    #[test]
    fn test_matches_direct_recomputation_after_eviction() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let values: Vec<f64> = (0..5000).map(|_| rng.gen_range(1e-7..2e-2)).collect();
        let samples: Vec<Sample> = values
            .iter()
            .enumerate()
            .map(|(i, &value)| Sample { index: i as u64, value })
            .collect();

        let store = SampleStore::new(100);
        let stats = StatsAggregator::new();
        for chunk in samples.chunks(333) {
            store.extend(chunk);
            stats.observe_all(chunk);
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let snap = stats.snapshot();
        assert_eq!(store.len(), 100);
        assert_eq!(snap.count, 5000);
        assert_eq!(snap.min, Some(min));
        assert_eq!(snap.max, Some(max));
        assert!(close(snap.mean.unwrap(), mean));
        assert!(close(snap.std_dev.unwrap(), var.sqrt()));
        assert_eq!(snap.last, values.last().copied());
    }

    #[test]
    fn test_finish_freezes_elapsed_and_reset_clears() {
        let stats = StatsAggregator::new();
        stats.observe(&Sample { index: 0, value: 1.0 });
        stats.record_timestamp(DeviceTimestamp { time_ms: 500, overflowed: false, buffer_load: 3 });
        stats.finish();
        let a = stats.snapshot();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(stats.snapshot().elapsed, a.elapsed);
        assert_eq!(a.device_time_ms, Some(500));
        assert_eq!(a.buffer_load, Some(3));

        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }
}
