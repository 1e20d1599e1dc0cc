//! Bounded sample storage
//!
//! A fixed-capacity ring of decoded samples. The session worker is the only
//! writer; readers take short locked copies and never block appends for long.

use super::protocol::Sample;
use parking_lot::RwLock;
use std::collections::VecDeque;

/// Default number of retained samples
pub const DEFAULT_CAPACITY: usize = 5_000_000;

#[derive(Debug)]
struct Ring {
    samples: VecDeque<Sample>,
    capacity: usize,
    total_written: u64,
    evicted: u64,
}

impl Ring {
    fn push(&mut self, sample: Sample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
            self.evicted += 1;
        }
        self.samples.push_back(sample);
        self.total_written += 1;
    }
}

/// Thread-safe ring buffer of samples
#[derive(Debug)]
pub struct SampleStore {
    ring: RwLock<Ring>,
}

impl SampleStore {
    /// Create a store holding at most `capacity` samples (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: RwLock::new(Ring {
                // Grows on demand up to `capacity`
                samples: VecDeque::with_capacity(capacity.min(65_536)),
                capacity,
                total_written: 0,
                evicted: 0,
            }),
        }
    }

    /// Append one sample, evicting the oldest when full
    pub fn append(&self, sample: Sample) {
        self.ring.write().push(sample);
    }

    /// Append a batch under a single lock
    pub fn extend(&self, samples: &[Sample]) {
        if samples.is_empty() {
            return;
        }
        let mut ring = self.ring.write();
        for sample in samples {
            ring.push(*sample);
        }
    }

    /// Most recent `min(n, len)` samples, oldest first
    pub fn window(&self, n: usize) -> Vec<Sample> {
        let ring = self.ring.read();
        let skip = ring.samples.len().saturating_sub(n);
        ring.samples.iter().skip(skip).copied().collect()
    }

    /// Every retained sample, oldest first
    pub fn export_all(&self) -> Vec<Sample> {
        self.ring.read().samples.iter().copied().collect()
    }

    /// Latest sample
    pub fn last(&self) -> Option<Sample> {
        self.ring.read().samples.back().copied()
    }

    /// Drop every sample and reset counters
    pub fn clear(&self) {
        let mut ring = self.ring.write();
        ring.samples.clear();
        ring.total_written = 0;
        ring.evicted = 0;
    }

    /// Retained sample count
    pub fn len(&self) -> usize {
        self.ring.read().samples.len()
    }

    /// Is empty
    pub fn is_empty(&self) -> bool {
        self.ring.read().samples.is_empty()
    }

    /// Maximum retained samples
    pub fn capacity(&self) -> usize {
        self.ring.read().capacity
    }

    /// Samples appended since the last clear
    pub fn total_written(&self) -> u64 {
        self.ring.read().total_written
    }

    /// Samples discarded because the ring was full
    pub fn evicted(&self) -> u64 {
        self.ring.read().evicted
    }
}

impl Default for SampleStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sample(index: u64) -> Sample {
        Sample { index, value: index as f64 * 1e-6 }
    }

    #[test]
    fn test_overflow_keeps_last_capacity() {
        let store = SampleStore::new(100);
        for i in 0..130 {
            store.append(sample(i));
        }

        assert_eq!(store.len(), 100);
        assert_eq!(store.evicted(), 30);
        assert_eq!(store.total_written(), 130);
        let all = store.export_all();
        let indices: Vec<u64> = all.iter().map(|s| s.index).collect();
        assert_eq!(indices, (30..130).collect::<Vec<_>>());
    }

    #[test]
    fn test_window_returns_recent_in_order() {
        let store = SampleStore::new(10);
        store.extend(&(0..4).map(sample).collect::<Vec<_>>());

        let window = store.window(2);
        assert_eq!(window.iter().map(|s| s.index).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(store.window(50).len(), 4);
        assert_eq!(store.len(), 4);
        assert_eq!(store.last().map(|s| s.index), Some(3));
    }

    #[test]
    fn test_clear_resets_counters() {
        let store = SampleStore::new(2);
        store.extend(&[sample(0), sample(1), sample(2)]);
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.evicted(), 0);
        assert_eq!(store.capacity(), 2);
    }

    #[test]
    fn test_window_concurrent_with_append() {
        let store = Arc::new(SampleStore::new(1000));
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..20_000 {
                    store.append(sample(i));
                }
            })
        };

        for _ in 0..200 {
            let window = store.window(64);
            assert!(window.windows(2).all(|w| w[1].index == w[0].index + 1));
        }
        writer.join().unwrap();
        assert_eq!(store.len(), 1000);
    }
}
