pub mod registry;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

pub use registry::{CoreMetrics, MetricKey, Registry};

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicI64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Float gauge stored as bits in an atomic word.
#[derive(Debug, Default)]
pub struct Gauge {
    bits: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn value(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn add(&self, delta: f64) {
        // CAS loop: set() racing with add() must not lose updates.
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self.bits.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn inc(&self) {
        self.add(1.0);
    }

    pub fn dec(&self) {
        self.add(-1.0);
    }
}

#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    pub buckets: Vec<f64>,
    /// One count per bucket plus the trailing overflow slot.
    pub counts: Vec<u64>,
    pub sum: f64,
    pub count: u64,
}

#[derive(Debug)]
struct HistogramState {
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

/// Fixed-bucket histogram. `observe` lands in the first bucket whose upper
/// bound is >= the value, else in the overflow slot.
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<f64>,
    state: Mutex<HistogramState>,
}

impl Histogram {
    pub fn new(buckets: Vec<f64>) -> Self {
        let slots = buckets.len() + 1;
        Self {
            buckets,
            state: Mutex::new(HistogramState {
                counts: vec![0; slots],
                sum: 0.0,
                count: 0,
            }),
        }
    }

    /// Default duration buckets in seconds.
    pub fn with_duration_buckets() -> Self {
        Self::new(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0])
    }

    pub fn observe(&self, value: f64) {
        let slot = self
            .buckets
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(self.buckets.len());
        let mut state = self.state.lock();
        state.counts[slot] += 1;
        state.sum += value;
        state.count += 1;
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let state = self.state.lock();
        HistogramSnapshot {
            buckets: self.buckets.clone(),
            counts: state.counts.clone(),
            sum: state.sum,
            count: state.count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counter_concurrent_adds() {
        let counter = Arc::new(Counter::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    counter.inc();
                }
            }));
        }
        for handle in handles {
            handle.join().expect("worker");
        }
        assert_eq!(counter.value(), 8000);
    }

    #[test]
    fn test_gauge_set_and_delta() {
        let gauge = Gauge::new();
        gauge.set(5.0);
        gauge.inc();
        gauge.add(2.5);
        gauge.dec();
        assert!((gauge.value() - 7.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_histogram_bucket_placement() {
        let histogram = Histogram::new(vec![1.0, 5.0, 10.0]);
        histogram.observe(0.5); // bucket 0
        histogram.observe(1.0); // bucket 0 (upper bound inclusive)
        histogram.observe(3.0); // bucket 1
        histogram.observe(10.0); // bucket 2
        histogram.observe(99.0); // overflow
        let snap = histogram.snapshot();
        assert_eq!(snap.counts, vec![2, 1, 1, 1]);
        assert_eq!(snap.count, 5);
        assert!((snap.sum - 113.5).abs() < 1e-9);
    }
}
