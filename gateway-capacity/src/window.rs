//! Fixed-size ring buffer sliding window (C4, §4.4: "60-second sliding
//! window with 1-second buckets").
//!
//! A background ticker rotates the head bucket once per second; all other
//! operations are lock-free, constant-time accumulation into the current
//! bucket, matching the scheduler crate's ticker-driven background task
//! pattern.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

pub struct RingWindow {
    buckets: Vec<AtomicI64>,
    head: AtomicUsize,
}

impl RingWindow {
    pub fn new(bucket_count: usize) -> Self {
        let bucket_count = bucket_count.max(1);
        let mut buckets = Vec::with_capacity(bucket_count);
        for _ in 0..bucket_count {
            buckets.push(AtomicI64::new(0));
        }
        Self {
            buckets,
            head: AtomicUsize::new(0),
        }
    }

    /// Add (or subtract, for reconciliation) `delta` tokens in the current
    /// bucket.
    pub fn record(&self, delta: i64) {
        let head = self.head.load(Ordering::Relaxed);
        self.buckets[head].fetch_add(delta, Ordering::Relaxed);
    }

    /// Sum across all buckets — an approximation of tokens over the last
    /// `bucket_count` seconds, accurate to within one in-flight bucket.
    pub fn sum(&self) -> i64 {
        self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).sum()
    }

    /// Per-second average over the window, used for tokens/sec figures.
    pub fn tokens_per_second(&self) -> f64 {
        self.sum() as f64 / self.buckets.len() as f64
    }

    /// Advance the head and clear what is now the oldest bucket, called
    /// once per second by the rotation ticker.
    pub fn rotate(&self) {
        let len = self.buckets.len();
        let next = (self.head.load(Ordering::Relaxed) + 1) % len;
        self.buckets[next].store(0, Ordering::Relaxed);
        self.head.store(next, Ordering::Relaxed);
    }
}
