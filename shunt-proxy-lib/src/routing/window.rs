//! Trailing-window event counter.
//!
//! The window is split into a ring of equally sized buckets. Every
//! observation lands in the bucket covering its instant; buckets that fall
//! out of the window are zeroed lazily when time moves past them. The count
//! therefore covers the most recent `window` (to bucket precision) rather
//! than a fixed calendar bucket, so a burst straddling a boundary is still
//! seen as one burst.

use std::time::{Duration, Instant};

/// Counts events for one key within the trailing `window`.
///
/// Not synchronized: a window is owned by the single task that decides on
/// reroutes, and all observations for an identity are serialized there.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    buckets: Box<[u64]>,
    bucket_len: Duration,
    origin: Instant,
    // absolute index (since `origin`) of the newest bucket written
    head: u64,
}

impl SlidingWindow {
    /// Create an empty window of length `window`, divided into `buckets` slots.
    pub fn new(window: Duration, buckets: usize, now: Instant) -> Self {
        let buckets = buckets.clamp(1, u32::MAX as usize);
        let bucket_len = (window / buckets as u32).max(Duration::from_nanos(1));
        Self { buckets: vec![0; buckets].into_boxed_slice(), bucket_len, origin: now, head: 0 }
    }

    /// Record one event at `now` and return the count inside the window, this event included.
    pub fn observe(&mut self, now: Instant) -> u64 {
        let idx = self.advance(now);
        let slot = self.slot(idx);
        self.buckets[slot] = self.buckets[slot].saturating_add(1);
        self.sum()
    }

    /// Number of events inside the window ending at `now`.
    pub fn count(&mut self, now: Instant) -> u64 {
        self.advance(now);
        self.sum()
    }

    pub fn window(&self) -> Duration {
        self.bucket_len.saturating_mul(self.buckets.len() as u32)
    }

    fn sum(&self) -> u64 {
        self.buckets.iter().fold(0u64, |acc, b| acc.saturating_add(*b))
    }

    fn slot(&self, idx: u64) -> usize {
        (idx % self.buckets.len() as u64) as usize
    }

    // Move the head to the bucket covering `now`, zeroing every bucket that
    // expired on the way. Instants before the head are counted in the head.
    fn advance(&mut self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.origin);
        let idx = (elapsed.as_nanos() / self.bucket_len.as_nanos()) as u64;
        if idx <= self.head {
            return self.head;
        }
        let len = self.buckets.len() as u64;
        if idx - self.head >= len {
            self.buckets.iter_mut().for_each(|b| *b = 0);
        } else {
            for i in (self.head + 1)..=idx {
                let slot = self.slot(i);
                self.buckets[slot] = 0;
            }
        }
        self.head = idx;
        idx
    }
}
