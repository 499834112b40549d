//! Rolling statistics window.
//!
//! A fixed ring of `num_buckets` time buckets spanning `rolling_duration`.
//! Each bucket owns an aligned time slot; a bucket whose slot has left the
//! window is zeroed and reused before any read or write, so buckets inside
//! the window are never lost.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    requests: u64,
    errors: u64,
    /// Index of the time slot this bucket currently holds.
    slot: u64,
}

/// Aggregate counts over every live bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowTotals {
    pub requests: u64,
    pub errors: u64,
}

impl WindowTotals {
    /// Error rate in percent (0-100), 0 when there are no requests.
    pub fn error_percentage(&self) -> u64 {
        if self.requests == 0 {
            0
        } else {
            self.errors * 100 / self.requests
        }
    }
}

#[derive(Debug)]
pub struct RollingWindow {
    buckets: Vec<Bucket>,
    bucket_width: Duration,
    origin: Instant,
}

impl RollingWindow {
    pub fn new(rolling_duration: Duration, num_buckets: usize, now: Instant) -> Self {
        let num_buckets = num_buckets.max(1);
        let bucket_width = (rolling_duration / num_buckets as u32).max(Duration::from_millis(1));
        let empty = Bucket {
            requests: 0,
            errors: 0,
            slot: 0,
        };
        Self {
            buckets: vec![empty; num_buckets],
            bucket_width,
            origin: now,
        }
    }

    fn slot_at(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.origin);
        (elapsed.as_nanos() / self.bucket_width.as_nanos()) as u64
    }

    fn is_live(&self, bucket: &Bucket, current: u64) -> bool {
        current.saturating_sub(bucket.slot) < self.buckets.len() as u64
    }

    /// Zero every bucket whose slot left the window.
    fn evict(&mut self, now: Instant) -> u64 {
        let current = self.slot_at(now);
        let len = self.buckets.len() as u64;
        for bucket in &mut self.buckets {
            if current.saturating_sub(bucket.slot) >= len {
                bucket.requests = 0;
                bucket.errors = 0;
            }
        }
        current
    }

    fn current_bucket(&mut self, now: Instant) -> &mut Bucket {
        let current = self.evict(now);
        let len = self.buckets.len() as u64;
        let bucket = &mut self.buckets[(current % len) as usize];
        if bucket.slot < current {
            *bucket = Bucket {
                requests: 0,
                errors: 0,
                slot: current,
            };
        }
        bucket
    }

    pub fn record_request(&mut self, now: Instant) {
        self.current_bucket(now).requests += 1;
    }

    pub fn record_error(&mut self, now: Instant) {
        self.current_bucket(now).errors += 1;
    }

    pub fn totals(&mut self, now: Instant) -> WindowTotals {
        let current = self.evict(now);
        self.buckets
            .iter()
            .filter(|b| self.is_live(b, current))
            .fold(WindowTotals::default(), |acc, b| WindowTotals {
                requests: acc.requests + b.requests,
                errors: acc.errors + b.errors,
            })
    }

    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.requests = 0;
            bucket.errors = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_within_window() {
        let start = Instant::now();
        let mut window = RollingWindow::new(Duration::from_secs(10), 10, start);

        window.record_request(start);
        window.record_request(start + Duration::from_secs(3));
        window.record_error(start + Duration::from_secs(3));

        let totals = window.totals(start + Duration::from_secs(5));
        assert_eq!(totals, WindowTotals { requests: 2, errors: 1 });
        assert_eq!(totals.error_percentage(), 50);
    }

    #[test]
    fn test_stale_buckets_are_evicted() {
        let start = Instant::now();
        let mut window = RollingWindow::new(Duration::from_secs(10), 10, start);

        window.record_request(start);
        window.record_error(start);
        window.record_request(start + Duration::from_secs(4));

        // First bucket leaves the window at 10s, the second one at 14s.
        let totals = window.totals(start + Duration::from_millis(10_500));
        assert_eq!(totals, WindowTotals { requests: 1, errors: 0 });

        let totals = window.totals(start + Duration::from_secs(15));
        assert_eq!(totals, WindowTotals::default());
    }

    #[test]
    fn test_slot_reuse_resets_counts() {
        let start = Instant::now();
        let mut window = RollingWindow::new(Duration::from_secs(2), 2, start);

        window.record_request(start);
        window.record_error(start);
        // Same ring index, two slots later.
        window.record_request(start + Duration::from_secs(2));

        let totals = window.totals(start + Duration::from_secs(2));
        assert_eq!(totals, WindowTotals { requests: 1, errors: 0 });
    }
}
