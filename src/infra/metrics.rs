//! Lock-free metrics collection and reporting
//!
//! Workers record into atomics while cards are processed in parallel.
//! Reporting is the only operation that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

macro_rules! counters {
    ($($(#[$meta:meta])* $name:ident => $record:ident;)*) => {
        /// Monotonic inference counters
        #[derive(Default)]
        struct Counters {
            $($(#[$meta])* $name: AtomicU64,)*
        }

        /// Point-in-time copy of the monotonic counters
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct CounterSnapshot {
            $($(#[$meta])* pub $name: u64,)*
        }

        impl Counters {
            fn snapshot(&self) -> CounterSnapshot {
                CounterSnapshot {
                    $($name: self.$name.load(Ordering::Relaxed),)*
                }
            }
        }

        impl Metrics {
            $(
                #[inline]
                pub fn $record(&self) {
                    self.counters.$name.fetch_add(1, Ordering::Relaxed);
                }
            )*
        }
    };
}

counters! {
    /// Input taps seen, duplicates included
    taps_total => record_tap;
    duplicate_taps => record_duplicate_tap;
    legs_matched => record_leg_matched;
    legs_unmatched => record_leg_unmatched;
    /// Taps on a service date without running trips
    no_service_taps => record_no_service_tap;
    alightings_chained => record_alighting_chained;
    alightings_fallback => record_alighting_fallback;
    /// Matched legs left without any alighting
    alightings_unresolved => record_alighting_unresolved;
    destinations_inferred => record_destination_inferred;
    destinations_unknown => record_destination_unknown;
    journeys_total => record_journey;
    interchanges_total => record_interchange;
    cards_failed => record_card_failed;
    cards_cancelled => record_card_cancelled;
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps the latency histogram to get a
/// consistent snapshot.
pub struct Metrics {
    counters: Counters,
    /// Cards fully processed (monotonic)
    cards_total: AtomicU64,
    /// Cards since last report (reset on report)
    cards_since_report: AtomicU64,
    /// Sum of per-card latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max per-card latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Per-card latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            counters: Counters::default(),
            cards_total: AtomicU64::new(0),
            cards_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a card was processed with given latency (lock-free)
    #[inline]
    pub fn record_card_processed(&self, latency_us: u64) {
        self.cards_total.fetch_add(1, Ordering::Relaxed);
        self.cards_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn cards_total(&self) -> u64 {
        self.cards_total.load(Ordering::Relaxed)
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// Calculate and return metrics summary, then reset periodic counters
    pub fn report(&self) -> MetricsSummary {
        let cards_count = self.cards_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let cards_per_sec = if elapsed.as_secs_f64() > 0.0 {
            cards_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if cards_count > 0 { latency_sum / cards_count } else { 0 };

        MetricsSummary {
            cards_total: self.cards_total.load(Ordering::Relaxed),
            cards_per_sec,
            avg_card_latency_us: avg_latency,
            max_card_latency_us: max_latency,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            lat_buckets,
            counters: self.counters.snapshot(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub cards_total: u64,
    pub cards_per_sec: f64,
    pub avg_card_latency_us: u64,
    pub max_card_latency_us: u64,
    /// Per-card latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub counters: CounterSnapshot,
}

impl MetricsSummary {
    pub fn log(&self) {
        let c = &self.counters;
        info!(
            cards_total = %self.cards_total,
            cards_per_sec = format!("{:.1}", self.cards_per_sec),
            avg_latency_us = %self.avg_card_latency_us,
            max_latency_us = %self.max_card_latency_us,
            p50_us = %self.lat_p50_us,
            p95_us = %self.lat_p95_us,
            p99_us = %self.lat_p99_us,
            taps = %c.taps_total,
            duplicates = %c.duplicate_taps,
            legs_matched = %c.legs_matched,
            legs_unmatched = %c.legs_unmatched,
            no_service = %c.no_service_taps,
            chained = %c.alightings_chained,
            fallback = %c.alightings_fallback,
            unresolved = %c.alightings_unresolved,
            dest_inferred = %c.destinations_inferred,
            dest_unknown = %c.destinations_unknown,
            journeys = %c.journeys_total,
            interchanges = %c.interchanges_total,
            cards_failed = %c.cards_failed,
            cards_cancelled = %c.cards_cancelled,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.cards_total(), 0);
        assert_eq!(metrics.counters(), CounterSnapshot::default());
    }

    #[test]
    fn test_record_counters() {
        let metrics = Metrics::new();

        metrics.record_tap();
        metrics.record_tap();
        metrics.record_duplicate_tap();
        metrics.record_leg_matched();
        metrics.record_journey();

        let c = metrics.counters();
        assert_eq!(c.taps_total, 2);
        assert_eq!(c.duplicate_taps, 1);
        assert_eq!(c.legs_matched, 1);
        assert_eq!(c.journeys_total, 1);
        assert_eq!(c.legs_unmatched, 0);
    }

    #[test]
    fn test_report() {
        let metrics = Metrics::new();

        metrics.record_card_processed(100);
        metrics.record_card_processed(200);
        metrics.record_card_processed(300);
        metrics.record_card_failed();

        let summary = metrics.report();

        assert_eq!(summary.cards_total, 3);
        assert_eq!(summary.avg_card_latency_us, 200);
        assert_eq!(summary.max_card_latency_us, 300);
        assert_eq!(summary.counters.cards_failed, 1);

        // Periodic counters should be reset, monotonic ones kept
        assert_eq!(metrics.cards_since_report.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.report().cards_total, 3);
    }

    #[test]
    fn test_report_empty() {
        let metrics = Metrics::new();
        let summary = metrics.report();

        assert_eq!(summary.cards_total, 0);
        assert_eq!(summary.avg_card_latency_us, 0);
        assert_eq!(summary.lat_p99_us, 0);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(50), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(60000), 10);
    }

    #[test]
    fn test_percentiles() {
        let metrics = Metrics::new();
        for _ in 0..98 {
            metrics.record_card_processed(150);
        }
        metrics.record_card_processed(5000);
        metrics.record_card_processed(90000);

        let summary = metrics.report();
        assert_eq!(summary.lat_p50_us, 200);
        assert_eq!(summary.lat_p95_us, 200);
        assert_eq!(summary.lat_p99_us, 6400);
    }
}
