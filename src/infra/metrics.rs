//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
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

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
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

/// Lock-free metrics collector for engine operations
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps the periodic counters to get
/// a consistent snapshot.
pub struct Metrics {
    /// Total operations ever processed (monotonic)
    ops_total: AtomicU64,
    /// Operations since last report (reset on report)
    ops_since_report: AtomicU64,
    /// Sum of operation latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max operation latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Operation latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Primary-market share purchases settled (monotonic)
    purchases_total: AtomicU64,
    /// Share transfers settled, ROFR and public combined (monotonic)
    transfers_total: AtomicU64,
    /// Listings published into their ROFR window (monotonic)
    listings_published_total: AtomicU64,
    /// Rights of first refusal exercised (monotonic)
    rofr_exercised_total: AtomicU64,
    /// ROFR windows expired to the public market (monotonic)
    rofr_expired_total: AtomicU64,
    /// Public-market listing sales settled (monotonic)
    public_sales_total: AtomicU64,
    /// Listings cancelled (monotonic)
    listings_cancelled_total: AtomicU64,
    /// Operations lost to an expected concurrent conflict (monotonic)
    conflicts_total: AtomicU64,
    /// Operations rejected by a business rule (monotonic)
    rejections_total: AtomicU64,
    /// Usage days consumed (monotonic)
    usage_days_total: AtomicU64,
    /// Engine hours consumed, in tenths of an hour (monotonic)
    engine_hours_tenths_total: AtomicU64,
    /// Waitlist joins (monotonic)
    waitlist_joins_total: AtomicU64,
    /// Waitlist offers extended (monotonic)
    waitlist_offers_total: AtomicU64,
    /// Waitlist entries removed by the TTL sweep (monotonic)
    waitlist_expired_total: AtomicU64,
    /// Fuel wallet top-ups, manual and automatic (monotonic)
    fuel_topups_total: AtomicU64,
    /// Low-fuel-balance observations (monotonic)
    fuel_low_balance_total: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            ops_total: AtomicU64::new(0),
            ops_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            purchases_total: AtomicU64::new(0),
            transfers_total: AtomicU64::new(0),
            listings_published_total: AtomicU64::new(0),
            rofr_exercised_total: AtomicU64::new(0),
            rofr_expired_total: AtomicU64::new(0),
            public_sales_total: AtomicU64::new(0),
            listings_cancelled_total: AtomicU64::new(0),
            conflicts_total: AtomicU64::new(0),
            rejections_total: AtomicU64::new(0),
            usage_days_total: AtomicU64::new(0),
            engine_hours_tenths_total: AtomicU64::new(0),
            waitlist_joins_total: AtomicU64::new(0),
            waitlist_offers_total: AtomicU64::new(0),
            waitlist_expired_total: AtomicU64::new(0),
            fuel_topups_total: AtomicU64::new(0),
            fuel_low_balance_total: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record an operation completed with the given latency (lock-free)
    #[inline]
    pub fn record_operation(&self, latency_us: u64) {
        self.ops_total.fetch_add(1, Ordering::Relaxed);
        self.ops_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_purchase(&self) {
        self.purchases_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_transfer(&self) {
        self.transfers_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_listing_published(&self) {
        self.listings_published_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_rofr_exercised(&self) {
        self.rofr_exercised_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_rofr_expired(&self) {
        self.rofr_expired_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_public_sale(&self) {
        self.public_sales_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_listing_cancelled(&self) {
        self.listings_cancelled_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_conflict(&self) {
        self.conflicts_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_rejection(&self) {
        self.rejections_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_usage(&self, days: u32, engine_hours: f64) {
        self.usage_days_total.fetch_add(days as u64, Ordering::Relaxed);
        self.engine_hours_tenths_total
            .fetch_add((engine_hours * 10.0).round() as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_waitlist_join(&self) {
        self.waitlist_joins_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_waitlist_offer(&self) {
        self.waitlist_offers_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_waitlist_expired(&self, count: u64) {
        self.waitlist_expired_total.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fuel_topup(&self) {
        self.fuel_topups_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fuel_low_balance(&self) {
        self.fuel_low_balance_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total operations processed
    #[inline]
    pub fn ops_total(&self) -> u64 {
        self.ops_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn conflicts_total(&self) -> u64 {
        self.conflicts_total.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self, active_yachts: usize, open_listings: usize) -> MetricsSummary {
        let ops_count = self.ops_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);

        let mut lat_buckets = [0u64; NUM_BUCKETS];
        for (i, bucket) in self.latency_buckets.iter().enumerate() {
            lat_buckets[i] = bucket.swap(0, Ordering::Relaxed);
        }

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let ops_per_sec = if elapsed.as_secs_f64() > 0.0 {
            ops_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let avg_latency = if ops_count > 0 { latency_sum / ops_count } else { 0 };

        MetricsSummary {
            ops_total: self.ops_total.load(Ordering::Relaxed),
            ops_per_sec,
            avg_latency_us: avg_latency,
            max_latency_us: max_latency,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            active_yachts,
            open_listings,
            purchases_total: self.purchases_total.load(Ordering::Relaxed),
            transfers_total: self.transfers_total.load(Ordering::Relaxed),
            listings_published_total: self.listings_published_total.load(Ordering::Relaxed),
            rofr_exercised_total: self.rofr_exercised_total.load(Ordering::Relaxed),
            rofr_expired_total: self.rofr_expired_total.load(Ordering::Relaxed),
            public_sales_total: self.public_sales_total.load(Ordering::Relaxed),
            listings_cancelled_total: self.listings_cancelled_total.load(Ordering::Relaxed),
            conflicts_total: self.conflicts_total.load(Ordering::Relaxed),
            rejections_total: self.rejections_total.load(Ordering::Relaxed),
            usage_days_total: self.usage_days_total.load(Ordering::Relaxed),
            engine_hours_tenths_total: self.engine_hours_tenths_total.load(Ordering::Relaxed),
            waitlist_joins_total: self.waitlist_joins_total.load(Ordering::Relaxed),
            waitlist_offers_total: self.waitlist_offers_total.load(Ordering::Relaxed),
            waitlist_expired_total: self.waitlist_expired_total.load(Ordering::Relaxed),
            fuel_topups_total: self.fuel_topups_total.load(Ordering::Relaxed),
            fuel_low_balance_total: self.fuel_low_balance_total.load(Ordering::Relaxed),
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
    pub ops_total: u64,
    pub ops_per_sec: f64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
    /// 50th percentile operation latency (µs)
    pub lat_p50_us: u64,
    /// 95th percentile operation latency (µs)
    pub lat_p95_us: u64,
    /// 99th percentile operation latency (µs)
    pub lat_p99_us: u64,
    pub active_yachts: usize,
    pub open_listings: usize,
    pub purchases_total: u64,
    pub transfers_total: u64,
    pub listings_published_total: u64,
    pub rofr_exercised_total: u64,
    pub rofr_expired_total: u64,
    pub public_sales_total: u64,
    pub listings_cancelled_total: u64,
    pub conflicts_total: u64,
    pub rejections_total: u64,
    pub usage_days_total: u64,
    pub engine_hours_tenths_total: u64,
    pub waitlist_joins_total: u64,
    pub waitlist_offers_total: u64,
    pub waitlist_expired_total: u64,
    pub fuel_topups_total: u64,
    pub fuel_low_balance_total: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            ops_total = %self.ops_total,
            ops_per_sec = format!("{:.1}", self.ops_per_sec),
            avg_latency_us = %self.avg_latency_us,
            max_latency_us = %self.max_latency_us,
            p50_us = %self.lat_p50_us,
            p95_us = %self.lat_p95_us,
            p99_us = %self.lat_p99_us,
            active_yachts = %self.active_yachts,
            open_listings = %self.open_listings,
            purchases = %self.purchases_total,
            transfers = %self.transfers_total,
            rofr_exercised = %self.rofr_exercised_total,
            rofr_expired = %self.rofr_expired_total,
            public_sales = %self.public_sales_total,
            conflicts = %self.conflicts_total,
            rejections = %self.rejections_total,
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
        assert_eq!(metrics.ops_total(), 0);
        assert_eq!(metrics.conflicts_total(), 0);
    }

    #[test]
    fn test_record_operation() {
        let metrics = Metrics::new();

        metrics.record_operation(100);
        assert_eq!(metrics.ops_total(), 1);

        metrics.record_operation(200);
        assert_eq!(metrics.ops_total(), 2);
    }

    #[test]
    fn test_report_resets_periodic_counters() {
        let metrics = Metrics::new();

        metrics.record_operation(100);
        metrics.record_operation(200);
        metrics.record_operation(300);
        metrics.record_purchase();

        let summary = metrics.report(2, 1);
        assert_eq!(summary.ops_total, 3);
        assert_eq!(summary.avg_latency_us, 200); // (100+200+300)/3
        assert_eq!(summary.max_latency_us, 300);
        assert_eq!(summary.active_yachts, 2);
        assert_eq!(summary.open_listings, 1);
        assert_eq!(summary.purchases_total, 1);

        // Second report sees no new periodic data but keeps monotonic totals
        let summary = metrics.report(2, 1);
        assert_eq!(summary.ops_total, 3);
        assert_eq!(summary.avg_latency_us, 0);
        assert_eq!(summary.max_latency_us, 0);
        assert_eq!(summary.purchases_total, 1);
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();

        // 100 operations, all at 150µs (bucket 1, ≤200)
        for _ in 0..100 {
            metrics.record_operation(150);
        }

        let summary = metrics.report(0, 0);
        assert_eq!(summary.lat_p50_us, 200);
        assert_eq!(summary.lat_p95_us, 200);
        assert_eq!(summary.lat_p99_us, 200);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10); // overflow
    }

    #[test]
    fn test_usage_recording_scales_hours() {
        let metrics = Metrics::new();
        metrics.record_usage(3, 4.5);
        let summary = metrics.report(0, 0);
        assert_eq!(summary.usage_days_total, 3);
        assert_eq!(summary.engine_hours_tenths_total, 45);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        // Spawn 10 threads, each recording 1000 operations
        for _ in 0..10 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for i in 0..1000 {
                    m.record_operation(i as u64);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.ops_total(), 10_000);
    }
}
