//! Scrape endpoint self-metrics
//!
//! Internal counters/gauges/histogram covering the scrape handler's own
//! health: in-flight requests, render duration, rate-limit rejections,
//! error reasons and the last payload size. Rendered alongside whatever
//! the `ScrapeSource` returns so `/metrics` is self-describing, following
//! `crates/telemetry/src/storage.rs`'s stance that the pipeline's own
//! health is just another set of instruments.

use dashmap::DashMap;
use metrics_core::{BucketHistogram, MetricSnapshot, MetricValue, MultiSampleItem, SimpleValue, Tags};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Scrape-duration histogram bucket bounds, exact per the configured
/// bound list.
pub const SCRAPE_DURATION_BOUNDS_SECONDS: &[f64] =
    &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

fn cas_add_f64(bits: &AtomicU64, delta: f64) {
    let mut current = bits.load(Ordering::Relaxed);
    loop {
        let new = (f64::from_bits(current) + delta).to_bits();
        match bits.compare_exchange_weak(current, new, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => current = actual,
        }
    }
}

/// Cumulative bucket histogram with fixed bounds, built the same way as
/// the instrument factory's histogram handle: non-cumulative per-bucket
/// atomics, summed into a cumulative view on render.
struct DurationHistogram {
    bucket_counts: Vec<AtomicU64>,
    count: AtomicU64,
    sum_bits: AtomicU64,
}

impl DurationHistogram {
    fn new() -> Self {
        Self {
            bucket_counts: (0..=SCRAPE_DURATION_BOUNDS_SECONDS.len())
                .map(|_| AtomicU64::new(0))
                .collect(),
            count: AtomicU64::new(0),
            sum_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    fn observe(&self, seconds: f64) {
        let bucket = SCRAPE_DURATION_BOUNDS_SECONDS
            .iter()
            .position(|&b| seconds <= b)
            .unwrap_or(SCRAPE_DURATION_BOUNDS_SECONDS.len());
        self.bucket_counts[bucket].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        cas_add_f64(&self.sum_bits, seconds);
    }

    fn to_value(&self) -> MetricValue {
        let mut counts = Vec::with_capacity(self.bucket_counts.len());
        let mut running = 0u64;
        for c in &self.bucket_counts {
            running += c.load(Ordering::Relaxed);
            counts.push(running);
        }
        MetricValue::BucketHistogram(BucketHistogram {
            count: self.count.load(Ordering::Relaxed),
            min: 0.0,
            max: 0.0,
            sum: f64::from_bits(self.sum_bits.load(Ordering::Relaxed)),
            bounds: SCRAPE_DURATION_BOUNDS_SECONDS.to_vec(),
            counts,
        })
    }
}

/// Guard returned by [`SelfMetrics::begin_request`]; decrements the
/// in-flight gauge on drop so every exit path — success, denial, error,
/// or an early `?` — always decrements, per the handler's "always
/// decrement in-flight" requirement.
pub(crate) struct InFlightGuard<'a> {
    counter: &'a AtomicI64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

pub(crate) struct SelfMetrics {
    requests_served: AtomicU64,
    requests_rejected: AtomicU64,
    in_flight: AtomicI64,
    scrapes_total: AtomicU64,
    rate_limited_total: AtomicU64,
    last_scrape_size_bytes: AtomicU64,
    scrape_duration: DurationHistogram,
    errors_by_reason: DashMap<&'static str, AtomicU64>,
}

impl SelfMetrics {
    pub(crate) fn new() -> Self {
        Self {
            requests_served: AtomicU64::new(0),
            requests_rejected: AtomicU64::new(0),
            in_flight: AtomicI64::new(0),
            scrapes_total: AtomicU64::new(0),
            rate_limited_total: AtomicU64::new(0),
            last_scrape_size_bytes: AtomicU64::new(0),
            scrape_duration: DurationHistogram::new(),
            errors_by_reason: DashMap::new(),
        }
    }

    pub(crate) fn begin_request(&self) -> InFlightGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard { counter: &self.in_flight }
    }

    pub(crate) fn record_success(&self, elapsed: std::time::Duration, body_len: usize) {
        self.requests_served.fetch_add(1, Ordering::Relaxed);
        self.scrapes_total.fetch_add(1, Ordering::Relaxed);
        self.scrape_duration.observe(elapsed.as_secs_f64());
        self.last_scrape_size_bytes.store(body_len as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self, reason: &'static str) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
        if reason == "rate_limited" {
            self.rate_limited_total.fetch_add(1, Ordering::Relaxed);
        }
        self.errors_by_reason
            .entry(reason)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn requests_served(&self) -> u64 {
        self.requests_served.load(Ordering::Relaxed)
    }

    pub(crate) fn requests_rejected(&self) -> u64 {
        self.requests_rejected.load(Ordering::Relaxed)
    }

    pub(crate) fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Renders every self-metric for inclusion in the scrape body,
    /// matching the spec's literal series names.
    pub(crate) fn snapshot(&self) -> Vec<MetricSnapshot> {
        let now = chrono::Utc::now();
        let mut out = Vec::new();

        let gauges = [
            ("scrape-self-in-flight", "scrape_in_flight", "in-flight scrape requests", self.in_flight.load(Ordering::Relaxed) as f64),
            (
                "scrape-self-last-size",
                "last_scrape_size_bytes",
                "size in bytes of the most recently rendered scrape body",
                self.last_scrape_size_bytes.load(Ordering::Relaxed) as f64,
            ),
        ];
        for (id, name, description, value) in gauges {
            if let Ok(s) =
                MetricSnapshot::new(id, name, "", description, Tags::new(), MetricValue::Gauge { value }, now)
            {
                out.push(s);
            }
        }

        let counters = [
            ("scrape-self-scrapes-total", "scrapes_total", "completed scrape requests", self.scrapes_total.load(Ordering::Relaxed) as i64),
            (
                "scrape-self-rate-limited-total",
                "rate_limited_total",
                "requests rejected by the per-IP token bucket",
                self.rate_limited_total.load(Ordering::Relaxed) as i64,
            ),
        ];
        for (id, name, description, value) in counters {
            if let Ok(s) =
                MetricSnapshot::new(id, name, "", description, Tags::new(), MetricValue::Counter { value }, now)
            {
                out.push(s);
            }
        }

        if let Ok(s) = MetricSnapshot::new(
            "scrape-self-duration",
            "scrape_duration_seconds",
            "seconds",
            "time spent handling a scrape request",
            Tags::new(),
            self.scrape_duration.to_value(),
            now,
        ) {
            out.push(s);
        }

        let items: Vec<MultiSampleItem> = self
            .errors_by_reason
            .iter()
            .map(|entry| MultiSampleItem {
                name: "errors_total".to_string(),
                tags: Tags::from_pairs(vec![("reason".to_string(), entry.key().to_string())]),
                value: SimpleValue::Counter(entry.value().load(Ordering::Relaxed) as i64),
            })
            .collect();
        if !items.is_empty() {
            if let Ok(s) = MetricSnapshot::new(
                "scrape-self-errors",
                "errors_total",
                "",
                "scrape requests rejected, broken down by reason",
                Tags::new(),
                MetricValue::MultiSample(items),
                now,
            ) {
                out.push(s);
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_guard_decrements_on_drop() {
        let metrics = SelfMetrics::new();
        {
            let _guard = metrics.begin_request();
            assert_eq!(metrics.in_flight(), 1);
        }
        assert_eq!(metrics.in_flight(), 0);
    }

    #[test]
    fn record_success_updates_scrapes_total_and_last_size() {
        let metrics = SelfMetrics::new();
        metrics.record_success(std::time::Duration::from_millis(12), 512);
        assert_eq!(metrics.requests_served(), 1);
        let snapshots = metrics.snapshot();
        assert!(snapshots.iter().any(|s| s.name == "scrapes_total"));
        assert!(snapshots.iter().any(|s| s.name == "last_scrape_size_bytes"));
    }

    #[test]
    fn record_error_breaks_down_by_reason() {
        let metrics = SelfMetrics::new();
        metrics.record_error("rate_limited");
        metrics.record_error("rate_limited");
        metrics.record_error("proxy_violation");
        assert_eq!(metrics.requests_rejected(), 3);
        let snapshots = metrics.snapshot();
        let errors = snapshots.iter().find(|s| s.name == "errors_total").unwrap();
        match &errors.value {
            MetricValue::MultiSample(items) => assert_eq!(items.len(), 2),
            other => panic!("expected MultiSample, got {other:?}"),
        }
    }

    #[test]
    fn scrape_duration_histogram_buckets_observations() {
        let metrics = SelfMetrics::new();
        metrics.record_success(std::time::Duration::from_millis(5), 10);
        metrics.record_success(std::time::Duration::from_secs(20), 10);
        let snapshots = metrics.snapshot();
        let duration = snapshots.iter().find(|s| s.name == "scrape_duration_seconds").unwrap();
        match &duration.value {
            MetricValue::BucketHistogram(h) => {
                assert_eq!(h.count, 2);
                assert_eq!(*h.counts.last().unwrap(), 2);
            }
            other => panic!("expected BucketHistogram, got {other:?}"),
        }
    }
}
