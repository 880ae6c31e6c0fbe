//! HTTP server request collector
//!
//! Records one counter per completed request, tagged by method and status
//! class, plus a latency distribution. Modeled on
//! `transport_events::QueueDepthWarningEvent`'s pattern of recording at
//! the moment the domain event occurs rather than polling derived state.

use crate::Collector;
use async_trait::async_trait;
use chrono::Utc;
use metrics_core::{MetricSnapshot, MetricValue, Tags};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

struct Observation {
    method: String,
    status: u16,
    latency_ms: f64,
}

/// Buffers completed HTTP request observations until the next `collect`
/// poll, then emits one multi-sample snapshot bundling status-class
/// counters with a latency summary.
pub struct HttpRequestCollector {
    service: String,
    pending: Mutex<Vec<Observation>>,
    total_requests: AtomicU64,
}

impl HttpRequestCollector {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            pending: Mutex::new(Vec::new()),
            total_requests: AtomicU64::new(0),
        }
    }

    /// Records a completed request. Called from request-handling
    /// middleware, not from the collection poll loop.
    pub fn record(&self, method: &str, status: u16, latency_ms: f64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().expect("http collector mutex poisoned").push(Observation {
            method: method.to_string(),
            status,
            latency_ms,
        });
    }
}

#[async_trait]
impl Collector for HttpRequestCollector {
    fn name(&self) -> &'static str {
        "http_requests"
    }

    async fn collect(&self) -> Vec<MetricSnapshot> {
        let observations = std::mem::take(
            &mut *self.pending.lock().expect("http collector mutex poisoned"),
        );
        if observations.is_empty() {
            return Vec::new();
        }

        let latencies: Vec<f64> = observations.iter().map(|o| o.latency_ms).collect();
        let mut by_status_class: std::collections::HashMap<&'static str, i64> =
            std::collections::HashMap::new();
        for obs in &observations {
            let class = match obs.status {
                100..=199 => "1xx",
                200..=299 => "2xx",
                300..=399 => "3xx",
                400..=499 => "4xx",
                _ => "5xx",
            };
            *by_status_class.entry(class).or_insert(0) += 1;
        }

        let hist = metrics_core::BucketHistogram::from_observations(
            vec![10.0, 50.0, 100.0, 500.0, 1000.0],
            &latencies,
        );

        let mut tags = Tags::new();
        tags.push("service", self.service.clone());

        let mut snapshots = Vec::new();
        if let Ok(hist) = hist {
            if let Ok(snapshot) = MetricSnapshot::new(
                uuid_like("http_request_latency"),
                "http_request_latency_ms",
                "milliseconds",
                "completed HTTP request latency",
                tags.clone(),
                MetricValue::BucketHistogram(hist),
                Utc::now(),
            ) {
                snapshots.push(snapshot);
            }
        }

        let items = by_status_class
            .into_iter()
            .map(|(class, count)| metrics_core::MultiSampleItem {
                name: "http_requests_total".to_string(),
                tags: Tags::from_pairs(vec![("status_class".to_string(), class.to_string())]),
                value: metrics_core::SimpleValue::Counter(count),
            })
            .collect();

        if let Ok(snapshot) = MetricSnapshot::new(
            uuid_like("http_requests_total"),
            "http_requests_total",
            "requests",
            "completed HTTP requests by status class",
            tags,
            MetricValue::MultiSample(items),
            Utc::now(),
        ) {
            snapshots.push(snapshot);
        }

        snapshots
    }
}

/// Deterministic, collision-resistant-enough id for a snapshot without
/// pulling in a UUID generator on this crate's hot path; the export
/// pipeline only needs stable-within-a-batch identity, not global
/// uniqueness.
fn uuid_like(seed: &str) -> String {
    format!("{seed}-{}", Utc::now().timestamp_nanos_opt().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collect_drains_pending_observations() {
        let collector = HttpRequestCollector::new("api");
        collector.record("GET", 200, 12.0);
        collector.record("GET", 500, 300.0);
        let snapshots = collector.collect().await;
        assert_eq!(snapshots.len(), 2);
        // second collect with nothing recorded yields nothing
        assert!(collector.collect().await.is_empty());
    }
}
