//! Collector contract and illustrative collectors
//!
//! A collector turns live process/domain state into [`MetricSnapshot`]s at
//! collection time. Grounded on `crates/telemetry/src/transport_events.rs`'s
//! `TransportEvent` variants (`LinkStateChangeEvent`,
//! `QueueDepthWarningEvent`, ...), each of which stamps `current_time_ms()`
//! and carries the fields needed to build a metric — generalized here into
//! a trait any subsystem can implement rather than a closed event enum.

pub mod http;
pub mod process;
pub mod queue;

pub use http::HttpRequestCollector;
pub use process::ProcessSelfCollector;
pub use queue::QueueDepthCollector;

use async_trait::async_trait;
use metrics_core::MetricSnapshot;

/// Implemented by anything that can report its current state as a batch
/// of metric snapshots when asked. Collectors are polled by the flusher
/// (pull) rather than pushing through the buffer themselves, except
/// where noted (e.g. [`http::HttpRequestCollector::record`] pushes
/// per-request counters directly since request completion is itself the
/// collection event).
#[async_trait]
pub trait Collector: Send + Sync {
    /// Stable name used in logs and self-metrics labels.
    fn name(&self) -> &'static str;

    /// Produces the current snapshot set. Returning an empty vec is not
    /// an error — it means nothing changed since the last poll.
    async fn collect(&self) -> Vec<MetricSnapshot>;
}

/// Polls a fixed set of collectors in registration order and
/// concatenates their output. Order matters only for log readability;
/// collectors must not depend on being polled before or after another.
pub struct CollectorRegistry {
    collectors: Vec<Box<dyn Collector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self { collectors: Vec::new() }
    }

    pub fn register(&mut self, collector: Box<dyn Collector>) {
        self.collectors.push(collector);
    }

    pub async fn collect_all(&self) -> Vec<MetricSnapshot> {
        let mut out = Vec::new();
        for collector in &self.collectors {
            let snapshots = collector.collect().await;
            tracing::trace!(
                collector = collector.name(),
                count = snapshots.len(),
                "collector produced snapshots"
            );
            out.extend(snapshots);
        }
        out
    }
}

impl Default for CollectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_core::{MetricValue, Tags};
    use chrono::Utc;

    struct FixedCollector(Vec<MetricSnapshot>);

    #[async_trait]
    impl Collector for FixedCollector {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn collect(&self) -> Vec<MetricSnapshot> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn registry_concatenates_in_registration_order() {
        let snap = |n: &str| {
            MetricSnapshot::new(
                "id", n, "", "", Tags::new(), MetricValue::Gauge { value: 1.0 }, Utc::now(),
            )
            .unwrap()
        };
        let mut registry = CollectorRegistry::new();
        registry.register(Box::new(FixedCollector(vec![snap("a")])));
        registry.register(Box::new(FixedCollector(vec![snap("b")])));
        let all = registry.collect_all().await;
        assert_eq!(all.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
