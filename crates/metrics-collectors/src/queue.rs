//! Queue depth collector
//!
//! Reports a gauge for each watched queue's current depth. Grounded
//! directly on `crates/telemetry/src/transport_events.rs`'s
//! `QueueDepthWarningEvent { queue_name, current_depth, max_depth, .. }`,
//! generalized from a one-shot warning event into a steady-state gauge a
//! collector can poll.

use crate::Collector;
use async_trait::async_trait;
use chrono::Utc;
use metrics_core::{MetricSnapshot, MetricValue, Tags};
use std::sync::Arc;

pub type DepthSource = Arc<dyn Fn() -> u64 + Send + Sync>;

struct WatchedQueue {
    name: String,
    max_depth: u64,
    source: DepthSource,
}

pub struct QueueDepthCollector {
    queues: Vec<WatchedQueue>,
}

impl QueueDepthCollector {
    pub fn new() -> Self {
        Self { queues: Vec::new() }
    }

    pub fn watch(&mut self, name: impl Into<String>, max_depth: u64, source: DepthSource) {
        self.queues.push(WatchedQueue { name: name.into(), max_depth, source });
    }
}

impl Default for QueueDepthCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for QueueDepthCollector {
    fn name(&self) -> &'static str {
        "queue_depth"
    }

    async fn collect(&self) -> Vec<MetricSnapshot> {
        let mut out = Vec::new();
        for queue in &self.queues {
            let depth = (queue.source)();
            let mut tags = Tags::new();
            tags.push("queue", queue.name.clone());

            if depth as f64 / queue.max_depth.max(1) as f64 > 0.9 {
                tracing::warn!(queue = %queue.name, depth, max_depth = queue.max_depth, "queue depth near capacity");
            }

            if let Ok(snapshot) = MetricSnapshot::new(
                format!("queue_depth-{}-{}", queue.name, Utc::now().timestamp_nanos_opt().unwrap_or(0)),
                "queue_depth",
                "items",
                "current queue depth",
                tags,
                MetricValue::Gauge { value: depth as f64 },
                Utc::now(),
            ) {
                out.push(snapshot);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_one_gauge_per_watched_queue() {
        let mut collector = QueueDepthCollector::new();
        collector.watch("inbound", 100, Arc::new(|| 42));
        let snapshots = collector.collect().await;
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].name, "queue_depth");
    }
}
