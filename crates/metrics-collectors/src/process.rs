//! Self-metrics collector
//!
//! Reports the export pipeline's own health — buffer occupancy, drop
//! counts, retry counts — as gauges. Grounded on
//! `crates/telemetry/src/storage.rs`'s `BufferStats`/`get_stats`, which
//! the teacher exposes for the same purpose (operational visibility into
//! the pipeline itself, not the monitored system).

use crate::Collector;
use async_trait::async_trait;
use chrono::Utc;
use metrics_core::buffer::BufferStats;
use metrics_core::{MetricSnapshot, MetricValue, Tags};
use std::sync::Arc;

/// A function the collector calls each poll to get the current buffer
/// stats. Kept generic over the source rather than owning a `Buffer`
/// directly so one collector instance can report on several buffers.
pub type StatsSource = Arc<dyn Fn() -> BufferStats + Send + Sync>;

pub struct ProcessSelfCollector {
    sources: Vec<(String, StatsSource)>,
}

impl ProcessSelfCollector {
    pub fn new() -> Self {
        Self { sources: Vec::new() }
    }

    pub fn watch(&mut self, label: impl Into<String>, source: StatsSource) {
        self.sources.push((label.into(), source));
    }
}

impl Default for ProcessSelfCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for ProcessSelfCollector {
    fn name(&self) -> &'static str {
        "process_self"
    }

    async fn collect(&self) -> Vec<MetricSnapshot> {
        let mut out = Vec::new();
        for (label, source) in &self.sources {
            let stats = source();
            let mut tags = Tags::new();
            tags.push("buffer", label.clone());

            let items = vec![
                metrics_core::MultiSampleItem {
                    name: "metrics_buffer_len".to_string(),
                    tags: Tags::new(),
                    value: metrics_core::SimpleValue::Gauge(stats.len as f64),
                },
                metrics_core::MultiSampleItem {
                    name: "metrics_buffer_bytes".to_string(),
                    tags: Tags::new(),
                    value: metrics_core::SimpleValue::Gauge(stats.current_size_bytes as f64),
                },
                metrics_core::MultiSampleItem {
                    name: "buffer.overflow.total".to_string(),
                    tags: Tags::new(),
                    value: metrics_core::SimpleValue::Counter(stats.total_dropped as i64),
                },
                metrics_core::MultiSampleItem {
                    name: "metrics_buffer_submitted_total".to_string(),
                    tags: Tags::new(),
                    value: metrics_core::SimpleValue::Counter(stats.total_submitted as i64),
                },
            ];

            if let Ok(snapshot) = MetricSnapshot::new(
                format!("process_self-{label}-{}", Utc::now().timestamp_nanos_opt().unwrap_or(0)),
                "metrics_buffer",
                "",
                "producer buffer occupancy and drop counters",
                tags,
                MetricValue::MultiSample(items),
                Utc::now(),
            ) {
                out.push(snapshot);
            }
        }
        out
    }
}
