//! Pluggable backend encoders
//!
//! Each backend implements [`Export`] (push) or just [`Encoder`] (pull, for
//! Prometheus' scrape-driven text exposition). Grounded on
//! `crates/telemetry/src/otel.rs`'s `MetricsProvider::record_metric` for
//! the shape of "take a batch, hand it to a backend", generalized to
//! several concrete backends instead of one OTLP exporter.

pub mod cloudwatch;
pub mod composite;
pub mod error;
pub mod influx;
pub mod json_lines;
pub mod prometheus;

pub use error::{Error, Result};

use async_trait::async_trait;
use metrics_core::MetricSnapshot;

/// Encodes a batch of snapshots into a backend's wire format, without
/// sending it. Implemented by push backends that speak a byte-oriented
/// protocol (Influx Line Protocol, JSON Lines) and by the Prometheus
/// exposition format, which is rendered on demand by the scrape handler
/// rather than pushed.
pub trait Encoder: Send + Sync {
    fn encode(&self, batch: &[MetricSnapshot]) -> Result<Vec<u8>>;
    fn content_type(&self) -> &'static str;
}

/// A backend that accepts a batch of snapshots and delivers it, whether
/// over HTTP (Influx, a JSON Lines endpoint) or a native SDK call
/// (CloudWatch `PutMetricData`).
#[async_trait]
pub trait Export: Send + Sync {
    async fn export(&self, batch: &[MetricSnapshot]) -> Result<()>;

    /// Backend name used in logs and self-metrics labels.
    fn name(&self) -> &'static str;
}
