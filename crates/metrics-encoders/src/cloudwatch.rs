//! AWS CloudWatch PutMetricData backend
//!
//! Unlike the other backends this never goes through [`Encoder`]: the AWS
//! SDK builds its own typed request, so "encoding" here means building a
//! `Vec<MetricDatum>` directly. Credentials and region are loaded the way
//! `smithclay-otlp2parquet`'s `AwsSigV4HttpClient::new` loads them — from
//! the ambient environment via `aws_config`.

use crate::error::{Error, Result};
use crate::Export;
use async_trait::async_trait;
use aws_sdk_cloudwatch::types::{Dimension, MetricDatum, StandardUnit, StatisticSet};
use aws_sdk_cloudwatch::Client;
use metrics_core::{MetricSnapshot, MetricValue, Tags};

/// `PutMetricData` accepts at most 1000 datums per call, but the spec
/// caps batches to 20 regardless of what a caller configures.
const MAX_DATUMS_PER_BATCH: usize = 20;
const MAX_DIMENSIONS_PER_DATUM: usize = 10;
const MAX_DIMENSION_FIELD_LENGTH: usize = 255;

#[derive(Debug, Clone)]
pub struct CloudWatchConfig {
    pub namespace: String,
    /// Region override; when `None`, the SDK's default provider chain
    /// (env, shared config, instance metadata) decides.
    pub region: Option<String>,
}

pub struct CloudWatchExporter {
    config: CloudWatchConfig,
    client: Client,
}

/// Maps a snapshot's `unit` field to the closest CloudWatch `StandardUnit`.
fn unit_to_standard(unit: &str) -> StandardUnit {
    match unit {
        "ms" => StandardUnit::Milliseconds,
        "s" => StandardUnit::Seconds,
        "bytes" => StandardUnit::Bytes,
        "%" => StandardUnit::Percent,
        "count" => StandardUnit::Count,
        _ => StandardUnit::None,
    }
}

/// Appends `_total` to a counter's metric name if not already present.
fn counter_name(name: &str) -> String {
    if name.ends_with("_total") {
        name.to_string()
    } else {
        format!("{name}_total")
    }
}

/// Representative single value for a Distribution's approximate sum:
/// the mean of its three recorded percentiles.
fn distribution_representative(d: &metrics_core::Distribution) -> f64 {
    (d.p50 + d.p90 + d.p99) / 3.0
}

/// Representative single value for a Summary's approximate sum: its
/// recorded median quantile, falling back to the min/max midpoint.
fn summary_representative(s: &metrics_core::Summary) -> f64 {
    s.quantiles
        .iter()
        .find(|(q, _)| (q - 0.5).abs() < f64::EPSILON)
        .map(|(_, v)| *v)
        .unwrap_or((s.min + s.max) / 2.0)
}

impl CloudWatchExporter {
    pub async fn new(config: CloudWatchConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let shared_config = loader.load().await;
        let client = Client::new(&shared_config);
        Self { config, client }
    }

    /// Dimensions for one datum, assuming tags have already passed the
    /// cardinality guard: sorted by key, capped to 10, each name/value
    /// truncated to 255 chars with embedded CR/LF replaced by a space.
    fn dimensions(&self, snapshot: &MetricSnapshot, extra: &Tags) -> Vec<Dimension> {
        let merged = snapshot.tags.merged_with(extra);
        let mut sorted = merged.sorted();
        sorted.truncate(MAX_DIMENSIONS_PER_DATUM);
        sorted
            .into_iter()
            .map(|(k, v)| {
                Dimension::builder()
                    .name(sanitize_dimension_field(k))
                    .value(sanitize_dimension_field(v))
                    .build()
            })
            .collect()
    }

    fn datum_for(&self, snapshot: &MetricSnapshot) -> Vec<MetricDatum> {
        let ts = aws_sdk_cloudwatch::primitives::DateTime::from_secs(snapshot.timestamp.timestamp());
        match &snapshot.value {
            MetricValue::Gauge { value } => vec![MetricDatum::builder()
                .metric_name(&snapshot.name)
                .value(*value)
                .unit(unit_to_standard(&snapshot.unit))
                .timestamp(ts)
                .set_dimensions(Some(self.dimensions(snapshot, &Tags::new())))
                .build()],
            MetricValue::Counter { value } => vec![MetricDatum::builder()
                .metric_name(counter_name(&snapshot.name))
                .value(*value as f64)
                .unit(StandardUnit::Count)
                .timestamp(ts)
                .set_dimensions(Some(self.dimensions(snapshot, &Tags::new())))
                .build()],
            MetricValue::Distribution(d) => {
                let sum = distribution_representative(d) * (d.count.max(1) as f64);
                vec![MetricDatum::builder()
                    .metric_name(&snapshot.name)
                    .statistic_values(
                        StatisticSet::builder()
                            .sample_count(d.count as f64)
                            .sum(sum)
                            .minimum(d.min)
                            .maximum(d.max)
                            .build()
                            .expect("statistic set requires all four fields"),
                    )
                    .unit(unit_to_standard(&snapshot.unit))
                    .timestamp(ts)
                    .set_dimensions(Some(self.dimensions(snapshot, &Tags::new())))
                    .build()]
            }
            MetricValue::Summary(s) => {
                let sum = summary_representative(s) * (s.count.max(1) as f64);
                vec![MetricDatum::builder()
                    .metric_name(&snapshot.name)
                    .statistic_values(
                        StatisticSet::builder()
                            .sample_count(s.count as f64)
                            .sum(sum)
                            .minimum(s.min)
                            .maximum(s.max)
                            .build()
                            .expect("statistic set requires all four fields"),
                    )
                    .unit(unit_to_standard(&snapshot.unit))
                    .timestamp(ts)
                    .set_dimensions(Some(self.dimensions(snapshot, &Tags::new())))
                    .build()]
            }
            MetricValue::BucketHistogram(h) => vec![MetricDatum::builder()
                .metric_name(&snapshot.name)
                .statistic_values(
                    StatisticSet::builder()
                        .sample_count(h.count as f64)
                        .sum(h.sum)
                        .minimum(h.min)
                        .maximum(h.max)
                        .build()
                        .expect("statistic set requires all four fields"),
                )
                .unit(unit_to_standard(&snapshot.unit))
                .timestamp(ts)
                .set_dimensions(Some(self.dimensions(snapshot, &Tags::new())))
                .build()],
            MetricValue::MultiSample(items) => items
                .iter()
                .map(|item| {
                    let (value, unit, name) = match item.value {
                        metrics_core::SimpleValue::Gauge(v) => {
                            (v, unit_to_standard(&snapshot.unit), item.name.clone())
                        }
                        metrics_core::SimpleValue::Counter(v) => {
                            (v as f64, StandardUnit::Count, counter_name(&item.name))
                        }
                    };
                    MetricDatum::builder()
                        .metric_name(name)
                        .value(value)
                        .unit(unit)
                        .timestamp(ts.clone())
                        .set_dimensions(Some(self.dimensions(snapshot, &item.tags)))
                        .build()
                })
                .collect(),
            MetricValue::Unknown { .. } => Vec::new(),
        }
    }
}

fn sanitize_dimension_field(s: &str) -> String {
    let mut out: String = s.chars().map(|c| if c == '\r' || c == '\n' { ' ' } else { c }).collect();
    out.truncate(MAX_DIMENSION_FIELD_LENGTH);
    out
}

#[async_trait]
impl Export for CloudWatchExporter {
    async fn export(&self, batch: &[MetricSnapshot]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let data: Vec<MetricDatum> = batch.iter().flat_map(|s| self.datum_for(s)).collect();

        for chunk in data.chunks(MAX_DATUMS_PER_BATCH) {
            self.client
                .put_metric_data()
                .namespace(&self.config.namespace)
                .set_metric_data(Some(chunk.to_vec()))
                .send()
                .await
                .map_err(|e| Error::CloudWatch(e.to_string()))?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "cloudwatch"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use metrics_core::{BucketHistogram, Distribution, MetricSnapshot, Summary, Tags};

    /// Builds an exporter without going through `::new`, so these tests
    /// don't touch the ambient credential/region provider chain.
    fn test_exporter() -> CloudWatchExporter {
        let sdk_config = aws_config::SdkConfig::builder()
            .region(aws_config::Region::new("us-east-1"))
            .build();
        CloudWatchExporter {
            config: CloudWatchConfig { namespace: "Test".to_string(), region: None },
            client: Client::new(&sdk_config),
        }
    }

    fn snapshot(value: MetricValue) -> MetricSnapshot {
        MetricSnapshot::new("id", "latency_ms", "", "", Tags::new(), value, Utc::now()).unwrap()
    }

    #[test]
    fn gauge_becomes_a_single_value_datum() {
        let exporter = test_exporter();
        let datums = exporter.datum_for(&snapshot(MetricValue::Gauge { value: 42.0 }));
        assert_eq!(datums.len(), 1);
        assert!(format!("{:?}", datums[0]).contains("42"));
    }

    #[test]
    fn counter_name_gets_total_suffix_when_absent() {
        let exporter = test_exporter();
        let snap = MetricSnapshot::new(
            "id",
            "requests",
            "",
            "",
            Tags::new(),
            MetricValue::Counter { value: 5 },
            Utc::now(),
        )
        .unwrap();
        let datums = exporter.datum_for(&snap);
        assert_eq!(datums[0].metric_name(), Some("requests_total"));
    }

    #[test]
    fn counter_name_is_not_doubled_when_already_suffixed() {
        let exporter = test_exporter();
        let snap = MetricSnapshot::new(
            "id",
            "requests_total",
            "",
            "",
            Tags::new(),
            MetricValue::Counter { value: 5 },
            Utc::now(),
        )
        .unwrap();
        let datums = exporter.datum_for(&snap);
        assert_eq!(datums[0].metric_name(), Some("requests_total"));
    }

    #[test]
    fn unit_tag_maps_to_standard_unit() {
        let exporter = test_exporter();
        let snap = MetricSnapshot::new(
            "id",
            "latency",
            "ms",
            "",
            Tags::new(),
            MetricValue::Gauge { value: 1.0 },
            Utc::now(),
        )
        .unwrap();
        let datums = exporter.datum_for(&snap);
        assert_eq!(datums[0].unit(), Some(&StandardUnit::Milliseconds));
    }

    #[test]
    fn distribution_approximates_sum_from_percentile_mean() {
        let exporter = test_exporter();
        let dist = Distribution { count: 4, min: 10.0, max: 30.0, p50: 20.0, p90: 28.0, p99: 29.0 };
        let datums = exporter.datum_for(&snapshot(MetricValue::Distribution(dist)));
        // mean of (20, 28, 29) = 25.666..., times count 4 = ~102.67
        let statistics = datums[0].statistic_values().unwrap();
        assert!((statistics.sum() - 102.666).abs() < 0.01);
    }

    #[test]
    fn bucket_histogram_uses_its_own_sum_directly() {
        let exporter = test_exporter();
        let hist = BucketHistogram {
            count: 7,
            min: 1.0,
            max: 50.0,
            sum: 123.4,
            bounds: Vec::new(),
            counts: Vec::new(),
        };
        let datums = exporter.datum_for(&snapshot(MetricValue::BucketHistogram(hist)));
        assert!(format!("{:?}", datums[0]).contains("123.4"));
    }

    #[test]
    fn multi_sample_emits_one_datum_per_item() {
        let exporter = test_exporter();
        let items = vec![
            metrics_core::MultiSampleItem {
                name: "a".to_string(),
                tags: Tags::new(),
                value: metrics_core::SimpleValue::Counter(1),
            },
            metrics_core::MultiSampleItem {
                name: "b".to_string(),
                tags: Tags::new(),
                value: metrics_core::SimpleValue::Gauge(2.5),
            },
        ];
        let datums = exporter.datum_for(&snapshot(MetricValue::MultiSample(items)));
        assert_eq!(datums.len(), 2);
        assert_eq!(datums[0].metric_name(), Some("a_total"));
        assert_eq!(datums[1].metric_name(), Some("b"));
    }

    #[test]
    fn dimensions_are_sorted_capped_and_truncated() {
        let exporter = test_exporter();
        let mut tags = Tags::new();
        for i in 0..15 {
            tags.push(format!("k{i:02}"), "v".repeat(300));
        }
        let snap =
            MetricSnapshot::new("id", "m", "", "", tags, MetricValue::Gauge { value: 1.0 }, Utc::now())
                .unwrap();
        let dims = exporter.dimensions(&snap, &Tags::new());
        assert_eq!(dims.len(), MAX_DIMENSIONS_PER_DATUM);
        assert_eq!(dims[0].name(), Some("k00"));
        assert_eq!(dims[0].value().unwrap().len(), MAX_DIMENSION_FIELD_LENGTH);
    }

    #[test]
    fn dimension_values_strip_carriage_returns_and_newlines() {
        let exporter = test_exporter();
        let mut tags = Tags::new();
        tags.push("host", "line1\r\nline2");
        let snap =
            MetricSnapshot::new("id", "m", "", "", tags, MetricValue::Gauge { value: 1.0 }, Utc::now())
                .unwrap();
        let dims = exporter.dimensions(&snap, &Tags::new());
        assert_eq!(dims[0].value(), Some("line1  line2"));
    }

    /// Boundary from spec: 45 counters at the 20-datum cap batch as
    /// 20/20/5 regardless of any larger configured batch size.
    #[tokio::test]
    async fn export_chunks_at_twenty_datums_regardless_of_batch_size() {
        let exporter = test_exporter();
        let snapshots: Vec<MetricSnapshot> = (0..45)
            .map(|i| {
                MetricSnapshot::new(
                    format!("id{i}"),
                    format!("counter{i}"),
                    "",
                    "",
                    Tags::new(),
                    MetricValue::Counter { value: i },
                    Utc::now(),
                )
                .unwrap()
            })
            .collect();
        let data: Vec<MetricDatum> =
            snapshots.iter().flat_map(|s| exporter.datum_for(s)).collect();
        assert_eq!(data.len(), 45);
        let chunk_sizes: Vec<usize> =
            data.chunks(MAX_DATUMS_PER_BATCH).map(|c| c.len()).collect();
        assert_eq!(chunk_sizes, vec![20, 20, 5]);
    }

    #[tokio::test]
    async fn export_of_empty_batch_is_a_no_op() {
        let exporter = test_exporter();
        exporter.export(&[]).await.unwrap();
    }

    #[test]
    fn summary_approximates_sum_from_median_quantile() {
        let exporter = test_exporter();
        let summary =
            Summary { count: 2, min: 0.0, max: 10.0, quantiles: vec![(0.5, 6.0)] };
        let datums = exporter.datum_for(&snapshot(MetricValue::Summary(summary)));
        let statistics = datums[0].statistic_values().unwrap();
        assert_eq!(statistics.sum(), 12.0);
    }

    #[test]
    fn summary_falls_back_to_midpoint_without_median_quantile() {
        let exporter = test_exporter();
        let summary = Summary { count: 2, min: 0.0, max: 10.0, quantiles: Vec::new() };
        let datums = exporter.datum_for(&snapshot(MetricValue::Summary(summary)));
        let statistics = datums[0].statistic_values().unwrap();
        assert_eq!(statistics.sum(), 10.0);
    }
}
