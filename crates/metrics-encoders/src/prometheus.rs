//! Prometheus text exposition encoder
//!
//! Pull-based: unlike the other backends this is never pushed over HTTP
//! by the flusher. `render` is a pure, synchronous function called
//! directly by the scrape handler in `metrics-scrape`, following
//! `f384a151_metrics-rs-metrics`'s separation between the exporter
//! builder (configuration) and its renderer (formatting).

use crate::error::Result;
use crate::Encoder;
use metrics_core::{MetricSnapshot, MetricValue};
use std::fmt::Write as _;

pub struct PrometheusEncoder;

/// Sanitizes a name to the `[a-zA-Z_:][a-zA-Z0-9_:]*` Prometheus allows,
/// replacing any other byte with `_`.
fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        let ok = c.is_ascii_alphanumeric() || c == '_' || c == ':';
        let ok_first = i == 0 && (c.is_ascii_alphabetic() || c == '_' || c == ':');
        if (i == 0 && ok_first) || (i > 0 && ok) {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

fn escape_label_value(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

/// Appends `_total` to a counter's exposed name if not already present.
fn counter_name(name: &str) -> String {
    if name.ends_with("_total") {
        name.to_string()
    } else {
        format!("{name}_total")
    }
}

fn write_labels(out: &mut String, tags: &metrics_core::Tags, extra: &[(&str, String)]) {
    let sorted = tags.sorted();
    if sorted.is_empty() && extra.is_empty() {
        return;
    }
    out.push('{');
    let mut first = true;
    for (k, v) in sorted {
        if !first {
            out.push(',');
        }
        first = false;
        let _ = write!(out, "{}=\"{}\"", sanitize_name(k), escape_label_value(v));
    }
    for (k, v) in extra {
        if !first {
            out.push(',');
        }
        first = false;
        let _ = write!(out, "{}=\"{}\"", k, escape_label_value(v));
    }
    out.push('}');
}

fn write_metric_line(
    out: &mut String,
    name: &str,
    tags: &metrics_core::Tags,
    extra_labels: &[(&str, String)],
    value: f64,
) {
    out.push_str(name);
    write_labels(out, tags, extra_labels);
    let _ = writeln!(out, " {value}");
}

fn render_snapshot(snapshot: &MetricSnapshot, out: &mut String) {
    let name = match &snapshot.value {
        MetricValue::Counter { .. } => counter_name(&sanitize_name(&snapshot.name)),
        _ => sanitize_name(&snapshot.name),
    };
    let type_str = match snapshot.value {
        MetricValue::Gauge { .. } => "gauge",
        MetricValue::Counter { .. } => "counter",
        MetricValue::Distribution(_) | MetricValue::BucketHistogram(_) => "histogram",
        MetricValue::Summary(_) => "summary",
        MetricValue::MultiSample(_) => "gauge",
        MetricValue::Unknown { .. } => "untyped",
    };
    if !snapshot.description.is_empty() {
        let _ = writeln!(out, "# HELP {name} {}", snapshot.description.replace('\n', " "));
    }
    let _ = writeln!(out, "# TYPE {name} {type_str}");

    match &snapshot.value {
        MetricValue::Gauge { value } => write_metric_line(out, &name, &snapshot.tags, &[], *value),
        MetricValue::Counter { value } => {
            write_metric_line(out, &name, &snapshot.tags, &[], *value as f64)
        }
        MetricValue::Distribution(d) => {
            for (label, v) in [("p50", d.p50), ("p90", d.p90), ("p99", d.p99)] {
                write_metric_line(
                    out,
                    &format!("{name}_{label}"),
                    &snapshot.tags,
                    &[],
                    v,
                );
            }
            write_metric_line(out, &format!("{name}_count"), &snapshot.tags, &[], d.count as f64);
        }
        MetricValue::Summary(s) => {
            for (q, v) in &s.quantiles {
                write_metric_line(
                    out,
                    &name,
                    &snapshot.tags,
                    &[("quantile", format!("{q}"))],
                    *v,
                );
            }
            write_metric_line(out, &format!("{name}_count"), &snapshot.tags, &[], s.count as f64);
        }
        MetricValue::BucketHistogram(h) => {
            let mut cumulative = 0u64;
            for (bound, count) in h.bounds.iter().zip(h.counts.iter()) {
                cumulative = *count;
                write_metric_line(
                    out,
                    &format!("{name}_bucket"),
                    &snapshot.tags,
                    &[("le", format!("{bound}"))],
                    cumulative as f64,
                );
            }
            let inf_count = h.counts.last().copied().unwrap_or(cumulative);
            write_metric_line(
                out,
                &format!("{name}_bucket"),
                &snapshot.tags,
                &[("le", "+Inf".to_string())],
                inf_count as f64,
            );
            write_metric_line(out, &format!("{name}_sum"), &snapshot.tags, &[], h.sum);
            write_metric_line(out, &format!("{name}_count"), &snapshot.tags, &[], h.count as f64);
        }
        MetricValue::MultiSample(items) => {
            for item in items {
                let tags = snapshot.tags.merged_with(&item.tags);
                let (item_name, v) = match item.value {
                    metrics_core::SimpleValue::Gauge(v) => (sanitize_name(&item.name), v),
                    metrics_core::SimpleValue::Counter(v) => {
                        (counter_name(&sanitize_name(&item.name)), v as f64)
                    }
                };
                write_metric_line(out, &item_name, &tags, &[], v);
            }
        }
        MetricValue::Unknown { description } => {
            write_metric_line(out, &name, &snapshot.tags, &[("reason", description.clone())], 0.0)
        }
    }
}

/// Renders a batch of snapshots in Prometheus text exposition format
/// (version 0.0.4).
pub fn render(batch: &[MetricSnapshot]) -> String {
    let mut out = String::new();
    for snapshot in batch {
        render_snapshot(snapshot, &mut out);
    }
    out
}

impl Encoder for PrometheusEncoder {
    fn encode(&self, batch: &[MetricSnapshot]) -> Result<Vec<u8>> {
        Ok(render(batch).into_bytes())
    }

    fn content_type(&self) -> &'static str {
        "text/plain; version=0.0.4; charset=utf-8"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_core::Tags;
    use chrono::Utc;

    #[test]
    fn renders_help_type_and_sample_for_gauge() {
        let snapshot = MetricSnapshot::new(
            "id",
            "cpu_usage",
            "ratio",
            "current cpu usage",
            Tags::from_pairs(vec![("host".into(), "a".into())]),
            MetricValue::Gauge { value: 0.5 },
            Utc::now(),
        )
        .unwrap();
        let out = render(&[snapshot]);
        assert!(out.contains("# HELP cpu_usage current cpu usage"));
        assert!(out.contains("# TYPE cpu_usage gauge"));
        assert!(out.contains("cpu_usage{host=\"a\"} 0.5"));
    }

    #[test]
    fn bucket_histogram_renders_le_labels_and_inf_bucket() {
        let hist = metrics_core::BucketHistogram::from_observations(
            vec![1.0, 5.0, 10.0],
            &[0.5, 4.0, 5.0, 9.0, 20.0],
        )
        .unwrap();
        let snapshot = MetricSnapshot::new(
            "id",
            "latency",
            "",
            "",
            Tags::new(),
            MetricValue::BucketHistogram(hist),
            Utc::now(),
        )
        .unwrap();
        let out = render(&[snapshot]);
        assert!(out.contains("latency_bucket{le=\"1\"} 1"));
        assert!(out.contains("latency_bucket{le=\"+Inf\"} 5"));
        assert!(out.contains("latency_count 5"));
    }

    #[test]
    fn counter_is_rendered_with_total_suffix() {
        let snapshot = MetricSnapshot::new(
            "id",
            "requests",
            "",
            "",
            Tags::new(),
            MetricValue::Counter { value: 9 },
            Utc::now(),
        )
        .unwrap();
        let out = render(&[snapshot]);
        assert!(out.contains("# TYPE requests_total counter"));
        assert!(out.contains("requests_total "));
        assert!(!out.contains("requests "));
    }

    #[test]
    fn counter_name_is_not_doubled_when_already_suffixed() {
        let snapshot = MetricSnapshot::new(
            "id",
            "requests_total",
            "",
            "",
            Tags::new(),
            MetricValue::Counter { value: 9 },
            Utc::now(),
        )
        .unwrap();
        let out = render(&[snapshot]);
        assert!(out.contains("# TYPE requests_total counter"));
        assert!(!out.contains("requests_total_total"));
    }

    #[test]
    fn unknown_value_renders_as_untyped_with_reason_label() {
        let snapshot = MetricSnapshot::new(
            "id",
            "mystery",
            "",
            "",
            Tags::new(),
            MetricValue::Unknown { description: "unsupported shape".to_string() },
            Utc::now(),
        )
        .unwrap();
        let out = render(&[snapshot]);
        assert!(out.contains("# TYPE mystery untyped"));
        assert!(out.contains(r#"reason="unsupported shape""#));
    }

    #[test]
    fn sanitizes_invalid_characters_in_name() {
        assert_eq!(sanitize_name("http.request.count"), "http_request_count");
        assert_eq!(sanitize_name("9invalid"), "_invalid");
    }
}
