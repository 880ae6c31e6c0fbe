//! Metric value model
//!
//! A closed tagged union of metric values plus the metadata every
//! instrument carries. Mirrors `honeylink_telemetry::types::Metric`,
//! generalized from a single `f64` payload to the full set of shapes an
//! export pipeline needs to describe (gauge, counter, distribution,
//! summary, bucket histogram, multi-sample).

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Discriminant for [`MetricValue`], kept alongside the value so encoders
/// can dispatch without re-matching the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
    MultiSample,
    Unknown,
}

/// Tag (dimension/label) set attached to a snapshot or multi-sample item.
///
/// Preserves insertion order for display; [`Tags::sorted`] gives the
/// ordinal-ascending-by-key view encoders and the cardinality guard need.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tags(pub Vec<(String, String)>);

impl Tags {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.0.iter()
    }

    /// Ordinal ascending-by-key view, used by encoders that must render a
    /// deterministic tag order (Influx Line Protocol, CloudWatch dimensions).
    pub fn sorted(&self) -> Vec<(&str, &str)> {
        let mut out: Vec<(&str, &str)> =
            self.0.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        out.sort_by(|a, b| a.0.cmp(b.0));
        out
    }

    /// Validates the §3 invariant that tag keys within a snapshot are
    /// unique and non-empty.
    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::with_capacity(self.0.len());
        for (k, _) in &self.0 {
            if k.is_empty() {
                return Err(Error::Validation("tag key must not be empty".into()));
            }
            if !seen.insert(k.as_str()) {
                return Err(Error::Validation(format!("duplicate tag key: {k}")));
            }
        }
        Ok(())
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// Merges `override_tags` into `self`, overriding by key (§9 Open
    /// Question: multi-sample item tags override parent tags by key).
    pub fn merged_with(&self, override_tags: &Tags) -> Tags {
        let mut merged: BTreeMap<&str, &str> =
            self.0.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        for (k, v) in &override_tags.0 {
            merged.insert(k.as_str(), v.as_str());
        }
        Tags(merged.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }
}

/// A distribution's (or summary's) recorded quantiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

/// A summary: count/min/max plus an arbitrary quantile → value mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    /// quantile in `[0, 1]` -> observed value
    pub quantiles: Vec<(f64, f64)>,
}

/// A cumulative bucket histogram. `counts[i]` is the number of samples
/// `<= bounds[i]`; `counts[n]` (the last entry) is the `+Inf` bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketHistogram {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub bounds: Vec<f64>,
    pub counts: Vec<u64>,
}

impl BucketHistogram {
    /// Builds a cumulative bucket histogram from upper bounds and raw
    /// observations, per §8's worked example
    /// (`bounds=[1,5,10]`, observations `{0.5,4,5,9,20}` ->
    /// `counts=[1,3,4,5]`, `+Inf=5`).
    pub fn from_observations(bounds: Vec<f64>, observations: &[f64]) -> Result<Self> {
        for w in bounds.windows(2) {
            if !(w[0] < w[1]) {
                return Err(Error::Validation("bucket bounds must be strictly ascending".into()));
            }
        }
        let mut counts = vec![0u64; bounds.len() + 1];
        for &v in observations {
            let bucket = bounds.iter().position(|&b| v <= b).unwrap_or(bounds.len());
            for c in counts.iter_mut().skip(bucket) {
                *c += 1;
            }
        }
        let count = observations.len() as u64;
        let (min, max) = if observations.is_empty() {
            (0.0, 0.0)
        } else {
            (
                observations.iter().cloned().fold(f64::INFINITY, f64::min),
                observations.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            )
        };
        let sum = observations.iter().sum();
        Ok(Self { count, min, max, sum, bounds, counts })
    }
}

/// One item of a [`MetricValue::MultiSample`] batch — a named gauge or
/// counter sharing the parent snapshot's timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiSampleItem {
    pub name: String,
    pub tags: Tags,
    pub value: SimpleValue,
}

/// The subset of [`MetricValue`] a multi-sample item may carry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimpleValue {
    Gauge(f64),
    Counter(i64),
}

/// The tagged union of values an instrument can report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricValue {
    Gauge { value: f64 },
    Counter { value: i64 },
    Distribution(Distribution),
    Summary(Summary),
    BucketHistogram(BucketHistogram),
    MultiSample(Vec<MultiSampleItem>),
    /// Residual shape for forward compatibility: a snapshot whose value
    /// couldn't be decoded into one of the known variants. Carries
    /// whatever description was recoverable so it can still be reported
    /// rather than silently dropped.
    Unknown { description: String },
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge { .. } => MetricKind::Gauge,
            MetricValue::Counter { .. } => MetricKind::Counter,
            MetricValue::Distribution(_) => MetricKind::Histogram,
            MetricValue::Summary(_) => MetricKind::Summary,
            MetricValue::BucketHistogram(_) => MetricKind::Histogram,
            MetricValue::MultiSample(_) => MetricKind::MultiSample,
            MetricValue::Unknown { .. } => MetricKind::Unknown,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            MetricValue::BucketHistogram(h) => {
                if h.counts.len() != h.bounds.len() + 1 {
                    return Err(Error::Validation(
                        "counts.length must equal bounds.length + 1".into(),
                    ));
                }
                for w in h.bounds.windows(2) {
                    if !(w[0] < w[1]) {
                        return Err(Error::Validation("bounds must be strictly ascending".into()));
                    }
                }
                if h.count > 0 && h.min > h.max {
                    return Err(Error::Validation("min must be <= max".into()));
                }
                Ok(())
            }
            MetricValue::Distribution(d) => {
                if d.count > 0 && d.min > d.max {
                    return Err(Error::Validation("min must be <= max".into()));
                }
                Ok(())
            }
            MetricValue::Summary(s) => {
                if s.count > 0 && s.min > s.max {
                    return Err(Error::Validation("min must be <= max".into()));
                }
                for (q, _) in &s.quantiles {
                    if !(0.0..=1.0).contains(q) {
                        return Err(Error::Validation("quantile must be in [0,1]".into()));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// An immutable, self-describing metric sample produced by a collector at
/// collection time. See spec §3 for the full field list and invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub id: String,
    pub name: String,
    pub unit: String,
    pub description: String,
    pub tags: Tags,
    pub value: MetricValue,
    pub timestamp: DateTime<Utc>,
}

impl MetricSnapshot {
    /// Constructs and validates a snapshot in one step, following
    /// `honeylink-core`'s preference for constructor-level invariant
    /// enforcement over a separate validator pass.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        unit: impl Into<String>,
        description: impl Into<String>,
        tags: Tags,
        value: MetricValue,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::Validation("snapshot id must not be empty".into()));
        }
        tags.validate()?;
        value.validate()?;
        Ok(Self {
            id,
            name: name.into(),
            unit: unit.into(),
            description: description.into(),
            tags,
            value,
            timestamp,
        })
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }
}
