//! Cardinality guard
//!
//! Applies the six-step dimension pipeline on submission/encoding of a
//! snapshot: deny-list drop, allow-list keep-only, empty-dimension drop,
//! value-length truncation, per-key unique-value cap (drop-one-dimension
//! or drop-the-metric), and a backend-specific dimension-count cap (left
//! to each encoder, since the limit varies per backend). Modeled on
//! `metrics-exporter-prometheus`'s `Matcher` pattern map for the
//! deny/allow regex matching, generalized to the rest of the pipeline
//! spelled out in this crate's own design doc.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct CardinalityGuardConfig {
    /// Maximum distinct values tracked per tag key before overflow
    /// handling kicks in. 0 disables the cap entirely.
    pub max_unique_values_per_key: usize,
    /// Tag keys kept when non-empty; every other key is dropped. Empty
    /// means no allow-list filtering.
    pub allow_list: Vec<String>,
    /// Tag keys rejected outright: any snapshot carrying a key matching
    /// one of these patterns has that tag dropped before submission.
    pub deny_patterns: Vec<String>,
    /// Drop dimensions whose value is empty or all whitespace.
    pub drop_empty_dimensions: bool,
    /// Hard cap on a tag value's length; longer values are truncated.
    pub max_dimension_value_length: usize,
    /// On cap overflow, drop only the offending dimension and keep the
    /// rest of the metric. When false, the entire metric is dropped and
    /// the overflow counter is incremented instead.
    pub drop_only_overflowing_key: bool,
    /// Dimensions merged into every snapshot's tag set before the rest of
    /// the pipeline runs (e.g. `service.name`, `deployment.environment`).
    pub merge_default_dimensions: HashMap<String, String>,
}

impl Default for CardinalityGuardConfig {
    fn default() -> Self {
        Self {
            max_unique_values_per_key: 10_000,
            allow_list: Vec::new(),
            deny_patterns: Vec::new(),
            drop_empty_dimensions: false,
            max_dimension_value_length: 250,
            drop_only_overflowing_key: true,
            merge_default_dimensions: HashMap::new(),
        }
    }
}

struct Inner {
    seen: HashMap<String, HashSet<String>>,
}

/// Outcome of running the cardinality pipeline over one snapshot's tags.
pub enum Verdict {
    /// The snapshot survives, possibly with dimensions dropped/truncated.
    Keep,
    /// Step 5 overflowed and `drop_only_overflowing_key` is false: the
    /// entire metric is dropped.
    DropMetric,
}

/// Tracks per-key unique-value counts across the process lifetime and
/// enforces the configured deny/allow lists, truncation, and cap.
pub struct CardinalityGuard {
    config: CardinalityGuardConfig,
    deny_regexes: Vec<Regex>,
    inner: Mutex<Inner>,
    overflow_metrics_dropped: AtomicU64,
}

impl CardinalityGuard {
    pub fn new(config: CardinalityGuardConfig) -> Result<Self, regex::Error> {
        let deny_regexes = config
            .deny_patterns
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            config,
            deny_regexes,
            inner: Mutex::new(Inner { seen: HashMap::new() }),
            overflow_metrics_dropped: AtomicU64::new(0),
        })
    }

    fn is_denied(&self, key: &str) -> bool {
        self.deny_regexes.iter().any(|re| re.is_match(key))
    }

    fn is_allow_listed(&self, key: &str) -> bool {
        self.config.allow_list.is_empty() || self.config.allow_list.iter().any(|k| k == key)
    }

    /// Runs the six-step pipeline over `tags` in place (steps 1-5; step 6,
    /// the backend-specific dimension-count cap, is applied by each
    /// encoder after this returns). Returns [`Verdict::DropMetric`] if
    /// step 5 overflowed and the config says to drop the whole metric
    /// rather than just the offending dimension.
    pub fn apply(&self, tags: &mut Vec<(String, String)>) -> Verdict {
        for (key, value) in &self.config.merge_default_dimensions {
            if !tags.iter().any(|(k, _)| k == key) {
                tags.push((key.clone(), value.clone()));
            }
        }

        // Step 1: deny-list.
        tags.retain(|(k, _)| !self.is_denied(k));

        // Step 2: allow-list keep-only (no-op when the allow-list is empty).
        tags.retain(|(k, _)| self.is_allow_listed(k));

        // Step 3: drop empty/whitespace-only values.
        if self.config.drop_empty_dimensions {
            tags.retain(|(_, v)| !v.trim().is_empty());
        }

        // Step 4: truncate to the configured max length.
        if self.config.max_dimension_value_length > 0 {
            for (_, value) in tags.iter_mut() {
                if value.len() > self.config.max_dimension_value_length {
                    value.truncate(self.config.max_dimension_value_length);
                }
            }
        }

        // Step 5: per-key unique-value cap.
        let mut overflowing_key: Option<String> = None;
        {
            let mut inner = self.inner.lock().expect("cardinality guard mutex poisoned");
            for (key, value) in tags.iter() {
                if self.config.max_unique_values_per_key == 0 {
                    continue;
                }
                let values = inner.seen.entry(key.clone()).or_default();
                if values.contains(value.as_str()) {
                    continue;
                }
                if values.len() >= self.config.max_unique_values_per_key {
                    overflowing_key = Some(key.clone());
                    break;
                }
                values.insert(value.clone());
            }
        }

        if let Some(key) = overflowing_key {
            if self.config.drop_only_overflowing_key {
                tracing::warn!(tag_key = %key, "tag value cardinality cap reached, dropping dimension");
                tags.retain(|(k, _)| k != &key);
            } else {
                tracing::warn!(tag_key = %key, "tag value cardinality cap reached, dropping metric");
                self.overflow_metrics_dropped.fetch_add(1, Ordering::Relaxed);
                return Verdict::DropMetric;
            }
        }

        Verdict::Keep
    }

    /// Number of distinct values currently tracked for `key`.
    pub fn unique_count(&self, key: &str) -> usize {
        self.inner
            .lock()
            .expect("cardinality guard mutex poisoned")
            .seen
            .get(key)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Count of metrics dropped entirely by step 5's overflow handling.
    pub fn overflow_metrics_dropped(&self) -> u64 {
        self.overflow_metrics_dropped.load(Ordering::Relaxed)
    }
}
