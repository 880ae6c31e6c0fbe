//! Instrument factory
//!
//! Where `metrics-core::MetricSnapshot` is a one-shot immutable value, an
//! instrument is a long-lived handle an application holds and updates
//! repeatedly (`counter.increment(1)`, `gauge.set(42.0)`), submitting a
//! fresh snapshot to the buffer on every update. Handles are cached by
//! name + sorted tags in a `DashMap` so repeated calls for the same
//! series reuse one atomic accumulator rather than racing independent
//! ones, following `crates/telemetry/src/otel.rs`'s `MetricsProvider`
//! per-metric-type caches.

use dashmap::DashMap;
use metrics_core::{Buffer, CardinalityGuard, MetricSnapshot, MetricValue, Tags};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn cache_key(name: &str, tags: &Tags) -> String {
    let mut key = name.to_string();
    for (k, v) in tags.sorted() {
        key.push('\u{1}');
        key.push_str(k);
        key.push('=');
        key.push_str(v);
    }
    key
}

/// A cumulative counter. `increment` adds `delta` to the running total
/// and submits the new total as a snapshot.
pub struct CounterHandle {
    name: String,
    tags: Tags,
    total: Arc<AtomicI64>,
    buffer: Arc<Buffer>,
}

impl CounterHandle {
    pub fn increment(&self, delta: i64) {
        let total = self.total.fetch_add(delta, Ordering::Relaxed) + delta;
        if let Ok(snapshot) = MetricSnapshot::new(
            cache_key(&self.name, &self.tags),
            self.name.clone(),
            "",
            "",
            self.tags.clone(),
            MetricValue::Counter { value: total },
            chrono::Utc::now(),
        ) {
            self.buffer.submit(snapshot);
        }
    }

    pub fn value(&self) -> i64 {
        self.total.load(Ordering::Relaxed)
    }
}

/// An instantaneous gauge. `set` replaces the current value and submits
/// it as a snapshot.
pub struct GaugeHandle {
    name: String,
    tags: Tags,
    bits: Arc<AtomicU64>,
    buffer: Arc<Buffer>,
}

impl GaugeHandle {
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
        if let Ok(snapshot) = MetricSnapshot::new(
            cache_key(&self.name, &self.tags),
            self.name.clone(),
            "",
            "",
            self.tags.clone(),
            MetricValue::Gauge { value },
            chrono::Utc::now(),
        ) {
            self.buffer.submit(snapshot);
        }
    }

    pub fn value(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// CAS loop on an `f64`'s raw bits, the spec's prescribed approach for a
/// thread-safe running sum/min/max without locking.
fn cas_update_f64(bits: &AtomicU64, mut f: impl FnMut(f64) -> f64) {
    let mut current = bits.load(Ordering::Relaxed);
    loop {
        let new = f(f64::from_bits(current)).to_bits();
        match bits.compare_exchange_weak(current, new, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => current = actual,
        }
    }
}

/// Shared cumulative-bucket state behind a [`HistogramHandle`]/[`TimerHandle`].
/// Buckets are non-cumulative counters; cumulative `counts` are derived on
/// every render, matching [`metrics_core::BucketHistogram`]'s contract.
struct HistogramState {
    bounds: Vec<f64>,
    bucket_counts: Vec<AtomicU64>,
    count: AtomicU64,
    sum_bits: AtomicU64,
    min_bits: AtomicU64,
    max_bits: AtomicU64,
}

impl HistogramState {
    fn new(bounds: Vec<f64>) -> Self {
        let bucket_counts = (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds,
            bucket_counts,
            count: AtomicU64::new(0),
            sum_bits: AtomicU64::new(0f64.to_bits()),
            min_bits: AtomicU64::new(f64::INFINITY.to_bits()),
            max_bits: AtomicU64::new(f64::NEG_INFINITY.to_bits()),
        }
    }

    fn observe(&self, value: f64) {
        let bucket = self.bounds.iter().position(|&b| value <= b).unwrap_or(self.bounds.len());
        self.bucket_counts[bucket].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        cas_update_f64(&self.sum_bits, |s| s + value);
        cas_update_f64(&self.min_bits, |m| m.min(value));
        cas_update_f64(&self.max_bits, |m| m.max(value));
    }

    fn to_value(&self) -> MetricValue {
        let mut counts = Vec::with_capacity(self.bucket_counts.len());
        let mut running = 0u64;
        for c in &self.bucket_counts {
            running += c.load(Ordering::Relaxed);
            counts.push(running);
        }
        MetricValue::BucketHistogram(metrics_core::BucketHistogram {
            count: self.count.load(Ordering::Relaxed),
            min: f64::from_bits(self.min_bits.load(Ordering::Relaxed)),
            max: f64::from_bits(self.max_bits.load(Ordering::Relaxed)),
            sum: f64::from_bits(self.sum_bits.load(Ordering::Relaxed)),
            bounds: self.bounds.clone(),
            counts,
        })
    }
}

/// A fixed-bound cumulative histogram. `observe` records one sample and
/// submits the updated histogram as a snapshot.
pub struct HistogramHandle {
    name: String,
    tags: Tags,
    state: Arc<HistogramState>,
    buffer: Arc<Buffer>,
}

impl HistogramHandle {
    pub fn observe(&self, value: f64) {
        self.state.observe(value);
        self.submit();
    }

    pub fn count(&self) -> u64 {
        self.state.count.load(Ordering::Relaxed)
    }

    fn submit(&self) {
        if let Ok(snapshot) = MetricSnapshot::new(
            cache_key(&self.name, &self.tags),
            self.name.clone(),
            "",
            "",
            self.tags.clone(),
            self.state.to_value(),
            chrono::Utc::now(),
        ) {
            self.buffer.submit(snapshot);
        }
    }
}

/// A timer: a thin wrapper over a histogram of elapsed seconds. `start`
/// returns a guard that records on drop, matching the "measure a scope"
/// idiom of the pack's own `Timer` helpers.
pub struct TimerHandle {
    histogram: HistogramHandle,
}

impl TimerHandle {
    pub fn record(&self, elapsed: Duration) {
        self.histogram.observe(elapsed.as_secs_f64());
    }
}

/// Drop-to-record scope guard returned by [`TimerHandle::start`].
pub struct TimerGuard<'a> {
    timer: &'a TimerHandle,
    started: Instant,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.timer.record(self.started.elapsed());
    }
}

impl TimerHandle {
    pub fn start(&self) -> TimerGuard<'_> {
        TimerGuard { timer: self, started: Instant::now() }
    }
}

/// Bounded-reservoir state behind a [`SummaryHandle`]: keeps the most
/// recent `capacity` observations and recomputes quantiles from the
/// current window on every call, the same recompute-from-samples approach
/// `HttpRequestCollector` uses for its per-poll histogram.
struct SummaryState {
    window: Mutex<VecDeque<f64>>,
    capacity: usize,
    quantiles: Vec<f64>,
}

fn quantile_of(sorted: &[f64], q: f64) -> f64 {
    let idx = (((sorted.len() - 1) as f64) * q).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

impl SummaryState {
    fn new(quantiles: Vec<f64>) -> Self {
        Self { window: Mutex::new(VecDeque::new()), capacity: 1000, quantiles }
    }

    fn observe(&self, value: f64) {
        let mut window = self.window.lock().expect("summary window mutex poisoned");
        window.push_back(value);
        if window.len() > self.capacity {
            window.pop_front();
        }
    }

    fn to_value(&self) -> MetricValue {
        let window = self.window.lock().expect("summary window mutex poisoned");
        if window.is_empty() {
            return MetricValue::Summary(metrics_core::Summary {
                count: 0,
                min: 0.0,
                max: 0.0,
                quantiles: Vec::new(),
            });
        }
        let mut sorted: Vec<f64> = window.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let min = sorted[0];
        let max = sorted[sorted.len() - 1];
        let quantiles = self.quantiles.iter().map(|&q| (q, quantile_of(&sorted, q))).collect();
        MetricValue::Summary(metrics_core::Summary { count: sorted.len() as u64, min, max, quantiles })
    }
}

/// A quantile summary over a bounded recent-observation window.
pub struct SummaryHandle {
    name: String,
    tags: Tags,
    state: Arc<SummaryState>,
    buffer: Arc<Buffer>,
}

impl SummaryHandle {
    pub fn observe(&self, value: f64) {
        self.state.observe(value);
        if let Ok(snapshot) = MetricSnapshot::new(
            cache_key(&self.name, &self.tags),
            self.name.clone(),
            "",
            "",
            self.tags.clone(),
            self.state.to_value(),
            chrono::Utc::now(),
        ) {
            self.buffer.submit(snapshot);
        }
    }
}

/// Shared state behind a [`MultiGaugeHandle`]: a named set of gauge values
/// rendered together as one [`MetricValue::MultiSample`], grounded on
/// `HttpRequestCollector`'s status-class breakdown.
struct MultiGaugeState {
    values: Mutex<BTreeMap<String, f64>>,
}

impl MultiGaugeState {
    fn new() -> Self {
        Self { values: Mutex::new(BTreeMap::new()) }
    }

    fn set(&self, item_name: String, value: f64) {
        self.values.lock().expect("multi-gauge mutex poisoned").insert(item_name, value);
    }

    fn to_value(&self) -> MetricValue {
        let values = self.values.lock().expect("multi-gauge mutex poisoned");
        let items = values
            .iter()
            .map(|(name, value)| metrics_core::MultiSampleItem {
                name: name.clone(),
                tags: Tags::new(),
                value: metrics_core::SimpleValue::Gauge(*value),
            })
            .collect();
        MetricValue::MultiSample(items)
    }
}

/// A named group of gauges sharing one series id, for values like
/// per-queue depth that are naturally reported as a set rather than one
/// scalar.
pub struct MultiGaugeHandle {
    name: String,
    tags: Tags,
    state: Arc<MultiGaugeState>,
    buffer: Arc<Buffer>,
}

impl MultiGaugeHandle {
    pub fn set(&self, item_name: impl Into<String>, value: f64) {
        self.state.set(item_name.into(), value);
        if let Ok(snapshot) = MetricSnapshot::new(
            cache_key(&self.name, &self.tags),
            self.name.clone(),
            "",
            "",
            self.tags.clone(),
            self.state.to_value(),
            chrono::Utc::now(),
        ) {
            self.buffer.submit(snapshot);
        }
    }
}

struct CounterEntry {
    name: String,
    tags: Tags,
    total: Arc<AtomicI64>,
}

struct GaugeEntry {
    name: String,
    tags: Tags,
    bits: Arc<AtomicU64>,
}

struct HistogramEntry {
    name: String,
    tags: Tags,
    state: Arc<HistogramState>,
}

struct SummaryEntry {
    name: String,
    tags: Tags,
    state: Arc<SummaryState>,
}

struct MultiGaugeEntry {
    name: String,
    tags: Tags,
    state: Arc<MultiGaugeState>,
}

/// Creates and caches counter/gauge handles, applying the cardinality
/// guard to tags before any snapshot reaches the buffer.
///
/// Besides handing out handles, the factory is the source of truth a
/// pull-based scrape needs: [`Factory::snapshot_all`] reports the current
/// value of every series registered so far, independent of whatever has
/// or hasn't been drained from the push buffer.
pub struct Factory {
    buffer: Arc<Buffer>,
    cardinality: Arc<CardinalityGuard>,
    counters: DashMap<String, CounterEntry>,
    gauges: DashMap<String, GaugeEntry>,
    histograms: DashMap<String, HistogramEntry>,
    summaries: DashMap<String, SummaryEntry>,
    multi_gauges: DashMap<String, MultiGaugeEntry>,
}

/// Default histogram bucket bounds handed to [`Factory::timer`] callers
/// that don't need backend-specific latency bounds of their own.
pub const DEFAULT_TIMER_BOUNDS_SECONDS: &[f64] =
    &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Default summary quantiles (`p50`, `p90`, `p99`), matching the
/// Distribution shape's fixed quantile set elsewhere in the value model.
pub const DEFAULT_SUMMARY_QUANTILES: &[f64] = &[0.5, 0.9, 0.99];

impl Factory {
    pub fn new(buffer: Arc<Buffer>, cardinality: Arc<CardinalityGuard>) -> Self {
        Self {
            buffer,
            cardinality,
            counters: DashMap::new(),
            gauges: DashMap::new(),
            histograms: DashMap::new(),
            summaries: DashMap::new(),
            multi_gauges: DashMap::new(),
        }
    }

    fn guarded_tags(&self, tags: Tags) -> Tags {
        let mut pairs = tags.0;
        self.cardinality.apply(&mut pairs);
        Tags::from_pairs(pairs)
    }

    pub fn counter(&self, name: impl Into<String>, tags: Tags) -> CounterHandle {
        let name = name.into();
        let tags = self.guarded_tags(tags);
        let key = cache_key(&name, &tags);
        let total = self
            .counters
            .entry(key)
            .or_insert_with(|| CounterEntry {
                name: name.clone(),
                tags: tags.clone(),
                total: Arc::new(AtomicI64::new(0)),
            })
            .total
            .clone();
        CounterHandle { name, tags, total, buffer: self.buffer.clone() }
    }

    pub fn gauge(&self, name: impl Into<String>, tags: Tags) -> GaugeHandle {
        let name = name.into();
        let tags = self.guarded_tags(tags);
        let key = cache_key(&name, &tags);
        let bits = self
            .gauges
            .entry(key)
            .or_insert_with(|| GaugeEntry {
                name: name.clone(),
                tags: tags.clone(),
                bits: Arc::new(AtomicU64::new(0)),
            })
            .bits
            .clone();
        GaugeHandle { name, tags, bits, buffer: self.buffer.clone() }
    }

    /// `bounds` only takes effect the first time this name+tags pair is
    /// looked up; later calls reuse the cached handle's original bounds,
    /// the same cache-wins-on-reuse behavior as `counter`/`gauge`.
    pub fn histogram(&self, name: impl Into<String>, tags: Tags, bounds: Vec<f64>) -> HistogramHandle {
        let name = name.into();
        let tags = self.guarded_tags(tags);
        let key = cache_key(&name, &tags);
        let state = self
            .histograms
            .entry(key)
            .or_insert_with(|| HistogramEntry {
                name: name.clone(),
                tags: tags.clone(),
                state: Arc::new(HistogramState::new(bounds)),
            })
            .state
            .clone();
        HistogramHandle { name, tags, state, buffer: self.buffer.clone() }
    }

    /// A timer is a histogram of elapsed seconds; `bounds` follows the
    /// same first-lookup-wins rule as [`Factory::histogram`].
    pub fn timer(&self, name: impl Into<String>, tags: Tags, bounds: Vec<f64>) -> TimerHandle {
        TimerHandle { histogram: self.histogram(name, tags, bounds) }
    }

    pub fn summary(&self, name: impl Into<String>, tags: Tags, quantiles: Vec<f64>) -> SummaryHandle {
        let name = name.into();
        let tags = self.guarded_tags(tags);
        let key = cache_key(&name, &tags);
        let state = self
            .summaries
            .entry(key)
            .or_insert_with(|| SummaryEntry {
                name: name.clone(),
                tags: tags.clone(),
                state: Arc::new(SummaryState::new(quantiles)),
            })
            .state
            .clone();
        SummaryHandle { name, tags, state, buffer: self.buffer.clone() }
    }

    pub fn multi_gauge(&self, name: impl Into<String>, tags: Tags) -> MultiGaugeHandle {
        let name = name.into();
        let tags = self.guarded_tags(tags);
        let key = cache_key(&name, &tags);
        let state = self
            .multi_gauges
            .entry(key)
            .or_insert_with(|| MultiGaugeEntry {
                name: name.clone(),
                tags: tags.clone(),
                state: Arc::new(MultiGaugeState::new()),
            })
            .state
            .clone();
        MultiGaugeHandle { name, tags, state, buffer: self.buffer.clone() }
    }

    /// Renders the current value of every registered counter and gauge as
    /// a snapshot, for a pull-based scrape. Unlike the push buffer, this
    /// never drains anything — the same series can be rendered on every
    /// scrape.
    pub fn snapshot_all(&self) -> Vec<MetricSnapshot> {
        let now = chrono::Utc::now();
        let mut out = Vec::with_capacity(
            self.counters.len()
                + self.gauges.len()
                + self.histograms.len()
                + self.summaries.len()
                + self.multi_gauges.len(),
        );
        for entry in self.counters.iter() {
            let e = entry.value();
            if let Ok(snapshot) = MetricSnapshot::new(
                cache_key(&e.name, &e.tags),
                e.name.clone(),
                "",
                "",
                e.tags.clone(),
                MetricValue::Counter { value: e.total.load(Ordering::Relaxed) },
                now,
            ) {
                out.push(snapshot);
            }
        }
        for entry in self.gauges.iter() {
            let e = entry.value();
            if let Ok(snapshot) = MetricSnapshot::new(
                cache_key(&e.name, &e.tags),
                e.name.clone(),
                "",
                "",
                e.tags.clone(),
                MetricValue::Gauge { value: f64::from_bits(e.bits.load(Ordering::Relaxed)) },
                now,
            ) {
                out.push(snapshot);
            }
        }
        for entry in self.histograms.iter() {
            let e = entry.value();
            if let Ok(snapshot) =
                MetricSnapshot::new(cache_key(&e.name, &e.tags), e.name.clone(), "", "", e.tags.clone(), e.state.to_value(), now)
            {
                out.push(snapshot);
            }
        }
        for entry in self.summaries.iter() {
            let e = entry.value();
            if let Ok(snapshot) =
                MetricSnapshot::new(cache_key(&e.name, &e.tags), e.name.clone(), "", "", e.tags.clone(), e.state.to_value(), now)
            {
                out.push(snapshot);
            }
        }
        for entry in self.multi_gauges.iter() {
            let e = entry.value();
            if let Ok(snapshot) =
                MetricSnapshot::new(cache_key(&e.name, &e.tags), e.name.clone(), "", "", e.tags.clone(), e.state.to_value(), now)
            {
                out.push(snapshot);
            }
        }
        out
    }
}
