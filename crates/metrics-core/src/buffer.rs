//! Bounded, lossy producer buffer
//!
//! Generalizes `honeylink_telemetry::storage::MetricBuffer`: a ring that
//! drops the oldest entries on overflow rather than blocking or
//! rejecting. `submit` is synchronous and must never await — it sits on
//! the hot instrumentation path — so the buffer is guarded by
//! `std::sync::Mutex` rather than `tokio::sync::Mutex`.

use crate::value::MetricSnapshot;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Rough per-snapshot byte cost used for the byte-bound accounting.
/// Mirrors `telemetry::storage::estimate_metric_size`: a fixed base cost
/// plus the length of the variable-size strings and tag pairs.
pub fn estimate_snapshot_size(snapshot: &MetricSnapshot) -> usize {
    const BASE: usize = 64;
    let tags_size: usize =
        snapshot.tags.iter().map(|(k, v)| k.len() + v.len() + 2).sum();
    BASE + snapshot.name.len() + snapshot.unit.len() + snapshot.description.len() + tags_size
}

/// Caps the buffer is bounded by. Both dimensions are enforced
/// independently: a submission evicts the oldest entries until it fits
/// both the item-count and the byte-size budget. `max_items` must be at
/// least 1000 to satisfy the minimum capacity the pipeline guarantees
/// collectors ("capacity >= max(1000, configured)") — that floor is
/// enforced by `metrics_config::BufferOptions::validate`, not here, so a
/// test harness can still exercise a deliberately tiny buffer.
#[derive(Debug, Clone, Copy)]
pub struct BufferLimits {
    pub max_items: usize,
    pub max_size_bytes: u64,
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self { max_items: 1000, max_size_bytes: 10 * 1024 * 1024 }
    }
}

/// Snapshot of the buffer's counters, exposed for self-metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferStats {
    pub len: usize,
    pub current_size_bytes: u64,
    pub total_dropped: u64,
    pub total_submitted: u64,
}

struct Inner {
    items: VecDeque<MetricSnapshot>,
    current_size_bytes: u64,
}

/// A bounded, drop-oldest buffer sitting between collectors and the
/// flusher, bounded by both item count and byte size.
pub struct Buffer {
    inner: Mutex<Inner>,
    limits: BufferLimits,
    total_dropped: AtomicU64,
    total_submitted: AtomicU64,
}

impl Buffer {
    pub fn new(limits: BufferLimits) -> Self {
        Self {
            inner: Mutex::new(Inner { items: VecDeque::new(), current_size_bytes: 0 }),
            limits,
            total_dropped: AtomicU64::new(0),
            total_submitted: AtomicU64::new(0),
        }
    }

    /// Submits a snapshot, dropping the oldest entries until it fits.
    /// Never blocks on I/O and never awaits; safe to call from a hot path.
    pub fn submit(&self, snapshot: MetricSnapshot) {
        let size = estimate_snapshot_size(&snapshot) as u64;
        self.total_submitted.fetch_add(1, Ordering::Relaxed);

        // A single snapshot larger than the whole buffer is dropped outright
        // rather than evicting everything else to make room for it.
        if size > self.limits.max_size_bytes || self.limits.max_items == 0 {
            self.total_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                size_bytes = size,
                max_size_bytes = self.limits.max_size_bytes,
                "dropping oversized metric snapshot"
            );
            return;
        }

        let mut inner = self.inner.lock().expect("buffer mutex poisoned");
        while inner.current_size_bytes + size > self.limits.max_size_bytes
            || inner.items.len() + 1 > self.limits.max_items
        {
            match inner.items.pop_front() {
                Some(evicted) => {
                    inner.current_size_bytes -= estimate_snapshot_size(&evicted) as u64;
                    self.total_dropped.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
        inner.current_size_bytes += size;
        inner.items.push_back(snapshot);
    }

    /// Drains up to `max_items` snapshots in FIFO order, or all of them if
    /// `max_items` is `None`.
    pub fn drain(&self, max_items: Option<usize>) -> Vec<MetricSnapshot> {
        let mut inner = self.inner.lock().expect("buffer mutex poisoned");
        let take = max_items.unwrap_or(inner.items.len()).min(inner.items.len());
        let mut out = Vec::with_capacity(take);
        for _ in 0..take {
            if let Some(item) = inner.items.pop_front() {
                inner.current_size_bytes -= estimate_snapshot_size(&item) as u64;
                out.push(item);
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().expect("buffer mutex poisoned").items.is_empty()
    }

    pub fn stats(&self) -> BufferStats {
        let inner = self.inner.lock().expect("buffer mutex poisoned");
        BufferStats {
            len: inner.items.len(),
            current_size_bytes: inner.current_size_bytes,
            total_dropped: self.total_dropped.load(Ordering::Relaxed),
            total_submitted: self.total_submitted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{MetricValue, Tags};
    use chrono::Utc;

    fn snapshot(name: &str) -> MetricSnapshot {
        MetricSnapshot::new(
            "id",
            name,
            "",
            "",
            Tags::new(),
            MetricValue::Gauge { value: 1.0 },
            Utc::now(),
        )
        .unwrap()
    }

    fn limits(max_items: usize, max_size_bytes: u64) -> BufferLimits {
        BufferLimits { max_items, max_size_bytes }
    }

    #[test]
    fn submit_and_drain_preserves_fifo_order() {
        let buf = Buffer::new(limits(1000, 10_000));
        buf.submit(snapshot("a"));
        buf.submit(snapshot("b"));
        let drained = buf.drain(None);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].name, "a");
        assert_eq!(drained[1].name, "b");
    }

    #[test]
    fn byte_overflow_drops_oldest_first() {
        let size = estimate_snapshot_size(&snapshot("x")) as u64;
        let buf = Buffer::new(limits(1000, size * 2));
        buf.submit(snapshot("a"));
        buf.submit(snapshot("b"));
        buf.submit(snapshot("c"));
        let stats = buf.stats();
        assert_eq!(stats.total_dropped, 1);
        let drained = buf.drain(None);
        assert_eq!(drained.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn oversized_single_snapshot_is_dropped_not_buffered() {
        let buf = Buffer::new(limits(1000, 8));
        buf.submit(snapshot("huge"));
        assert!(buf.is_empty());
        assert_eq!(buf.stats().total_dropped, 1);
    }

    #[test]
    fn drain_with_max_items_leaves_remainder() {
        let buf = Buffer::new(limits(1000, 100_000));
        buf.submit(snapshot("a"));
        buf.submit(snapshot("b"));
        buf.submit(snapshot("c"));
        let first = buf.drain(Some(2));
        assert_eq!(first.len(), 2);
        assert_eq!(buf.stats().len, 1);
    }

    /// Boundary from spec: capacity 1000 receives 1500 submissions in
    /// order, consumer reads exactly 1000 items, overflow counter = 500.
    #[test]
    fn item_count_cap_of_1000_drops_exactly_the_excess() {
        let buf = Buffer::new(limits(1000, 10 * 1024 * 1024));
        for i in 0..1500 {
            buf.submit(snapshot(&format!("m{i}")));
        }
        let stats = buf.stats();
        assert_eq!(stats.len, 1000);
        assert_eq!(stats.total_dropped, 500);
        let drained = buf.drain(None);
        assert_eq!(drained.len(), 1000);
        assert_eq!(drained[0].name, "m500");
    }

    /// Boundary from spec: capacity 1 item, two submissions, consumer
    /// paused; after the second submit only the second item remains and
    /// the overflow counter reads 1.
    #[test]
    fn item_count_cap_of_one_keeps_only_the_latest() {
        let buf = Buffer::new(limits(1, 10 * 1024 * 1024));
        buf.submit(snapshot("first"));
        buf.submit(snapshot("second"));
        assert_eq!(buf.stats().len, 1);
        assert_eq!(buf.stats().total_dropped, 1);
        let drained = buf.drain(None);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].name, "second");
    }
}
