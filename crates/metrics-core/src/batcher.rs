//! Batching
//!
//! Groups drained snapshots into batches bounded by item count and byte
//! size. Pure function over a caller-supplied size estimator rather than a
//! stateful component, so callers can batch with whichever per-item cost
//! function their encoder cares about (wire-format size, not the buffer's
//! internal estimate).

use crate::value::MetricSnapshot;

/// Batch size limits. A zero value means "no limit" for that dimension.
#[derive(Debug, Clone, Copy)]
pub struct BatchLimits {
    pub max_items: usize,
    pub max_bytes: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self { max_items: 500, max_bytes: 1_000_000 }
    }
}

/// Splits `items` into batches honoring `limits`.
///
/// Tie-break rule: a batch always contains at least one item, even if
/// that single item's estimated size already exceeds `max_bytes` — an
/// oversized item is never split or dropped here, it is forwarded alone
/// and left to the encoder/transport to reject or accept. A new item is
/// folded into the current batch only if doing so keeps both the item
/// count and the byte total within their caps.
pub fn batch<F>(items: Vec<MetricSnapshot>, limits: BatchLimits, size_of: F) -> Vec<Vec<MetricSnapshot>>
where
    F: Fn(&MetricSnapshot) -> usize,
{
    if items.is_empty() {
        return Vec::new();
    }
    let max_items = if limits.max_items == 0 { usize::MAX } else { limits.max_items };
    let max_bytes = if limits.max_bytes == 0 { usize::MAX } else { limits.max_bytes };

    let mut batches = Vec::new();
    let mut current: Vec<MetricSnapshot> = Vec::new();
    let mut current_bytes: usize = 0;

    for item in items {
        let item_size = size_of(&item);
        let would_exceed_items = current.len() + 1 > max_items;
        let would_exceed_bytes = !current.is_empty() && current_bytes + item_size > max_bytes;

        if !current.is_empty() && (would_exceed_items || would_exceed_bytes) {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }

        current_bytes += item_size;
        current.push(item);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
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

    #[test]
    fn splits_on_max_items() {
        let items = vec![snapshot("a"), snapshot("b"), snapshot("c")];
        let limits = BatchLimits { max_items: 2, max_bytes: 0 };
        let batches = batch(items, limits, |_| 1);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 1);
    }

    #[test]
    fn splits_on_max_bytes() {
        let items = vec![snapshot("a"), snapshot("b"), snapshot("c")];
        let limits = BatchLimits { max_items: 0, max_bytes: 20 };
        let batches = batch(items, limits, |_| 10);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 1);
    }

    #[test]
    fn oversized_single_item_forms_its_own_batch() {
        let items = vec![snapshot("a"), snapshot("huge"), snapshot("b")];
        let limits = BatchLimits { max_items: 0, max_bytes: 10 };
        let batches = batch(items, limits, |s| if s.name == "huge" { 1_000 } else { 1 });
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[1][0].name, "huge");
    }

    #[test]
    fn empty_input_yields_no_batches() {
        let batches = batch(Vec::new(), BatchLimits::default(), |_| 1);
        assert!(batches.is_empty());
    }
}
