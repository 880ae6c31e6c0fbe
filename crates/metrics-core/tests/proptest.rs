//! Property-based tests for the batcher and cardinality guard

use chrono::Utc;
use metrics_core::{batch, BatchLimits, CardinalityGuard, CardinalityGuardConfig, MetricSnapshot, MetricValue, Tags};
use proptest::prelude::*;

fn snapshot(name: &str) -> MetricSnapshot {
    MetricSnapshot::new("id", name, "", "", Tags::new(), MetricValue::Gauge { value: 1.0 }, Utc::now()).unwrap()
}

// Property: every batch stays within max_items
proptest! {
    #[test]
    fn prop_batches_respect_max_items(count in 0usize..200, max_items in 1usize..50) {
        let items: Vec<_> = (0..count).map(|i| snapshot(&format!("m{i}"))).collect();
        let limits = BatchLimits { max_items, max_bytes: 0 };
        let batches = batch(items, limits, |_| 1);
        for b in &batches {
            prop_assert!(b.len() <= max_items);
        }
    }
}

// Property: batching never drops or duplicates items
proptest! {
    #[test]
    fn prop_batching_preserves_total_count(count in 0usize..200, max_items in 1usize..50, max_bytes in 1usize..500) {
        let items: Vec<_> = (0..count).map(|i| snapshot(&format!("m{i}"))).collect();
        let limits = BatchLimits { max_items, max_bytes };
        let batches = batch(items, limits, |_| 1);
        let total: usize = batches.iter().map(|b| b.len()).sum();
        prop_assert_eq!(total, count);
    }
}

// Property: an oversized single item never blocks forward progress
proptest! {
    #[test]
    fn prop_oversized_item_still_forms_a_batch(max_bytes in 1usize..100) {
        let items = vec![snapshot("huge")];
        let limits = BatchLimits { max_items: 0, max_bytes };
        let batches = batch(items, limits, |_| max_bytes * 10);
        prop_assert_eq!(batches.len(), 1);
        prop_assert_eq!(batches[0].len(), 1);
    }
}

// Property: a tag key's unique-value count never exceeds its configured cap
proptest! {
    #[test]
    fn prop_cardinality_never_exceeds_cap(values in prop::collection::vec("[a-z]{1,8}", 0..100), cap in 1usize..20) {
        let guard = CardinalityGuard::new(CardinalityGuardConfig {
            max_unique_values_per_key: cap,
            ..Default::default()
        })
        .unwrap();
        for v in &values {
            let mut tags = vec![("host".to_string(), v.clone())];
            guard.apply(&mut tags);
        }
        prop_assert!(guard.unique_count("host") <= cap);
    }
}

// Property: a non-empty allow-list never lets a non-listed key through
proptest! {
    #[test]
    fn prop_allow_list_admits_only_listed_keys(values in prop::collection::vec("[a-z]{1,8}", 0..50)) {
        let guard = CardinalityGuard::new(CardinalityGuardConfig {
            allow_list: vec!["request_id".to_string()],
            ..Default::default()
        })
        .unwrap();
        for v in &values {
            let mut tags = vec![
                ("request_id".to_string(), v.clone()),
                ("other".to_string(), v.clone()),
            ];
            guard.apply(&mut tags);
            prop_assert!(tags.iter().all(|(k, _)| k == "request_id"));
        }
    }
}
