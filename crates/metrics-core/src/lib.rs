//! Metric value model, producer buffer, batcher and cardinality guard.
//!
//! This crate has no async runtime dependency by design: the buffer's
//! submit path is synchronous so instrumentation call sites never await.
//! The flusher that drives buffer -> batch -> encode -> retry lives in
//! `metrics-export`.

pub mod batcher;
pub mod buffer;
pub mod cardinality;
pub mod error;
pub mod value;

pub use batcher::{batch, BatchLimits};
pub use buffer::{Buffer, BufferLimits, BufferStats};
pub use cardinality::{CardinalityGuard, CardinalityGuardConfig, Verdict};
pub use error::{Error, Result};
pub use value::{
    BucketHistogram, Distribution, MetricKind, MetricSnapshot, MetricValue, MultiSampleItem,
    SimpleValue, Summary, Tags,
};
