//! Flusher
//!
//! The periodic + opportunistic drain task tying buffer -> batch ->
//! encode -> retry -> transport together. Grounded directly on
//! `76b2ebcd_DataDog-libdatadog`'s `StatsExporter::run`: a `tokio::select!`
//! between a `CancellationToken` and an interval tick, flushing once more
//! on cancellation before returning so nothing buffered at shutdown is
//! silently dropped.

use metrics_collectors::CollectorRegistry;
use metrics_core::{batch, BatchLimits, Buffer, CardinalityGuard, MetricSnapshot, Verdict};
use metrics_encoders::Export;
use metrics_retry::RetryExecutor;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct FlusherConfig {
    pub interval: Duration,
    pub batch_limits: BatchLimits,
}

impl Default for FlusherConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(10), batch_limits: BatchLimits::default() }
    }
}

/// Per-snapshot byte estimator used for batching before encode, distinct
/// from the buffer's own internal size accounting.
fn wire_size_estimate(snapshot: &MetricSnapshot) -> usize {
    128 + snapshot.name.len() + snapshot.tags.len() * 32
}

pub struct Flusher {
    buffer: Arc<Buffer>,
    collectors: Arc<CollectorRegistry>,
    cardinality: Arc<CardinalityGuard>,
    exporter: Arc<dyn Export>,
    retry: Arc<RetryExecutor>,
    config: FlusherConfig,
    cancellation_token: CancellationToken,
}

impl Flusher {
    pub fn new(
        buffer: Arc<Buffer>,
        collectors: Arc<CollectorRegistry>,
        cardinality: Arc<CardinalityGuard>,
        exporter: Arc<dyn Export>,
        retry: Arc<RetryExecutor>,
        config: FlusherConfig,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { buffer, collectors, cardinality, exporter, retry, config, cancellation_token }
    }

    /// Runs the flush loop until cancelled, then performs one final
    /// flush to drain anything still buffered before returning.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancellation_token.cancelled() => {
                    tracing::info!("flusher shutting down, performing final flush");
                    self.flush_once().await;
                    break;
                }
                _ = ticker.tick() => {
                    self.flush_once().await;
                }
            }
        }
    }

    /// Drains the buffer and any collectors, batches, and forwards every
    /// batch through the retry engine. Exporter failures are logged, not
    /// propagated — a flush is best-effort and must never take down the
    /// task driving it.
    pub async fn flush_once(&self) {
        let mut snapshots = self.buffer.drain(None);
        snapshots.extend(self.collectors.collect_all().await);
        if snapshots.is_empty() {
            return;
        }

        snapshots.retain_mut(|snapshot| {
            let mut pairs = std::mem::take(&mut snapshot.tags.0);
            let verdict = self.cardinality.apply(&mut pairs);
            snapshot.tags.0 = pairs;
            matches!(verdict, Verdict::Keep)
        });
        if snapshots.is_empty() {
            return;
        }

        let batches = batch(snapshots, self.config.batch_limits, wire_size_estimate);
        for batch_items in batches {
            let exporter = self.exporter.clone();
            let result = self
                .retry
                .execute(|| {
                    let exporter = exporter.clone();
                    let items = batch_items.clone();
                    async move { exporter.export(&items).await }
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, backend = self.exporter.name(), "export failed after retries, dropping batch");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use metrics_core::{CardinalityGuardConfig, MetricValue, Tags};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExporter(Arc<AtomicUsize>);

    #[async_trait]
    impl Export for CountingExporter {
        async fn export(&self, _batch: &[MetricSnapshot]) -> metrics_encoders::Result<()> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn guard() -> Arc<CardinalityGuard> {
        Arc::new(CardinalityGuard::new(CardinalityGuardConfig::default()).unwrap())
    }

    fn snapshot() -> MetricSnapshot {
        MetricSnapshot::new(
            "id", "m", "", "", Tags::new(), MetricValue::Gauge { value: 1.0 }, chrono::Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn flush_once_drains_buffer_and_exports() {
        let buffer = Arc::new(Buffer::new(metrics_core::BufferLimits { max_items: 1000, max_size_bytes: 10_000 }));
        buffer.submit(snapshot());
        let calls = Arc::new(AtomicUsize::new(0));
        let flusher = Flusher::new(
            buffer.clone(),
            Arc::new(CollectorRegistry::new()),
            guard(),
            Arc::new(CountingExporter(calls.clone())),
            Arc::new(RetryExecutor::default()),
            FlusherConfig::default(),
            CancellationToken::new(),
        );
        flusher.flush_once().await;
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn flush_once_on_empty_buffer_does_not_export() {
        let buffer = Arc::new(Buffer::new(metrics_core::BufferLimits { max_items: 1000, max_size_bytes: 10_000 }));
        let calls = Arc::new(AtomicUsize::new(0));
        let flusher = Flusher::new(
            buffer,
            Arc::new(CollectorRegistry::new()),
            guard(),
            Arc::new(CountingExporter(calls.clone())),
            Arc::new(RetryExecutor::default()),
            FlusherConfig::default(),
            CancellationToken::new(),
        );
        flusher.flush_once().await;
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn run_flushes_once_more_on_cancellation() {
        let buffer = Arc::new(Buffer::new(metrics_core::BufferLimits { max_items: 1000, max_size_bytes: 10_000 }));
        let calls = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let flusher = Arc::new(Flusher::new(
            buffer.clone(),
            Arc::new(CollectorRegistry::new()),
            guard(),
            Arc::new(CountingExporter(calls.clone())),
            Arc::new(RetryExecutor::default()),
            FlusherConfig { interval: Duration::from_secs(3600), batch_limits: BatchLimits::default() },
            token.clone(),
        ));
        buffer.submit(snapshot());
        let handle = tokio::spawn(flusher.run());
        token.cancel();
        handle.await.unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
