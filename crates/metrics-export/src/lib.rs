//! Export pipeline facade
//!
//! Ties the rest of the workspace into one thing an application holds:
//! an instrument [`Factory`] to record against, a [`flusher::Flusher`]
//! driving push backends, and a [`Pipeline::scrape_source`] to hand the
//! scrape endpoint a live view of every registered series. Grounded on
//! `crates/telemetry/src/otel.rs`'s `MetricsProvider`, which plays the
//! same "one struct an application holds onto" role for the teacher's own
//! OTel wiring.

pub mod flusher;
pub mod instruments;

pub use flusher::{Flusher, FlusherConfig};
pub use instruments::{
    CounterHandle, Factory, GaugeHandle, HistogramHandle, MultiGaugeHandle, SummaryHandle,
    TimerGuard, TimerHandle,
};

use async_trait::async_trait;
use metrics_collectors::CollectorRegistry;
use metrics_core::{Buffer, BufferLimits, CardinalityGuard, CardinalityGuardConfig, MetricSnapshot};
use metrics_encoders::Export;
use metrics_retry::{RetryExecutor, RetryPolicy};
use metrics_scrape::ScrapeSource;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Bundles the pieces an application needs to wire up: where to get an
/// instrument factory, how to drive a periodic flush, and what to hand
/// the scrape endpoint.
pub struct Pipeline {
    pub factory: Arc<Factory>,
    buffer: Arc<Buffer>,
    flusher: Arc<Flusher>,
    cancellation_token: CancellationToken,
}

impl Pipeline {
    /// `build_collectors` receives the pipeline's own buffer so a
    /// `ProcessSelfCollector` can watch it — the buffer otherwise has no
    /// existence outside this constructor until collectors are wired up.
    pub fn new(
        buffer_limits: BufferLimits,
        cardinality: CardinalityGuardConfig,
        build_collectors: impl FnOnce(&Arc<Buffer>) -> CollectorRegistry,
        exporter: Arc<dyn Export>,
        retry_policy: RetryPolicy,
        flusher_config: FlusherConfig,
    ) -> metrics_core::Result<Self> {
        let buffer = Arc::new(Buffer::new(buffer_limits));
        let cardinality = Arc::new(
            CardinalityGuard::new(cardinality)
                .map_err(|e| metrics_core::Error::Configuration(e.to_string()))?,
        );
        let factory = Arc::new(Factory::new(buffer.clone(), cardinality.clone()));
        let collectors = build_collectors(&buffer);
        let cancellation_token = CancellationToken::new();
        let flusher = Arc::new(Flusher::new(
            buffer.clone(),
            Arc::new(collectors),
            cardinality,
            exporter,
            Arc::new(RetryExecutor::new(retry_policy)),
            flusher_config,
            cancellation_token.clone(),
        ));
        Ok(Self { factory, buffer, flusher, cancellation_token })
    }

    /// Spawns the flush loop on the current Tokio runtime. The returned
    /// `JoinHandle` completes once [`Pipeline::shutdown`] triggers the
    /// flusher's final flush.
    pub fn spawn_flusher(&self) -> tokio::task::JoinHandle<()> {
        let flusher = self.flusher.clone();
        tokio::spawn(flusher.run())
    }

    /// Signals the flush loop to perform one last flush and stop.
    pub fn shutdown(&self) {
        self.cancellation_token.cancel();
    }

    /// Current buffer occupancy/drop counters, for wiring into a
    /// `ProcessSelfCollector` or exposing directly as self-metrics.
    pub fn buffer_stats(&self) -> metrics_core::BufferStats {
        self.buffer.stats()
    }

    /// A `ScrapeSource` reflecting the instrument factory's current state,
    /// for wiring into `metrics_scrape::ScrapeState::new`.
    pub fn scrape_source(&self) -> Arc<dyn ScrapeSource> {
        Arc::new(FactoryScrapeSource { factory: self.factory.clone() })
    }
}

struct FactoryScrapeSource {
    factory: Arc<Factory>,
}

#[async_trait]
impl ScrapeSource for FactoryScrapeSource {
    async fn snapshot(&self) -> Vec<MetricSnapshot> {
        // Every factory-issued instrument (counter, gauge, histogram,
        // summary, multi-gauge) renders from its own live state here, so
        // the same series shows up on every scrape regardless of the push
        // buffer's drain schedule. Collector-produced snapshots are
        // delivered to push backends through the buffer and aren't
        // duplicated here.
        self.factory.snapshot_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_core::Tags;

    struct NoopExporter;

    #[async_trait]
    impl Export for NoopExporter {
        async fn export(&self, _batch: &[MetricSnapshot]) -> metrics_encoders::Result<()> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "noop"
        }
    }

    #[tokio::test]
    async fn scrape_source_reflects_factory_state() {
        let pipeline = Pipeline::new(
            BufferLimits::default(),
            CardinalityGuardConfig::default(),
            |_buffer| CollectorRegistry::new(),
            Arc::new(NoopExporter),
            RetryPolicy::default_export(),
            FlusherConfig::default(),
        )
        .unwrap();

        let counter = pipeline.factory.counter("requests", Tags::new());
        counter.increment(1);

        let source = pipeline.scrape_source();
        let snapshots = source.snapshot().await;
        assert!(snapshots.iter().any(|s| s.name == "requests"));
    }

    #[tokio::test]
    async fn shutdown_stops_the_spawned_flusher() {
        let pipeline = Pipeline::new(
            BufferLimits::default(),
            CardinalityGuardConfig::default(),
            |_buffer| CollectorRegistry::new(),
            Arc::new(NoopExporter),
            RetryPolicy::default_export(),
            FlusherConfig { interval: std::time::Duration::from_secs(3600), ..FlusherConfig::default() },
        )
        .unwrap();
        let handle = pipeline.spawn_flusher();
        pipeline.shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}
