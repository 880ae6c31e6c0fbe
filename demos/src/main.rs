//! Wiring example
//!
//! A small axum service ("orders" API) instrumented end to end: request
//! handling records into a `Factory` counter/gauge and an
//! `HttpRequestCollector`, a background task simulates a queue a
//! `QueueDepthCollector` watches, the pipeline's own buffer is reported by
//! a `ProcessSelfCollector`, and the scrape router is merged alongside the
//! demo routes on one listener — the same "one `main`, one `AppState`"
//! shape as the teacher's control-plane binary.

use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use metrics_collectors::{
    Collector, CollectorRegistry, HttpRequestCollector, ProcessSelfCollector, QueueDepthCollector,
};
use metrics_core::{MetricSnapshot, Tags};
use metrics_encoders::{
    composite::CompositeExporter,
    influx::{InfluxConfig, InfluxExporter},
    json_lines::{JsonLinesConfig, JsonLinesExporter},
    Export,
};
use metrics_export::{FlusherConfig, Pipeline};
use metrics_scrape::{
    access::CidrList, auth::BasicAuthConfig, rate_limit::RateLimitConfig, ScrapeConfig,
    ScrapeState,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lets the demo's request handler and the registered collector share one
/// instance: the registry takes ownership of a `Box<dyn Collector>`, so
/// this wrapper forwards to an `Arc` the handler keeps a clone of too.
struct Shared<T>(Arc<T>);

#[async_trait]
impl Collector for Shared<HttpRequestCollector> {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    async fn collect(&self) -> Vec<MetricSnapshot> {
        self.0.collect().await
    }
}

struct AppState {
    pipeline: Arc<Pipeline>,
    http_collector: Arc<HttpRequestCollector>,
    queue_depth: Arc<AtomicU64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,metrics_pipeline_demo=debug".into()),
        )
        .init();

    let options = metrics_config::Options::from_file("metrics.toml").unwrap_or_else(|e| {
        tracing::warn!(error = %e, "no usable metrics.toml found, falling back to defaults");
        metrics_config::Options::default()
    });

    let exporter = build_exporter(&options.backends);
    let http_collector = Arc::new(HttpRequestCollector::new("orders-api"));
    let queue_depth = Arc::new(AtomicU64::new(0));

    let http_collector_for_registry = http_collector.clone();
    let queue_depth_for_collector = queue_depth.clone();
    let pipeline = Arc::new(
        Pipeline::new(
            metrics_core::BufferLimits {
                max_items: options.buffer.max_items,
                max_size_bytes: options.buffer.max_size_bytes,
            },
            metrics_core::CardinalityGuardConfig {
                max_unique_values_per_key: options.cardinality.max_unique_values_per_key,
                allow_list: options.cardinality.allow_list.clone(),
                deny_patterns: options.cardinality.deny_patterns.clone(),
                drop_empty_dimensions: options.cardinality.drop_empty_dimensions,
                max_dimension_value_length: options.cardinality.max_dimension_value_length,
                drop_only_overflowing_key: options.cardinality.drop_only_overflowing_key,
                merge_default_dimensions: options.cardinality.merge_default_dimensions.clone(),
            },
            move |buffer| {
                let mut registry = CollectorRegistry::new();
                registry.register(Box::new(Shared(http_collector_for_registry)));

                let mut queue_collector = QueueDepthCollector::new();
                queue_collector.watch("order-ingestion", 500, Arc::new(move || {
                    queue_depth_for_collector.load(Ordering::Relaxed)
                }));
                registry.register(Box::new(queue_collector));

                let mut process_collector = ProcessSelfCollector::new();
                let buffer = buffer.clone();
                process_collector.watch("orders-pipeline", Arc::new(move || buffer.stats()));
                registry.register(Box::new(process_collector));

                registry
            },
            exporter,
            metrics_retry::RetryPolicy {
                max_retries: options.retry.max_retries,
                base_backoff: Duration::from_millis(options.retry.base_backoff_ms),
                max_backoff: Duration::from_millis(options.retry.max_backoff_ms),
                per_attempt_timeout: Duration::from_millis(options.retry.per_attempt_timeout_ms),
            },
            FlusherConfig {
                interval: Duration::from_secs(options.batch.flush_interval_secs),
                batch_limits: metrics_core::BatchLimits {
                    max_items: options.batch.max_items,
                    max_bytes: options.batch.max_bytes,
                },
            },
        )
        .expect("cardinality guard config must compile its deny patterns"),
    );

    let flusher_handle = pipeline.spawn_flusher();

    spawn_queue_simulator(queue_depth.clone());

    let scrape_state = ScrapeState::new(
        pipeline.scrape_source(),
        ScrapeConfig {
            rate_limit: RateLimitConfig {
                requests_per_second: options.scrape.rate_limit_per_second,
                burst_size: options.scrape.rate_limit_burst,
            },
            allowed_cidrs: CidrList::parse(&options.scrape.allowed_cidrs)?,
            denied_cidrs: CidrList::parse(&options.scrape.denied_cidrs)?,
            trusted_proxy_cidrs: CidrList::parse(&options.scrape.trusted_proxy_cidrs)?,
            basic_auth: BasicAuthConfig {
                username: options.scrape.basic_auth_username.clone(),
                password: options.scrape.basic_auth_password.clone(),
            },
            mtls: metrics_scrape::auth::MtlsRequirement {
                required: options.scrape.require_mtls_client_cert,
            },
            max_tracked_ips: 10_000,
            timeout: Duration::from_millis(options.scrape.timeout_ms),
        },
    );

    let app_state = Arc::new(AppState { pipeline: pipeline.clone(), http_collector, queue_depth });

    let app = Router::new()
        .route("/orders", post(create_order))
        .route("/health", get(health))
        .with_state(app_state)
        .merge(metrics_scrape::router(scrape_state));

    let listener = tokio::net::TcpListener::bind(&options.scrape.listen_address).await?;
    tracing::info!(address = %options.scrape.listen_address, "serving demo routes and /metrics");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        pipeline.shutdown();
    };

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await?;

    flusher_handle.await?;
    Ok(())
}

fn build_exporter(backends: &metrics_config::BackendOptions) -> Arc<dyn Export> {
    let mut exporters: Vec<Arc<dyn Export>> = Vec::new();

    if backends.json_lines.enabled {
        match JsonLinesExporter::new(JsonLinesConfig {
            url: backends.json_lines.url.clone(),
            bearer_token: backends.json_lines.bearer_token.clone(),
            timeout: Duration::from_secs(10),
        }) {
            Ok(exporter) => exporters.push(Arc::new(exporter) as Arc<dyn Export>),
            Err(e) => tracing::error!(error = %e, "failed to build json lines exporter, skipping"),
        }
    }

    if backends.influx.enabled {
        match InfluxExporter::new(InfluxConfig {
            url: backends.influx.url.clone(),
            org: backends.influx.org.clone(),
            bucket: backends.influx.bucket.clone(),
            token: backends.influx.token.clone(),
            precision: backends.influx.precision.parse().unwrap_or_default(),
            gzip_enabled: backends.influx.gzip_enabled,
            min_gzip_size_bytes: backends.influx.min_gzip_size_bytes,
            timeout: Duration::from_secs(10),
        }) {
            Ok(exporter) => exporters.push(Arc::new(exporter) as Arc<dyn Export>),
            Err(e) => tracing::error!(error = %e, "failed to build influx exporter, skipping"),
        }
    }

    // CloudWatch's client construction is async (it resolves credentials
    // from the ambient environment), so it can't be built inline here the
    // way the synchronous HTTP backends are; wiring it in requires an
    // `.await` before this function's caller, left to the deployment that
    // actually has CloudWatch enabled rather than built unconditionally.
    if backends.cloudwatch.enabled {
        tracing::warn!(
            "backends.cloudwatch.enabled is set but this demo does not wire it up; \
             build a CloudWatchExporter::new(..).await in an async context and add it \
             to the composite list"
        );
    }

    Arc::new(CompositeExporter::new(exporters))
}

fn spawn_queue_simulator(depth: Arc<AtomicU64>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let delta: i64 = rand::random::<u8>() as i64 % 10 - 4;
            let current = depth.load(Ordering::Relaxed) as i64;
            let next = (current + delta).max(0) as u64;
            depth.store(next, Ordering::Relaxed);
        }
    });
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

async fn create_order(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let start = std::time::Instant::now();

    let counter = state.pipeline.factory.counter("orders_created_total", Tags::new());
    counter.increment(1);
    let queue_gauge = state.pipeline.factory.gauge("order_queue_depth", Tags::new());
    queue_gauge.set(state.queue_depth.load(Ordering::Relaxed) as f64);

    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    state.http_collector.record("POST", 201, latency_ms);

    (StatusCode::CREATED, "order accepted")
}
