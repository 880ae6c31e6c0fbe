//! Prometheus scrape endpoint
//!
//! An `axum::Router` serving a single `/metrics` route, directly modeled
//! on `backend/src/main.rs`'s `create_router`/`AppState` shape: shared
//! state behind an `Arc`, a `ServiceBuilder` middleware stack, and a
//! `TcpListener` bound in the caller's own `main`. Per-IP rate limiting
//! via [`rate_limit::PerIpRateLimiter`] and CIDR/forwarded-header
//! handling via [`access::CidrList`] are both pulled from
//! `backend/src/middleware/`.

pub mod access;
pub mod auth;
pub mod error;
pub mod rate_limit;
mod self_metrics;

pub use error::{Error, Result};

use access::{resolve_client_ip, CidrList};
use async_trait::async_trait;
use auth::{BasicAuthConfig, MtlsRequirement};
use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use metrics_core::MetricSnapshot;
use metrics_encoders::Encoder as _;
use rate_limit::{PerIpRateLimiter, RateLimitConfig};
use self_metrics::SelfMetrics;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Supplies the current metric snapshots to render on each scrape.
/// Implemented by whatever keeps the authoritative live instrument set —
/// typically `metrics-export`'s flusher — so this crate never depends on
/// `metrics-collectors` or `metrics-export` directly.
#[async_trait]
pub trait ScrapeSource: Send + Sync {
    async fn snapshot(&self) -> Vec<MetricSnapshot>;
}

pub struct ScrapeConfig {
    pub rate_limit: RateLimitConfig,
    pub allowed_cidrs: CidrList,
    pub denied_cidrs: CidrList,
    pub trusted_proxy_cidrs: CidrList,
    pub basic_auth: BasicAuthConfig,
    pub mtls: MtlsRequirement,
    pub max_tracked_ips: usize,
    pub timeout: Duration,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig { requests_per_second: 10, burst_size: 20 },
            allowed_cidrs: CidrList::default(),
            denied_cidrs: CidrList::default(),
            trusted_proxy_cidrs: CidrList::default(),
            basic_auth: BasicAuthConfig::default(),
            mtls: MtlsRequirement::default(),
            max_tracked_ips: 10_000,
            timeout: Duration::from_secs(10),
        }
    }
}

pub struct ScrapeState {
    source: Arc<dyn ScrapeSource>,
    config: ScrapeConfig,
    rate_limiter: PerIpRateLimiter,
    self_metrics: SelfMetrics,
}

impl ScrapeState {
    pub fn new(source: Arc<dyn ScrapeSource>, config: ScrapeConfig) -> Arc<Self> {
        let rate_limiter = PerIpRateLimiter::new(config.rate_limit);
        Arc::new(Self { source, config, rate_limiter, self_metrics: SelfMetrics::new() })
    }

    pub fn requests_served(&self) -> u64 {
        self.self_metrics.requests_served()
    }

    pub fn requests_rejected(&self) -> u64 {
        self.self_metrics.requests_rejected()
    }

    /// Should be called periodically (e.g. from the flusher's own
    /// interval tick) to bound the per-IP rate limiter's memory use.
    pub fn cleanup_stale_limiters(&self) {
        self.rate_limiter.cleanup_stale(self.config.max_tracked_ips);
    }
}

/// Builds the scrape router. `mTLS` client-certificate enforcement, if
/// `config.mtls.required` is set, is expected to already be satisfied by
/// the TLS listener the caller binds this router to — see
/// [`auth::MtlsRequirement`].
pub fn router(state: Arc<ScrapeState>) -> Router {
    Router::new().route("/metrics", get(scrape_handler)).with_state(state)
}

async fn scrape_handler(
    State(state): State<Arc<ScrapeState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let _in_flight = state.self_metrics.begin_request();
    let started = Instant::now();

    match handle(&state, connect_info, &headers).await {
        Ok(body) => {
            state.self_metrics.record_success(started.elapsed(), body.len());
            (
                StatusCode::OK,
                [("content-type", metrics_encoders::prometheus::PrometheusEncoder.content_type())],
                body,
            )
                .into_response()
        }
        Err(e) => {
            state.self_metrics.record_error(e.reason());
            tracing::warn!(error = %e, "scrape request rejected");
            e.into_response()
        }
    }
}

/// Order matters: the client address must be resolved before anything
/// keyed on it can run, the rate limiter guards everything downstream of
/// it from abuse, and host/IP access control gates before the heavier
/// auth checks.
async fn handle(
    state: &ScrapeState,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: &HeaderMap,
) -> Result<String> {
    let peer = connect_info
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
    let client_ip = resolve_client_ip(peer, headers, &state.config.trusted_proxy_cidrs)?;

    if !state.rate_limiter.check(client_ip) {
        return Err(Error::RateLimited);
    }

    if !state.config.denied_cidrs.is_unrestricted() && state.config.denied_cidrs.contains(client_ip) {
        return Err(Error::HostDenied(client_ip));
    }
    if !state.config.allowed_cidrs.contains(client_ip) {
        return Err(Error::IpDenied(client_ip));
    }

    state.config.basic_auth.check(headers)?;
    state.config.mtls.check(headers)?;

    let snapshots = tokio::time::timeout(state.config.timeout, state.source.snapshot())
        .await
        .map_err(|_| Error::Timeout)?;
    let mut body = metrics_encoders::prometheus::render(&snapshots);
    let self_snapshots = state.self_metrics.snapshot();
    if !self_snapshots.is_empty() {
        body.push_str(&metrics_encoders::prometheus::render(&self_snapshots));
    }
    Ok(body)
}
