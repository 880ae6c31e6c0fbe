//! Error types for the scrape endpoint

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::net::IpAddr;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Mirrors `backend`'s `ApiError` -> `IntoResponse` mapping: every
/// variant carries its own status code so handlers just propagate `?`.
/// The full scrape-side taxonomy: every denial or failure the handler can
/// produce gets its own variant so `errors.total{reason=…}` can break down
/// by exactly what happened.
#[derive(Error, Debug)]
pub enum Error {
    /// The per-attempt scrape timeout elapsed before a snapshot was ready.
    #[error("scrape timed out")]
    Timeout,

    /// An unclassified internal failure.
    #[error("internal error: {0}")]
    Exception(String),

    /// The resolved client address matched an explicit deny-list entry.
    #[error("host {0} is denied")]
    HostDenied(IpAddr),

    /// The resolved client address is outside the configured allow-list.
    #[error("client address {0} is not in the scrape allow-list")]
    IpDenied(IpAddr),

    /// A peer that isn't a trusted proxy supplied `X-Forwarded-For`.
    #[error("untrusted peer attempted to set a forwarded-for header")]
    ProxyViolation,

    /// Basic auth is configured and the request's credentials didn't match.
    #[error("basic authentication failed")]
    BasicAuthFailed,

    /// mTLS is required and the upstream TLS terminator didn't report a
    /// verified client certificate.
    #[error("mTLS client certificate verification failed")]
    MtlsFailed,

    /// A trusted proxy's `X-Forwarded-For` value couldn't be parsed.
    #[error("client IP could not be determined from the forwarded header")]
    ClientIpUnknown,

    /// The per-IP token bucket rejected this request.
    #[error("rate limit exceeded")]
    RateLimited,
}

impl Error {
    /// Stable label for `errors.total{reason=…}`.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Timeout => "timeout",
            Error::Exception(_) => "exception",
            Error::HostDenied(_) => "host_denied",
            Error::IpDenied(_) => "ip_denied",
            Error::ProxyViolation => "proxy_violation",
            Error::BasicAuthFailed => "basic_auth_failed",
            Error::MtlsFailed => "mtls_failed",
            Error::ClientIpUnknown => "client_ip_unknown",
            Error::RateLimited => "rate_limited",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match self {
            Error::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Error::Exception(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::HostDenied(_) | Error::IpDenied(_) | Error::ProxyViolation | Error::ClientIpUnknown => {
                StatusCode::FORBIDDEN
            }
            Error::BasicAuthFailed | Error::MtlsFailed => StatusCode::UNAUTHORIZED,
            Error::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        };
        (status, self.to_string()).into_response()
    }
}
