//! Basic auth and mTLS client-certificate stance for the scrape endpoint
//!
//! Basic auth is fully implemented. mTLS is an explicitly documented
//! stub, following `backend/src/middleware/mtls.rs`'s own stance:
//! certificate verification happens at the TLS layer (`rustls`'s own
//! client-auth handling when the listener is configured with a client CA
//! store), not re-implemented here. This module only carries the
//! configuration flag through so a caller who wired up `rustls` with
//! client auth can require it be present.

use crate::error::Error;
use axum::http::HeaderMap;
use base64::Engine;

#[derive(Debug, Clone, Default)]
pub struct BasicAuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl BasicAuthConfig {
    pub fn is_enabled(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Validates the `Authorization: Basic <...>` header against the
    /// configured credentials. When no credentials are configured, every
    /// request passes — basic auth is opt-in.
    pub fn check(&self, headers: &HeaderMap) -> Result<(), Error> {
        if !self.is_enabled() {
            return Ok(());
        }
        let Some(header) = headers.get(axum::http::header::AUTHORIZATION) else {
            return Err(Error::BasicAuthFailed);
        };
        let Ok(value) = header.to_str() else {
            return Err(Error::BasicAuthFailed);
        };
        let Some(encoded) = value.strip_prefix("Basic ") else {
            return Err(Error::BasicAuthFailed);
        };
        let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
            return Err(Error::BasicAuthFailed);
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return Err(Error::BasicAuthFailed);
        };
        let Some((user, pass)) = decoded.split_once(':') else {
            return Err(Error::BasicAuthFailed);
        };

        let expected_user = self.username.as_deref().unwrap_or_default();
        let expected_pass = self.password.as_deref().unwrap_or_default();
        if user == expected_user && pass == expected_pass {
            Ok(())
        } else {
            Err(Error::BasicAuthFailed)
        }
    }
}

/// Whether the scrape endpoint requires an mTLS client certificate.
/// Certificate verification itself happens at the TLS layer; this only
/// checks that the TLS terminator reported a verified handshake, via the
/// `X-Ssl-Client-Verify: SUCCESS` convention common to nginx/envoy
/// deployments terminating mTLS in front of the app.
#[derive(Debug, Clone, Copy, Default)]
pub struct MtlsRequirement {
    pub required: bool,
}

impl MtlsRequirement {
    pub fn check(&self, headers: &HeaderMap) -> Result<(), Error> {
        if !self.required {
            return Ok(());
        }
        match headers.get("x-ssl-client-verify").and_then(|v| v.to_str().ok()) {
            Some(v) if v.eq_ignore_ascii_case("success") => Ok(()),
            _ => Err(Error::MtlsFailed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn basic_header(user: &str, pass: &str) -> HeaderValue {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
        HeaderValue::from_str(&format!("Basic {encoded}")).unwrap()
    }

    #[test]
    fn disabled_when_no_credentials_configured() {
        let config = BasicAuthConfig::default();
        assert!(config.check(&HeaderMap::new()).is_ok());
    }

    #[test]
    fn accepts_matching_credentials() {
        let config = BasicAuthConfig {
            username: Some("admin".into()),
            password: Some("secret".into()),
        };
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, basic_header("admin", "secret"));
        assert!(config.check(&headers).is_ok());
    }

    #[test]
    fn rejects_missing_header_when_enabled() {
        let config = BasicAuthConfig {
            username: Some("admin".into()),
            password: Some("secret".into()),
        };
        assert!(config.check(&HeaderMap::new()).is_err());
    }

    #[test]
    fn rejects_wrong_password() {
        let config = BasicAuthConfig {
            username: Some("admin".into()),
            password: Some("secret".into()),
        };
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, basic_header("admin", "wrong"));
        assert!(config.check(&headers).is_err());
    }

    #[test]
    fn mtls_not_required_passes_without_header() {
        let requirement = MtlsRequirement { required: false };
        assert!(requirement.check(&HeaderMap::new()).is_ok());
    }

    #[test]
    fn mtls_required_rejects_missing_verification_header() {
        let requirement = MtlsRequirement { required: true };
        assert!(matches!(requirement.check(&HeaderMap::new()), Err(Error::MtlsFailed)));
    }

    #[test]
    fn mtls_required_accepts_success_header() {
        let requirement = MtlsRequirement { required: true };
        let mut headers = HeaderMap::new();
        headers.insert("x-ssl-client-verify", HeaderValue::from_static("SUCCESS"));
        assert!(requirement.check(&headers).is_ok());
    }
}
