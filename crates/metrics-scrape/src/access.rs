//! CIDR allow-list and trusted-proxy forwarded-header resolution
//!
//! Grounded on `f384a151_metrics-rs-metrics`'s `PrometheusBuilder::
//! add_allowed_address`, which matches the connecting peer against a
//! list of `ipnet::IpNet` ranges and returns 403 on mismatch.

use crate::error::Error;
use axum::http::HeaderMap;
use ipnet::IpNet;
use std::net::IpAddr;

/// A list of CIDR ranges used both as a scrape allow-list and as the set
/// of proxies trusted to set `X-Forwarded-For`.
#[derive(Debug, Clone, Default)]
pub struct CidrList(Vec<IpNet>);

impl CidrList {
    pub fn parse(patterns: &[String]) -> Result<Self, ipnet::AddrParseError> {
        let nets = patterns.iter().map(|p| p.parse()).collect::<Result<Vec<_>, _>>()?;
        Ok(Self(nets))
    }

    /// Empty list means unrestricted — every address matches.
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.0.is_empty() || self.0.iter().any(|net| net.contains(&ip))
    }

    pub fn is_unrestricted(&self) -> bool {
        self.0.is_empty()
    }
}

/// Resolves the effective client address for a request: the TCP peer
/// address unless it is a trusted proxy and the request carries an
/// `X-Forwarded-For` header, in which case the left-most (original
/// client) address in that header is used instead.
///
/// An untrusted peer setting `X-Forwarded-For` is a spoofing attempt
/// ([`Error::ProxyViolation`]); a trusted proxy setting one that doesn't
/// parse to an address means the client identity can't be established
/// ([`Error::ClientIpUnknown`]).
pub fn resolve_client_ip(
    peer: IpAddr,
    headers: &HeaderMap,
    trusted_proxies: &CidrList,
) -> Result<IpAddr, Error> {
    let forwarded = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok());

    if !trusted_proxies.contains(peer) {
        return if forwarded.is_some() { Err(Error::ProxyViolation) } else { Ok(peer) };
    }
    let Some(value) = forwarded else {
        return Ok(peer);
    };
    value
        .split(',')
        .next()
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
        .ok_or(Error::ClientIpUnknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn unrestricted_list_allows_everything() {
        let list = CidrList::default();
        assert!(list.contains("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn restricted_list_only_allows_matching_ranges() {
        let list = CidrList::parse(&["10.0.0.0/8".to_string()]).unwrap();
        assert!(list.contains("10.1.2.3".parse().unwrap()));
        assert!(!list.contains("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn untrusted_peer_without_forwarded_header_passes_through() {
        let headers = HeaderMap::new();
        let trusted = CidrList::parse(&["10.0.0.0/8".to_string()]).unwrap();
        let peer: IpAddr = "192.168.1.1".parse().unwrap();
        assert_eq!(resolve_client_ip(peer, &headers, &trusted).unwrap(), peer);
    }

    #[test]
    fn untrusted_peer_with_forwarded_header_is_a_proxy_violation() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));
        let trusted = CidrList::parse(&["10.0.0.0/8".to_string()]).unwrap();
        let peer: IpAddr = "192.168.1.1".parse().unwrap();
        assert!(matches!(resolve_client_ip(peer, &headers, &trusted), Err(Error::ProxyViolation)));
    }

    #[test]
    fn trusted_peer_uses_left_most_forwarded_address() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4, 10.0.0.1"));
        let trusted = CidrList::parse(&["10.0.0.0/8".to_string()]).unwrap();
        let peer: IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(
            resolve_client_ip(peer, &headers, &trusted).unwrap(),
            "1.2.3.4".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn trusted_peer_with_unparseable_forwarded_header_is_client_ip_unknown() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        let trusted = CidrList::parse(&["10.0.0.0/8".to_string()]).unwrap();
        let peer: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(matches!(resolve_client_ip(peer, &headers, &trusted), Err(Error::ClientIpUnknown)));
    }
}
