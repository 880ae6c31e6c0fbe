//! Per-IP token-bucket rate limiting
//!
//! Grounded directly on `backend/src/middleware/rate_limit.rs`'s
//! `PerIpRateLimiter`: a `DashMap<IpAddr, governor::RateLimiter>` with
//! lazy per-IP bucket creation and a periodic stale-entry sweep.

use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorRateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst_size: u32,
}

type Bucket = Arc<GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Independent token buckets per client IP, created on first sight and
/// swept once the map grows past a configured size.
pub struct PerIpRateLimiter {
    config: RateLimitConfig,
    limiters: DashMap<IpAddr, Bucket>,
}

impl PerIpRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, limiters: DashMap::new() }
    }

    fn new_bucket(&self) -> Bucket {
        let quota = Quota::per_second(
            NonZeroU32::new(self.config.requests_per_second.max(1)).unwrap(),
        )
        .allow_burst(NonZeroU32::new(self.config.burst_size.max(1)).unwrap());
        Arc::new(GovernorRateLimiter::direct(quota))
    }

    /// Returns `true` if the request from `ip` is within its bucket.
    pub fn check(&self, ip: IpAddr) -> bool {
        let bucket = self
            .limiters
            .entry(ip)
            .or_insert_with(|| self.new_bucket())
            .clone();
        bucket.check().is_ok()
    }

    /// Drops entries once the map exceeds `max_entries`, oldest-inserted
    /// first is not tracked precisely (no last-access timestamp, matching
    /// the teacher's own "simple cleanup" stance) — an arbitrary subset
    /// is evicted to bring the map back under the cap.
    pub fn cleanup_stale(&self, max_entries: usize) {
        if self.limiters.len() <= max_entries {
            return;
        }
        let to_remove = self.limiters.len() - max_entries;
        let mut removed = 0;
        self.limiters.retain(|_, _| {
            if removed < to_remove {
                removed += 1;
                false
            } else {
                true
            }
        });
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_requests_within_burst() {
        let limiter = PerIpRateLimiter::new(RateLimitConfig { requests_per_second: 10, burst_size: 20 });
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(limiter.check(ip));
    }

    #[test]
    fn rejects_once_burst_exhausted() {
        let limiter = PerIpRateLimiter::new(RateLimitConfig { requests_per_second: 1, burst_size: 2 });
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(!limiter.check(ip));
    }

    #[test]
    fn tracks_ips_independently() {
        let limiter = PerIpRateLimiter::new(RateLimitConfig { requests_per_second: 1, burst_size: 1 });
        let ip1: IpAddr = "127.0.0.1".parse().unwrap();
        let ip2: IpAddr = "192.168.1.1".parse().unwrap();
        assert!(limiter.check(ip1));
        assert!(!limiter.check(ip1));
        assert!(limiter.check(ip2));
    }

    #[test]
    fn cleanup_stale_caps_map_size() {
        let limiter = PerIpRateLimiter::new(RateLimitConfig { requests_per_second: 10, burst_size: 10 });
        for i in 0..10u8 {
            limiter.check(IpAddr::from([10, 0, 0, i]));
        }
        assert_eq!(limiter.len(), 10);
        limiter.cleanup_stale(5);
        assert_eq!(limiter.len(), 5);
    }
}
