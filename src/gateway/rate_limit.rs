//! Sliding-window rate limiting keyed by client identity.
//!
//! Counters live behind a store trait: the Redis store shares state
//! across gateway instances; the in-memory store covers single-instance
//! deployments with the same window semantics. Rejected hits never
//! consume quota.

use async_trait::async_trait;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::cache::KvCache;
use crate::errors::AppError;

pub const WINDOW_SECS: u64 = 60;

#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_epoch: u64,
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn hit(&self, client_key: &str) -> Result<RateDecision, AppError>;
}

/// Per-process counters; sufficient for a single gateway instance.
pub struct MemoryRateLimitStore {
    limit: u32,
    window: Duration,
    requests: Mutex<HashMap<String, Vec<Instant>>>,
}

impl MemoryRateLimitStore {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            window: Duration::from_secs(WINDOW_SECS),
            requests: Mutex::new(HashMap::new()),
        }
    }

    fn hit_at(&self, client_key: &str, now: Instant) -> RateDecision {
        let mut requests = match self.requests.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let window_start = now.checked_sub(self.window).unwrap_or(now);
        let hits = requests.entry(client_key.to_string()).or_default();
        hits.retain(|stamp| *stamp > window_start);

        let reset_epoch = Utc::now().timestamp() as u64 + WINDOW_SECS;
        if hits.len() as u32 >= self.limit {
            return RateDecision {
                allowed: false,
                limit: self.limit,
                remaining: 0,
                reset_epoch,
            };
        }

        hits.push(now);
        RateDecision {
            allowed: true,
            limit: self.limit,
            remaining: self.limit - hits.len() as u32,
            reset_epoch,
        }
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn hit(&self, client_key: &str) -> Result<RateDecision, AppError> {
        Ok(self.hit_at(client_key, Instant::now()))
    }
}

/// Shared counters in the KV cache; correct under horizontal scale.
pub struct RedisRateLimitStore {
    cache: KvCache,
    limit: u32,
}

impl RedisRateLimitStore {
    pub fn new(cache: KvCache, limit: u32) -> Self {
        Self { cache, limit }
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn hit(&self, client_key: &str) -> Result<RateDecision, AppError> {
        let now_ms = Utc::now().timestamp_millis() as u64;
        let window_ms = WINDOW_SECS * 1000;
        let key = format!("rate_limit:{client_key}");
        let member = format!("{now_ms}-{}", Uuid::new_v4());

        let count = self
            .cache
            .sliding_window_hit(&key, &member, now_ms, window_ms)
            .await?;
        let reset_epoch = (now_ms + window_ms) / 1000;

        if count > u64::from(self.limit) {
            self.cache.discard_window_member(&key, &member).await?;
            return Ok(RateDecision {
                allowed: false,
                limit: self.limit,
                remaining: 0,
                reset_epoch,
            });
        }

        Ok(RateDecision {
            allowed: true,
            limit: self.limit,
            remaining: self.limit - count as u32,
            reset_epoch,
        })
    }
}

/// Client identity: first forwarded-for hop, else peer address.
pub fn client_identity(headers: &HeaderMap, peer: Option<&SocketAddr>) -> String {
    if let Some(forwarded) = headers.get("X-Forwarded-For").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn apply_headers(response: &mut Response, decision: &RateDecision) {
    let headers = response.headers_mut();
    if let Ok(value) = decision.limit.to_string().parse() {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = decision.remaining.to_string().parse() {
        headers.insert("X-RateLimit-Remaining", value);
    }
    if let Ok(value) = decision.reset_epoch.to_string().parse() {
        headers.insert("X-RateLimit-Reset", value);
    }
}

pub async fn rate_limit_middleware(
    State(state): State<super::GatewayState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if path == "/" || path == "/health" {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let client = client_identity(request.headers(), peer.as_ref());

    let decision = match state.limiter.hit(&client).await {
        Ok(decision) => decision,
        Err(e) => return e.into_response(),
    };

    if !decision.allowed {
        tracing::warn!(client = %client, "Rate limit exceeded");
        let mut response = AppError::RateLimited {
            retry_after: WINDOW_SECS,
        }
        .into_response();
        apply_headers(&mut response, &decision);
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(&mut response, &decision);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_boundary() {
        let store = MemoryRateLimitStore::new(3);
        let start = Instant::now();

        // Exactly N requests succeed, with remaining counting down.
        let first = store.hit_at("1.2.3.4", start);
        assert!(first.allowed);
        assert_eq!(first.remaining, 2);
        assert_eq!(store.hit_at("1.2.3.4", start).remaining, 1);
        assert_eq!(store.hit_at("1.2.3.4", start).remaining, 0);

        // Request N+1 inside the window is rejected.
        let fourth = store.hit_at("1.2.3.4", start + Duration::from_secs(1));
        assert!(!fourth.allowed);
        assert_eq!(fourth.remaining, 0);
        assert_eq!(fourth.limit, 3);

        // Another client is unaffected.
        assert!(store.hit_at("5.6.7.8", start).allowed);
    }

    #[test]
    fn test_allowance_resets_after_quiet_window() {
        let store = MemoryRateLimitStore::new(3);
        let start = Instant::now();
        for _ in 0..3 {
            assert!(store.hit_at("1.2.3.4", start).allowed);
        }
        assert!(!store.hit_at("1.2.3.4", start).allowed);

        // 61 seconds of quiet: full allowance again.
        let later = start + Duration::from_secs(61);
        let decision = store.hit_at("1.2.3.4", later);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
    }

    #[test]
    fn test_rejected_hits_do_not_consume_quota() {
        let store = MemoryRateLimitStore::new(2);
        let start = Instant::now();
        store.hit_at("1.2.3.4", start);
        let second = store.hit_at("1.2.3.4", start + Duration::from_secs(30));

        // Hammering while limited must not push the reset out.
        for i in 0..10 {
            let t = start + Duration::from_secs(31 + i);
            assert!(!store.hit_at("1.2.3.4", t).allowed);
        }
        let _ = second;

        // Once the first hit ages out, one slot frees up.
        let decision = store.hit_at("1.2.3.4", start + Duration::from_secs(61));
        assert!(decision.allowed);
    }

    #[test]
    fn test_client_identity_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", "10.0.0.1, 10.0.0.2".parse().unwrap());
        let peer: SocketAddr = "192.168.1.5:443".parse().unwrap();

        assert_eq!(client_identity(&headers, Some(&peer)), "10.0.0.1");
        assert_eq!(client_identity(&HeaderMap::new(), Some(&peer)), "192.168.1.5");
        assert_eq!(client_identity(&HeaderMap::new(), None), "unknown");
    }
}
