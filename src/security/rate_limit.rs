//! Per-client rate limiting middleware.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use thiserror::Error;

use crate::config::RateLimitConfig;
use crate::observability::metrics;

/// Idle buckets are swept once per this many checks.
const SWEEP_EVERY: u64 = 1024;

/// A request budget such as `5/minute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub requests: u32,
    pub period: Duration,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid rate limit '{0}', expected \"<count>/<second|minute|hour|day>\"")]
pub struct RateLimitParseError(String);

impl FromStr for RateLimit {
    type Err = RateLimitParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RateLimitParseError(s.to_string());
        let (count, unit) = s.split_once('/').ok_or_else(invalid)?;

        let requests: u32 = count.trim().parse().map_err(|_| invalid())?;
        if requests == 0 {
            return Err(invalid());
        }

        let unit = unit.trim().to_ascii_lowercase();
        let seconds = match unit.trim_end_matches('s') {
            "second" => 1,
            "minute" => 60,
            "hour" => 3600,
            "day" => 86_400,
            _ => return Err(invalid()),
        };

        Ok(Self {
            requests,
            period: Duration::from_secs(seconds),
        })
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}s", self.requests, self.period.as_secs())
    }
}

/// A simple token bucket.
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    /// Take one token, or return how long until one is available.
    fn try_acquire(&mut self, capacity: f64, refill_per_sec: f64) -> Result<(), Duration> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_per_sec).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / refill_per_sec))
        }
    }

    /// Refilled to capacity by now, so forgetting it changes nothing.
    fn is_idle(&self, now: Instant, capacity: f64, refill_per_sec: f64) -> bool {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens + elapsed * refill_per_sec >= capacity
    }
}

/// Shared state for the rate limiting middleware.
pub struct RateLimiterState {
    buckets: DashMap<String, TokenBucket>,
    capacity: f64,
    refill_per_sec: f64,
    checks: AtomicU64,
}

impl RateLimiterState {
    pub fn new(limit: RateLimit) -> Self {
        let capacity = f64::from(limit.requests);
        Self {
            buckets: DashMap::new(),
            capacity,
            refill_per_sec: capacity / limit.period.as_secs_f64(),
            checks: AtomicU64::new(0),
        }
    }

    /// Build from configuration; `None` when rate limiting is disabled.
    pub fn from_config(config: &RateLimitConfig) -> Result<Option<Arc<Self>>, RateLimitParseError> {
        if !config.enabled {
            return Ok(None);
        }
        let limit: RateLimit = config.default_limit.parse()?;
        tracing::info!(limit = %config.default_limit, "Rate limiting enabled");
        Ok(Some(Arc::new(Self::new(limit))))
    }

    /// Charge one request to `key`.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        let result = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.capacity))
            .try_acquire(self.capacity, self.refill_per_sec);

        // The entry guard is released above; retain locks every shard.
        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.evict_idle();
        }
        result
    }

    /// Forget clients whose buckets have refilled; returns how many were dropped.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| !bucket.is_idle(now, self.capacity, self.refill_per_sec));
        let evicted = before.saturating_sub(self.buckets.len());
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted idle rate limit buckets");
        }
        evicted
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}

/// Rate limit key for a request: the peer IP when known.
pub fn client_key(request: &Request<Body>) -> String {
    match request.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => format!("ip:{}", addr.ip()),
        None => "ip:unknown".to_string(),
    }
}

/// Middleware function for per-client rate limiting.
pub async fn rate_limit_middleware(
    State(state): State<Arc<RateLimiterState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = client_key(&request);

    match state.check(&key) {
        Ok(()) => next.run(request).await,
        Err(wait) => {
            tracing::warn!(client = %key, "Rate limit exceeded");
            metrics::record_rate_limited("default_limit");
            let retry_after = wait.as_secs_f64().ceil().max(1.0) as u64;
            let mut response = (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response();
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
            response
        }
    }
}
