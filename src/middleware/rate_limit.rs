use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::SecurityConfig;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RateLimitKey {
    ip: String,
    endpoint: String,
}

#[derive(Debug, Clone)]
struct Counter {
    window_start: Instant,
    count: u32,
}

/// Fixed-window request counter keyed by client IP and endpoint.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    cleanup_interval: Duration,
    counters: Mutex<HashMap<RateLimitKey, Counter>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allow { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateLimiter {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            max_requests: config.rate_limit_max_requests,
            window: config.rate_limit_window(),
            cleanup_interval: config.cleanup_interval(),
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn spawn_cleanup_task(self: Arc<Self>) -> JoinHandle<()> {
        let cleanup_interval = self.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            loop {
                ticker.tick().await;
                self.evict_stale().await;
            }
        })
    }

    pub async fn evict_stale(&self) -> usize {
        let now = Instant::now();
        let window = self.window;
        let mut counters = self.counters.lock().await;
        let before = counters.len();
        counters.retain(|_, counter| now.duration_since(counter.window_start) < window);
        before - counters.len()
    }

    pub async fn check(&self, ip: &str, endpoint: &str) -> RateLimitDecision {
        // NOTE: fixed window; bursts can exceed the limit near window boundaries.
        let now = Instant::now();
        let mut counters = self.counters.lock().await;
        let key = RateLimitKey {
            ip: ip.to_string(),
            endpoint: endpoint.to_string(),
        };
        let counter = counters.entry(key).or_insert_with(|| Counter { window_start: now, count: 0 });

        if now.duration_since(counter.window_start) >= self.window {
            counter.window_start = now;
            counter.count = 0;
        }

        if counter.count >= self.max_requests {
            let elapsed = now.duration_since(counter.window_start);
            return RateLimitDecision::Limited {
                retry_after: self.window.saturating_sub(elapsed),
            };
        }

        counter.count += 1;
        RateLimitDecision::Allow {
            remaining: self.max_requests - counter.count,
        }
    }
}

/// Whole seconds, rounded up, never zero.
pub fn ceil_secs(duration: Duration) -> u64 {
    (duration.as_secs() + u64::from(duration.subsec_nanos() > 0)).max(1)
}

/// Guard that applies the managed [`RateLimiter`] to the request's IP and path.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitRetryAfter(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    TooManyRequests,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RateLimit {
    type Error = RateLimitError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(limiter) = request.rocket().state::<Arc<RateLimiter>>() else {
            return Outcome::Success(RateLimit);
        };

        let request_id = request
            .local_cache(|| None::<crate::middleware::RequestId>)
            .as_ref()
            .map(|r| r.0.as_str())
            .unwrap_or("unknown");

        let ip = request.client_ip().map(|addr| addr.to_string()).unwrap_or_else(|| {
            warn!(
                request_id = %request_id,
                uri = %request.uri(),
                "client ip unavailable for rate limiting"
            );
            "missing-ip".to_string()
        });

        match limiter.check(&ip, request.uri().path().as_str()).await {
            RateLimitDecision::Allow { .. } => Outcome::Success(RateLimit),
            RateLimitDecision::Limited { retry_after } => {
                let retry_after_secs = ceil_secs(retry_after);
                request.local_cache(|| Some(RateLimitRetryAfter(retry_after_secs)));
                warn!(
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    retry_after_secs = %retry_after_secs,
                    "rate limit exceeded"
                );
                Outcome::Error((Status::TooManyRequests, RateLimitError::TooManyRequests))
            }
        }
    }
}
