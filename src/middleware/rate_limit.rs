//! Rate limiting middleware.
//!
//! In-memory, per client IP, fixed window with an optional burst allowance.
//! Guards the credential endpoints (register, login) against brute force.

use crate::error::ApiError;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Configuration for rate limiting.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u32,
    /// Window duration.
    pub window: Duration,
    /// Extra requests tolerated above `max_requests` before rejecting.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 20,
            window: Duration::from_secs(15 * 60),
            burst: 0,
        }
    }
}

/// Rate limiter state tracking requests per IP.
#[derive(Clone)]
pub struct RateLimitLayer {
    config: RateLimitConfig,
    state: Arc<Mutex<HashMap<IpAddr, RateLimitEntry>>>,
}

struct RateLimitEntry {
    count: u32,
    window_start: Instant,
}

#[derive(Debug, PartialEq, Eq)]
enum RateLimitResult {
    Allowed,
    BurstUsed { remaining: u32 },
    Exceeded { retry_after: Duration },
}

impl RateLimitLayer {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn check(&self, ip: IpAddr) -> RateLimitResult {
        let mut state = self.state.lock();
        let now = Instant::now();

        let entry = state.entry(ip).or_insert(RateLimitEntry {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= self.config.window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count = entry.count.saturating_add(1);

        let limit = self.config.max_requests.saturating_add(self.config.burst);
        let remaining = limit.saturating_sub(entry.count);
        let reset_at = entry.window_start + self.config.window;

        if entry.count > limit {
            RateLimitResult::Exceeded {
                retry_after: reset_at.saturating_duration_since(now),
            }
        } else if entry.count > self.config.max_requests {
            RateLimitResult::BurstUsed { remaining }
        } else {
            RateLimitResult::Allowed
        }
    }

    /// Drop entries whose window has long passed.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let window = self.config.window;
        self.state
            .lock()
            .retain(|_, entry| now.duration_since(entry.window_start) < window * 2);
    }

    /// Run `cleanup` on a timer (until the runtime shuts down).
    pub fn start_cleanup_task(&self) {
        let limiter = self.clone();
        let every = self.config.window.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                limiter.cleanup();
            }
        });
    }
}

/// Peer address if the server was started with connect info, else the first
/// `X-Forwarded-For` hop, else one shared bucket.
fn client_ip(connect_info: Option<&ConnectInfo<SocketAddr>>, headers: &HeaderMap) -> IpAddr {
    if let Some(ConnectInfo(addr)) = connect_info {
        return addr.ip();
    }
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Rate limiting middleware function.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimitLayer>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = client_ip(connect_info.as_ref(), request.headers());

    match limiter.check(ip) {
        RateLimitResult::Allowed => Ok(next.run(request).await),
        RateLimitResult::BurstUsed { remaining } => {
            debug!(ip = %ip, remaining, "Rate limit burst in use");
            Ok(next.run(request).await)
        }
        RateLimitResult::Exceeded { retry_after } => {
            warn!(
                ip = %ip,
                retry_after_secs = retry_after.as_secs(),
                "Rate limit exceeded"
            );
            Err(ApiError::RateLimited(retry_after))
        }
    }
}
