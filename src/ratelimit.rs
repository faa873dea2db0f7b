//! Fixed-window admission limiter keyed by client address.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tracing::warn;

use crate::{error::ApiError, state::AppState};

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Permitted,
    Rejected { retry_after: Duration },
}

#[cfg(test)]
impl Admission {
    pub fn is_permitted(&self) -> bool {
        matches!(self, Admission::Permitted)
    }
}

pub trait Limiter: Send + Sync {
    fn allow(&self, key: &str) -> Admission;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Admits `limit` requests per `window` for each key.
///
/// The read-check-increment for a key happens under that key's shard lock,
/// so two concurrent requests never both take the last slot. Windows are
/// discarded lazily when touched after expiry, and at most once per window
/// a single caller sweeps every expired entry.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    clients: DashMap<String, Window>,
    epoch: Instant,
    last_sweep_ms: AtomicU64,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            clients: DashMap::new(),
            epoch: Instant::now(),
            last_sweep_ms: AtomicU64::new(0),
        }
    }

    /// Number of keys currently tracked.
    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.clients.len()
    }

    fn maybe_sweep(&self, now: Instant) {
        let now_ms = now.duration_since(self.epoch).as_millis() as u64;
        let window_ms = self.window.as_millis() as u64;
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < window_ms {
            return;
        }
        // Only the caller that wins the exchange sweeps.
        if self
            .last_sweep_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        let window = self.window;
        self.clients
            .retain(|_, w| now.saturating_duration_since(w.started) < window);
    }
}

impl Limiter for FixedWindowLimiter {
    fn allow(&self, key: &str) -> Admission {
        let now = Instant::now();
        let admission = {
            let mut entry = self.clients.entry(key.to_string()).or_insert(Window {
                started: now,
                count: 0,
            });
            let w = entry.value_mut();
            let elapsed = now.saturating_duration_since(w.started);
            if elapsed >= self.window {
                w.started = now;
                w.count = 0;
            }
            if w.count < self.limit {
                w.count += 1;
                Admission::Permitted
            } else {
                Admission::Rejected {
                    retry_after: self
                        .window
                        .saturating_sub(now.saturating_duration_since(w.started)),
                }
            }
        };
        // Shard guard is released here; retain takes every shard lock.
        self.maybe_sweep(now);
        admission
    }
}

/// Limiter that admits everything, used when limiting is disabled.
#[derive(Debug, Default)]
pub struct Unlimited;

impl Limiter for Unlimited {
    fn allow(&self, _key: &str) -> Admission {
        Admission::Permitted
    }
}

pub fn from_config(cfg: &crate::config::RateLimitConfig) -> Arc<dyn Limiter> {
    if cfg.enabled {
        Arc::new(FixedWindowLimiter::new(cfg.requests, cfg.window))
    } else {
        Arc::new(Unlimited)
    }
}

fn client_key(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Outermost middleware: rejects with 429 and `Retry-After` once a client
/// exhausts its window.
pub async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let key = client_key(&req);
    match state.limiter.allow(&key) {
        Admission::Permitted => next.run(req).await,
        Admission::Rejected { retry_after } => {
            warn!(client = %key, ?retry_after, "rate limit exceeded");
            ApiError::RateLimited(retry_after).into_response()
        }
    }
}
