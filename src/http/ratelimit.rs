//! Fixed-window request limiting.
//!
//! Counters sit behind [`CounterStore`] so that several processes can share
//! one external store; [`InMemoryCounterStore`] serves a single process.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{ConnectInfo, Query, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use thiserror::Error;

use crate::auth::CUSTOMER_HEADER;
use crate::model::Ms;

use super::AppState;
use super::error::ApiError;

#[derive(Debug, Error)]
#[error("counter store unavailable: {0}")]
pub struct CounterError(pub String);

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically count one hit for `key` in the window containing `now`
    /// and return the window's total so far. Windows expire on their own.
    async fn increment(&self, key: &str, now: Ms, window: Duration) -> Result<u64, CounterError>;
}

#[derive(Default)]
pub struct InMemoryCounterStore {
    /// key → (window index, hits)
    counters: DashMap<String, (i64, u64)>,
    /// Newest window index the stale-entry sweep ran for.
    last_pruned: AtomicI64,
}

/// Drop stale windows once the map grows past this, at most once per window.
const PRUNE_AT: usize = 10_000;

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

fn window_index(now: Ms, window: Duration) -> i64 {
    now.div_euclid((window.as_millis() as i64).max(1))
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(&self, key: &str, now: Ms, window: Duration) -> Result<u64, CounterError> {
        let index = window_index(now, window);
        if self.counters.len() >= PRUNE_AT && self.last_pruned.fetch_max(index, Ordering::Relaxed) < index {
            self.counters.retain(|_, (i, _)| *i >= index);
        }
        let mut entry = self.counters.entry(key.to_owned()).or_insert((index, 0));
        let (current, hits) = entry.value_mut();
        if *current != index {
            *current = index;
            *hits = 0;
        }
        *hits += 1;
        Ok(*hits)
    }
}

pub struct FixedWindowLimiter {
    store: Arc<dyn CounterStore>,
    limit: u64,
    window: Duration,
}

impl FixedWindowLimiter {
    pub fn new(store: Arc<dyn CounterStore>, limit: u64, window: Duration) -> Self {
        Self { store, limit, window }
    }

    /// Count a request for `key`. Store outages let the request through.
    pub async fn check(&self, key: &str, now: Ms) -> Result<(), ApiError> {
        let hits = match self.store.increment(key, now, self.window).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(key, "rate limiter skipped: {e}");
                return Ok(());
            }
        };
        if hits <= self.limit {
            return Ok(());
        }
        metrics::counter!(crate::observability::RATE_LIMITED_TOTAL).increment(1);
        let window_ms = (self.window.as_millis() as i64).max(1);
        let remaining_ms = window_ms - now.rem_euclid(window_ms);
        Err(ApiError::RateLimited {
            retry_after_secs: (remaining_ms as u64).div_ceil(1000),
        })
    }
}

/// Caller and business a request counts against. The caller is the peer
/// address; the customer id header (or "anonymous") stands in only when no
/// connection info is attached.
fn caller_key(request: &Request) -> String {
    let caller = match request.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => addr.ip().to_string(),
        None => request
            .headers()
            .get(CUSTOMER_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("anonymous")
            .to_owned(),
    };
    let business = Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(q)| q.get("business_id").cloned())
        .unwrap_or_default();
    format!("{caller}:{business}")
}

pub async fn limit_by_caller(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = caller_key(&request);
    state.limiter.check(&key, state.clock.now_ms()).await?;
    Ok(next.run(request).await)
}
