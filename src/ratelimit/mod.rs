//! Fixed-window request counting per caller and route.
//!
//! Flow Overview:
//! 1) Build the key `ratelimit:{caller}:{route}`.
//! 2) Atomically increment it in the shared store; the first hit in a window sets the expiry.
//! 3) Deny once the count passes the route's limit.
//!
//! Up to `2 x limit` requests can pass across a window boundary. Storage
//! failures are returned to the caller, which must fail closed.

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use std::{sync::Arc, time::Duration};

pub use self::memory::MemoryCounterStore;
pub use self::redis_store::RedisCounterStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Shared counter storage with per-key expiry.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` and return the new count.
    ///
    /// When the returned count is 1 the key must expire after `window`, as
    /// part of the same atomic step.
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub count: u64,
    pub limit: u64,
    pub remaining: u64,
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    window: Duration,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

#[must_use]
pub fn counter_key(caller: &str, route: &str) -> String {
    format!("ratelimit:{caller}:{route}")
}

impl RateLimiter {
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>, window: Duration) -> Self {
        Self { store, window }
    }

    /// Count one request for `(caller, route)` against `limit`.
    ///
    /// # Errors
    /// Returns `StoreError` if the counter store cannot be reached.
    pub async fn allow(
        &self,
        caller: &str,
        route: &str,
        limit: u64,
    ) -> Result<RateDecision, StoreError> {
        let count = self
            .store
            .increment(&counter_key(caller, route), self.window)
            .await?;

        Ok(RateDecision {
            allowed: count <= limit,
            count,
            limit,
            remaining: limit.saturating_sub(count),
        })
    }
}
