//! Per-provider circuit breaker.
//!
//! A provider is skipped while its open marker is alive. The marker is set
//! once the consecutive failure count reaches the threshold and expires on
//! its own after the cool-down. A success clears the counter but never an
//! open marker, so recovery is always time-gated.
//!
//! When the store cannot be reached the breaker fails open: the provider is
//! treated as eligible and state updates are dropped with a warning.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Duration;
use tracing::warn;

pub mod memory;

pub use memory::InMemoryBreakerStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("breaker store unavailable: {0}")]
    Unavailable(String),

    #[error("open duration {0:?} cannot be represented")]
    InvalidTtl(Duration),
}

/// Shared storage for breaker state, addressed by provider name.
///
/// Increment and clear must be atomic with respect to concurrent callers.
#[async_trait]
pub trait BreakerStore: Send + Sync {
    async fn failure_count(&self, provider: &str) -> Result<u32, StoreError>;
    async fn increment_failure_count(&self, provider: &str) -> Result<u32, StoreError>;
    async fn clear_failure_count(&self, provider: &str) -> Result<(), StoreError>;
    async fn is_open(&self, provider: &str) -> Result<bool, StoreError>;
    async fn set_open(&self, provider: &str, ttl: Duration) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPolicy {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BreakerSnapshot {
    pub provider: String,
    pub consecutive_failures: Option<u32>,
    pub open: Option<bool>,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    store: Arc<dyn BreakerStore>,
    policy: BreakerPolicy,
}

impl CircuitBreaker {
    pub fn new(store: Arc<dyn BreakerStore>, policy: BreakerPolicy) -> Self {
        Self { store, policy }
    }

    pub async fn is_eligible(&self, provider: &str) -> bool {
        match self.store.is_open(provider).await {
            Ok(open) => !open,
            Err(e) => {
                warn!(provider = %provider, error = %e, "breaker state unknown, allowing attempt");
                true
            }
        }
    }

    pub async fn record_failure(&self, provider: &str) {
        let failures = match self.store.increment_failure_count(provider).await {
            Ok(n) => n,
            Err(e) => {
                warn!(provider = %provider, error = %e, "failed to record provider failure");
                return;
            }
        };

        if failures >= self.policy.failure_threshold {
            match self.store.set_open(provider, self.policy.cooldown).await {
                Ok(()) => warn!(
                    provider = %provider,
                    failures,
                    cooldown_secs = self.policy.cooldown.as_secs(),
                    "circuit breaker opened"
                ),
                Err(e) => warn!(provider = %provider, error = %e, "failed to open circuit breaker"),
            }
        }
    }

    pub async fn record_success(&self, provider: &str) {
        if let Err(e) = self.store.clear_failure_count(provider).await {
            warn!(provider = %provider, error = %e, "failed to clear provider failures");
        }
    }

    /// Current view of a provider's state; `None` fields mean the store could not be read.
    pub async fn snapshot(&self, provider: &str) -> BreakerSnapshot {
        BreakerSnapshot {
            provider: provider.to_string(),
            consecutive_failures: self.store.failure_count(provider).await.ok(),
            open: self.store.is_open(provider).await.ok(),
        }
    }
}
