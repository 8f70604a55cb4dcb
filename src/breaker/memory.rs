use crate::breaker::{BreakerStore, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Entry {
    failures: u32,
    open_until: Option<Instant>,
}

/// Process-local breaker store. Open markers expire lazily on read.
#[derive(Debug, Default)]
pub struct InMemoryBreakerStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryBreakerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Entry>) -> T,
    ) -> Result<T, StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("breaker store lock poisoned".to_string()))?;
        Ok(f(&mut entries))
    }
}

#[async_trait]
impl BreakerStore for InMemoryBreakerStore {
    async fn failure_count(&self, provider: &str) -> Result<u32, StoreError> {
        self.with_entries(|entries| entries.get(provider).map_or(0, |e| e.failures))
    }

    async fn increment_failure_count(&self, provider: &str) -> Result<u32, StoreError> {
        self.with_entries(|entries| {
            let entry = entries.entry(provider.to_string()).or_default();
            entry.failures = entry.failures.saturating_add(1);
            entry.failures
        })
    }

    async fn clear_failure_count(&self, provider: &str) -> Result<(), StoreError> {
        self.with_entries(|entries| {
            if let Some(entry) = entries.get_mut(provider) {
                entry.failures = 0;
            }
        })
    }

    async fn is_open(&self, provider: &str) -> Result<bool, StoreError> {
        self.with_entries(|entries| {
            let Some(entry) = entries.get_mut(provider) else {
                return false;
            };
            match entry.open_until {
                Some(until) if Instant::now() < until => true,
                Some(_) => {
                    entry.open_until = None;
                    false
                }
                None => false,
            }
        })
    }

    async fn set_open(&self, provider: &str, ttl: Duration) -> Result<(), StoreError> {
        let until = Instant::now()
            .checked_add(ttl)
            .ok_or(StoreError::InvalidTtl(ttl))?;
        self.with_entries(|entries| {
            entries.entry(provider.to_string()).or_default().open_until = Some(until);
        })
    }
}
