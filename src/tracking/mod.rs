use serde::Serialize;
use std::collections::HashMap;
use std::time::SystemTime;

/// Tracks usage across all clients for the lifetime of the process
#[derive(Debug, Default)]
pub struct UsageTracker {
    clients: HashMap<String, ClientStats>,
    provider_replies: HashMap<String, u64>,
    exhausted: u64,
}

/// Per-client statistics
#[derive(Debug, Serialize)]
pub struct ClientStats {
    pub request_count: u64,
    pub error_count: u64,
    pub total_latency_ms: u64,
    pub replies: u64,
    #[serde(with = "system_time_as_millis")]
    pub last_request_timestamp: SystemTime,
}

impl ClientStats {
    fn new() -> Self {
        Self {
            request_count: 0,
            error_count: 0,
            total_latency_ms: 0,
            replies: 0,
            last_request_timestamp: SystemTime::now(),
        }
    }
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished request (called by middleware after response)
    pub fn record_request(&mut self, client: &str, latency_ms: u64, is_error: bool) {
        let stats = self.client_entry(client);
        stats.request_count += 1;
        stats.total_latency_ms += latency_ms;
        stats.last_request_timestamp = SystemTime::now();
        if is_error {
            stats.error_count += 1;
        }
    }

    /// Record a served reply and return the client's running reply count
    pub fn record_reply(&mut self, client: &str, provider: &str) -> u64 {
        *self.provider_replies.entry(provider.to_string()).or_insert(0) += 1;
        let stats = self.client_entry(client);
        stats.replies += 1;
        stats.replies
    }

    pub fn record_exhausted(&mut self) {
        self.exhausted += 1;
    }

    pub fn get_stats(&self, client: &str) -> Option<&ClientStats> {
        self.clients.get(client)
    }

    pub fn provider_replies(&self) -> &HashMap<String, u64> {
        &self.provider_replies
    }

    pub fn exhausted(&self) -> u64 {
        self.exhausted
    }

    fn client_entry(&mut self, client: &str) -> &mut ClientStats {
        self.clients
            .entry(client.to_string())
            .or_insert_with(ClientStats::new)
    }
}

/// Serializes SystemTime as milliseconds since UNIX epoch
mod system_time_as_millis {
    use serde::{Serialize, Serializer};
    use std::time::SystemTime;

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = time
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        millis.serialize(serializer)
    }
}
