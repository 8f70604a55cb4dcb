use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub mod fallback;
pub mod gemini;
pub mod openai;

use crate::models::ChatRequest;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Deadline exceeded")]
    Timeout,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Provider error ({status}): {message}")]
    Upstream { status: u16, message: String },
}

impl ProviderError {
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::Parse(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

/// One upstream chat-completion service.
///
/// Implementations pick their own model, honour `request.deadline`, and turn
/// every failure into a `ProviderError` instead of panicking.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn invoke(&self, request: &ChatRequest) -> Result<String, ProviderError>;
}

/// Remaining time for an adapter call, or `Timeout` when none is left.
pub(crate) fn remaining_budget(request: &ChatRequest) -> Result<Duration, ProviderError> {
    let remaining = request.remaining();
    if remaining.is_zero() {
        Err(ProviderError::Timeout)
    } else {
        Ok(remaining)
    }
}

/// Upstream bodies can echo request data; keep error messages short.
pub(crate) fn truncate_body(body: &str) -> String {
    const LIMIT: usize = 200;
    match body.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
