use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

pub mod gemini;
pub mod openai;

const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

// Inbound

#[derive(Debug, Deserialize)]
pub struct LegacyMessage {
    pub content: String,
}

/// Body of `POST /api/chat`.
///
/// The browser client sends `{message, image}`; older clients send an
/// OpenAI-style `messages` list whose last entry is the user's text.
#[derive(Debug, Deserialize)]
pub struct ChatBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<LegacyMessage>>,
}

impl ChatBody {
    pub fn user_message(&self) -> Option<&str> {
        let text = match &self.message {
            Some(message) => Some(message.as_str()),
            None => self
                .messages
                .as_ref()
                .and_then(|m| m.last())
                .map(|m| m.content.as_str()),
        };
        text.map(str::trim).filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Serialize)]
pub struct ChatReplyBody {
    pub reply: String,
    pub provider: String,
    pub trace_id: String,
    pub usage: u64,
}

// Core

/// Inline image attached to a chat message, kept base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, PartialEq, Eq)]
pub struct InvalidImage(pub &'static str);

impl fmt::Display for InvalidImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid image: {}", self.0)
    }
}

impl ImagePayload {
    /// Accepts a `data:image/...;base64,` URL or a bare base64 body.
    pub fn parse(raw: &str) -> Result<Self, InvalidImage> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(InvalidImage("empty payload"));
        }

        let Some(rest) = raw.strip_prefix("data:") else {
            return Ok(Self {
                mime_type: DEFAULT_IMAGE_MIME.to_string(),
                data: raw.to_string(),
            });
        };

        let (mime_type, data) = rest
            .split_once(";base64,")
            .ok_or(InvalidImage("expected a base64 data url"))?;
        if !mime_type.starts_with("image/") {
            return Err(InvalidImage("not an image mime type"));
        }
        if data.is_empty() {
            return Err(InvalidImage("empty payload"));
        }

        Ok(Self {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        })
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// One unit of work for the fallback chain.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub message: String,
    pub image: Option<ImagePayload>,
    pub trace_id: Uuid,
    pub deadline: Instant,
}

impl ChatRequest {
    /// Starts the deadline clock now.
    pub fn new(message: impl Into<String>, image: Option<ImagePayload>, budget: Duration) -> Self {
        Self {
            message: message.into(),
            image,
            trace_id: Uuid::new_v4(),
            deadline: Instant::now() + budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub reply: String,
    pub provider: String,
}

/// Terminal outcome when no provider produced a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChainExhausted {
    #[error("no provider available")]
    Unavailable,
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl ChainExhausted {
    pub fn reason_code(&self) -> &'static str {
        match self {
            ChainExhausted::Unavailable => "unavailable",
            ChainExhausted::DeadlineExceeded => "timeout",
        }
    }
}

pub type ChatResult = Result<ChatReply, ChainExhausted>;
