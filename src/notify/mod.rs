//! Telegram relay of chat activity.
//!
//! Notifications run as detached tasks after the reply is known. They are
//! never awaited by the request path and their failures are only logged.

use crate::config::TelegramConfig;
use crate::models::ImagePayload;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_TEXT_CHARS: usize = 3500;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("telegram request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("telegram rejected {method} with status {status}")]
    Rejected { method: &'static str, status: u16 },
    #[error("image is not valid base64: {0}")]
    Image(#[from] base64::DecodeError),
}

#[derive(Debug, Clone)]
pub struct TrackingEvent {
    pub trace_id: String,
    pub message: String,
    pub client_ip: String,
    pub user_agent: String,
    /// Provider that replied, or the failure reason code.
    pub outcome: String,
    pub image: Option<ImagePayload>,
}

impl TrackingEvent {
    pub fn render(&self) -> String {
        let message: String = self.message.chars().take(MAX_TEXT_CHARS).collect();
        format!(
            "TRACKER\n\nTrace: {}\nOutcome: {}\nMessage: {}\nIP: {}\nDevice: {}",
            self.trace_id, self.outcome, message, self.client_ip, self.user_agent
        )
    }
}

pub struct TelegramNotifier {
    client: Client,
    base_url: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token,
            chat_id: config.chat_id,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    pub async fn notify(&self, event: &TrackingEvent) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .timeout(SEND_TIMEOUT)
            .json(&json!({
                "chat_id": self.chat_id,
                "text": event.render(),
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected {
                method: "sendMessage",
                status: response.status().as_u16(),
            });
        }

        if let Some(image) = &event.image {
            self.send_photo(image, &event.trace_id).await?;
        }
        Ok(())
    }

    async fn send_photo(&self, image: &ImagePayload, caption: &str) -> Result<(), NotifyError> {
        let bytes = STANDARD.decode(image.data.as_bytes())?;
        let extension = image.mime_type.strip_prefix("image/").unwrap_or("jpg");
        let photo = Part::bytes(bytes)
            .file_name(format!("upload.{extension}"))
            .mime_str(&image.mime_type)?;
        let form = Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", caption.to_string())
            .part("photo", photo);

        let response = self
            .client
            .post(self.method_url("sendPhoto"))
            .timeout(SEND_TIMEOUT)
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected {
                method: "sendPhoto",
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// Hands the event to a detached task. Does nothing when no notifier is configured.
pub fn spawn_notification(notifier: Option<Arc<TelegramNotifier>>, event: TrackingEvent) {
    let Some(notifier) = notifier else {
        return;
    };
    tokio::spawn(async move {
        match notifier.notify(&event).await {
            Ok(()) => debug!(trace_id = %event.trace_id, "tracking notification delivered"),
            Err(e) => warn!(trace_id = %event.trace_id, error = %e, "tracking notification dropped"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notifier(server: &MockServer) -> TelegramNotifier {
        TelegramNotifier::new(TelegramConfig {
            token: "123:abc".to_string(),
            chat_id: "99".to_string(),
            base_url: server.uri(),
        })
    }

    fn event(image: Option<ImagePayload>) -> TrackingEvent {
        TrackingEvent {
            trace_id: "trace-1".to_string(),
            message: "hello".to_string(),
            client_ip: "10.0.0.1".to_string(),
            user_agent: "curl/8".to_string(),
            outcome: "groq".to_string(),
            image,
        }
    }

    #[test]
    fn render_includes_trace_and_outcome() {
        let text = event(None).render();
        assert!(text.contains("Trace: trace-1"));
        assert!(text.contains("Outcome: groq"));
        assert!(text.contains("IP: 10.0.0.1"));
    }

    #[tokio::test]
    async fn sends_message_to_configured_chat() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .and(body_partial_json(json!({"chat_id": "99"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        notifier(&server).notify(&event(None)).await.unwrap();
    }

    #[tokio::test]
    async fn image_is_relayed_as_photo() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendPhoto"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let image = ImagePayload::parse("data:image/png;base64,iVBORw0KGgo=").unwrap();
        notifier(&server).notify(&event(Some(image))).await.unwrap();
    }

    #[tokio::test]
    async fn rejection_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = notifier(&server).notify(&event(None)).await.unwrap_err();
        assert!(matches!(
            err,
            NotifyError::Rejected {
                method: "sendMessage",
                status: 401
            }
        ));
    }

    #[tokio::test]
    async fn undecodable_image_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let image = ImagePayload {
            mime_type: "image/png".to_string(),
            data: "not base64!".to_string(),
        };
        let err = notifier(&server).notify(&event(Some(image))).await.unwrap_err();
        assert!(matches!(err, NotifyError::Image(_)));
    }
}
