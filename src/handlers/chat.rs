use crate::error::ApiError;
use crate::middleware::auth::AuthenticatedClient;
use crate::models::{ChatBody, ChatReplyBody, ChatRequest, ImagePayload};
use crate::notify::{spawn_notification, TelegramNotifier, TrackingEvent};
use crate::providers::fallback::FallbackChain;
use crate::tracking::UsageTracker;
use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{error, info, warn};

/// Per-request settings shared by all workers.
pub struct ChatSettings {
    pub deadline: Duration,
    pub notifier: Option<Arc<TelegramNotifier>>,
}

pub async fn chat(
    req: HttpRequest,
    chain: web::Data<FallbackChain>,
    tracker: web::Data<RwLock<UsageTracker>>,
    settings: web::Data<ChatSettings>,
    body: web::Json<ChatBody>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();

    let message = body
        .user_message()
        .ok_or_else(|| ApiError::InvalidRequest("message must not be empty".to_string()))?
        .to_string();
    let image = body
        .image
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .map(ImagePayload::parse)
        .transpose()
        .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;

    let (client, reported_addr) = req
        .extensions()
        .get::<AuthenticatedClient>()
        .map(|c| (c.client_id.clone(), c.reported_addr.clone()))
        .unwrap_or_else(|| ("unknown".to_string(), "unknown".to_string()));
    let user_agent = req
        .headers()
        .get("user-agent")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let request = ChatRequest::new(message, image, settings.deadline);
    let trace_id = request.trace_id.to_string();
    info!(trace_id = %trace_id, client = %client, has_image = request.image.is_some(), "chat request received");

    let result = chain.handle_chat(&request).await;

    let outcome = match &result {
        Ok(reply) => reply.provider.clone(),
        Err(exhausted) => format!("failed ({})", exhausted.reason_code()),
    };
    spawn_notification(
        settings.notifier.clone(),
        TrackingEvent {
            trace_id: trace_id.clone(),
            message: request.message,
            client_ip: reported_addr,
            user_agent,
            outcome,
            image: request.image,
        },
    );

    match result {
        Ok(reply) => {
            let usage = match tracker.write() {
                Ok(mut t) => t.record_reply(&client, &reply.provider),
                Err(_) => {
                    error!("usage tracker lock poisoned");
                    0
                }
            };
            info!(trace_id = %trace_id, provider = %reply.provider, "chat reply served");
            Ok(HttpResponse::Ok().json(ChatReplyBody {
                reply: reply.reply,
                provider: reply.provider,
                trace_id,
                usage,
            }))
        }
        Err(exhausted) => {
            if let Ok(mut t) = tracker.write() {
                t.record_exhausted();
            }
            warn!(trace_id = %trace_id, reason = exhausted.reason_code(), "no provider produced a reply");
            Err(ApiError::ServiceUnavailable { trace_id })
        }
    }
}
