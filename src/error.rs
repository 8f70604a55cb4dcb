use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Fixed text shown to callers whenever no provider produced a reply.
pub const SERVICE_BUSY: &str = "System Busy";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is not a valid value: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("no provider configured, set at least one of GROQ_KEY, OPENAI_KEY, GEMINI_KEY")]
    NoProviders,
}

/// Errors surfaced by the HTTP layer.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("System Busy")]
    ServiceUnavailable { trace_id: String },
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            ApiError::InvalidRequest(msg) => json!({ "error": msg }),
            ApiError::ServiceUnavailable { trace_id } => json!({
                "error": SERVICE_BUSY,
                "trace_id": trace_id,
            }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}
