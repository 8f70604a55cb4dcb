use actix_web::HttpResponse;

pub mod chat;
pub mod stats;

pub use chat::{chat, ChatSettings};
pub use stats::get_stats;

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}
