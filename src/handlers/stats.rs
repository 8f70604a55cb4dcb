use crate::breaker::BreakerSnapshot;
use crate::middleware::auth::AuthenticatedClient;
use crate::providers::fallback::FallbackChain;
use crate::tracking::{ClientStats, UsageTracker};
use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Serialize)]
struct StatsResponse<'a> {
    client: Option<&'a ClientStats>,
    provider_replies: &'a HashMap<String, u64>,
    exhausted: u64,
    breakers: Vec<BreakerSnapshot>,
}

pub async fn get_stats(
    req: HttpRequest,
    chain: web::Data<FallbackChain>,
    tracker: web::Data<RwLock<UsageTracker>>,
) -> HttpResponse {
    let Some(client) = req.extensions().get::<AuthenticatedClient>().cloned() else {
        return HttpResponse::Unauthorized().body("Missing client context");
    };

    // Collect breaker state before taking the tracker lock; it must not be held across awaits
    let mut breakers = Vec::new();
    for name in chain.provider_names() {
        breakers.push(chain.breaker().snapshot(name).await);
    }

    let Ok(tracker_guard) = tracker.read() else {
        return HttpResponse::InternalServerError().body("Usage statistics unavailable");
    };

    HttpResponse::Ok().json(StatsResponse {
        client: tracker_guard.get_stats(&client.client_id),
        provider_replies: tracker_guard.provider_replies(),
        exhausted: tracker_guard.exhausted(),
        breakers,
    })
}
