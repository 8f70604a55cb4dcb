use crate::middleware::auth::AuthenticatedClient;
use crate::tracking::UsageTracker;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::StatusCode;
use actix_web::{Error, HttpMessage};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, error};

/// Feeds per-client latency and server-error counts into the [`UsageTracker`].
#[derive(Clone)]
pub struct TrackingMiddleware {
    tracker: Arc<RwLock<UsageTracker>>,
}

impl TrackingMiddleware {
    pub fn new(tracker: Arc<RwLock<UsageTracker>>) -> Self {
        Self { tracker }
    }
}

impl<S, B> Transform<S, ServiceRequest> for TrackingMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = TrackingMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(TrackingMiddlewareService {
            service,
            tracker: self.tracker.clone(),
        }))
    }
}

pub struct TrackingMiddlewareService<S> {
    service: S,
    tracker: Arc<RwLock<UsageTracker>>,
}

fn record(tracker: &RwLock<UsageTracker>, client: &str, path: &str, started: Instant, status: StatusCode) {
    let latency_ms = started.elapsed().as_millis() as u64;
    let is_error = status.is_server_error();
    match tracker.write() {
        Ok(mut t) => t.record_request(client, latency_ms, is_error),
        Err(_) => error!("usage tracker lock poisoned, request not recorded"),
    }
    debug!(client = %client, path = %path, status = status.as_u16(), latency_ms, "request tracked");
}

impl<S, B> Service<ServiceRequest> for TrackingMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // Requests that never passed auth are not attributed to anyone
        let client = req
            .extensions()
            .get::<AuthenticatedClient>()
            .map(|c| c.client_id.clone());
        let Some(client) = client else {
            return Box::pin(self.service.call(req));
        };

        let path = req.path().to_string();
        let tracker = self.tracker.clone();
        let started = Instant::now();
        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let status = match &result {
                Ok(response) => response.status(),
                Err(e) => e.as_response_error().status_code(),
            };
            record(&tracker, &client, &path, started, status);
            result
        })
    }
}
