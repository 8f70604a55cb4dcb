use actix_web::error::ErrorUnauthorized;
use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use std::future::{ready, Ready};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

/// Identity of an admitted caller.
#[derive(Debug, Clone)]
pub struct AuthenticatedClient {
    /// Key for rate limiting and usage stats.
    pub client_id: String,
    /// Address as the caller reports it, forwarded headers included. Only for display.
    pub reported_addr: String,
}

/// Admits requests carrying the shared secret in `x-api-key` or
/// `Authorization: Bearer`.
pub struct AuthMiddleware {
    secret: Rc<[u8]>,
    trust_forwarded: bool,
}

impl AuthMiddleware {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Rc::from(secret.as_bytes()),
            trust_forwarded: false,
        }
    }

    /// Key clients by `X-Forwarded-For` / `Forwarded`. Only safe behind a proxy that overwrites them.
    pub fn trust_forwarded(mut self, trust: bool) -> Self {
        self.trust_forwarded = trust;
        self
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = AuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddlewareService {
            service,
            secret: self.secret.clone(),
            trust_forwarded: self.trust_forwarded,
        }))
    }
}

pub struct AuthMiddlewareService<S> {
    service: S,
    secret: Rc<[u8]>,
    trust_forwarded: bool,
}

fn presented_secret(req: &ServiceRequest) -> Option<String> {
    let headers = req.headers();
    if let Some(key) = headers.get("x-api-key").and_then(|h| h.to_str().ok()) {
        return Some(key.to_string());
    }
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|t| t.to_string())
}

fn reported_addr(req: &ServiceRequest) -> String {
    req.connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string()
}

fn peer_ip(req: &ServiceRequest) -> String {
    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let reported_addr = reported_addr(&req);
        let client_id = if self.trust_forwarded {
            reported_addr.clone()
        } else {
            peer_ip(&req)
        };
        let admitted = presented_secret(&req)
            .map(|presented| bool::from(presented.as_bytes().ct_eq(&self.secret)))
            .unwrap_or(false);

        if admitted {
            debug!(client = %client_id, "request admitted");
            req.extensions_mut()
                .insert(AuthenticatedClient {
                    client_id,
                    reported_addr,
                });
            let fut = self.service.call(req);
            Box::pin(async move { fut.await })
        } else {
            warn!(client = %client_id, reported = %reported_addr, path = %req.path(), "rejected request with missing or invalid secret");
            Box::pin(async move { Err(ErrorUnauthorized("Invalid or missing API key")) })
        }
    }
}
