use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_updated: Instant,
    capacity: f64,
    refill_rate: f64, // tokens per second
}

impl Bucket {
    fn new(capacity: f64, refill_rate: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_updated: now,
            capacity,
            refill_rate,
        }
    }

    fn refilled(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_updated).as_secs_f64();
        (self.tokens + (elapsed * self.refill_rate)).min(self.capacity)
    }

    /// A full bucket carries no state worth keeping.
    fn is_idle(&self, now: Instant) -> bool {
        self.refilled(now) >= self.capacity
    }

    fn try_consume(&mut self, now: Instant) -> bool {
        self.tokens = self.refilled(now);
        self.last_updated = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Token bucket per client. Capacity is one minute's worth of requests.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    // Outer RwLock guards the map, inner Mutex a single bucket
    buckets: Arc<RwLock<HashMap<String, Mutex<Bucket>>>>,
    capacity: f64,
    refill_rate: f64,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u64) -> Self {
        Self {
            buckets: Arc::new(RwLock::new(HashMap::new())),
            capacity: requests_per_minute as f64,
            refill_rate: requests_per_minute as f64 / 60.0,
        }
    }

    pub fn check_key(&self, client: &str) -> bool {
        self.check_key_at(client, Instant::now())
    }

    fn check_key_at(&self, client: &str, now: Instant) -> bool {
        {
            let Ok(map) = self.buckets.read() else {
                return true;
            };
            if let Some(bucket) = map.get(client) {
                return bucket.lock().map(|mut b| b.try_consume(now)).unwrap_or(true);
            }
        }

        // Another request may have inserted the bucket since the read lock was dropped
        let Ok(mut map) = self.buckets.write() else {
            return true;
        };
        if !map.contains_key(client) {
            map.retain(|_, bucket| bucket.lock().map(|b| !b.is_idle(now)).unwrap_or(false));
        }
        let bucket = map
            .entry(client.to_string())
            .or_insert_with(|| Mutex::new(Bucket::new(self.capacity, self.refill_rate, now)));
        let allowed = bucket.lock().map(|mut b| b.try_consume(now)).unwrap_or(true);
        allowed
    }

    #[cfg(test)]
    fn tracked_clients(&self) -> usize {
        self.buckets.read().map(|m| m.len()).unwrap_or(0)
    }
}

use crate::middleware::auth::AuthenticatedClient;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{Error, HttpMessage};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};
use tracing::warn;

pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
}

impl RateLimitMiddleware {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RateLimitMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddlewareService {
            service,
            limiter: self.limiter.clone(),
        }))
    }
}

pub struct RateLimitMiddlewareService<S> {
    service: S,
    limiter: Arc<RateLimiter>,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddlewareService<S>
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
        // Runs inside AuthMiddleware, so admitted requests carry a client id
        let client = req
            .extensions()
            .get::<AuthenticatedClient>()
            .map(|c| c.client_id.clone());

        if let Some(client) = client {
            if !self.limiter.check_key(&client) {
                warn!(client = %client, "rate limit exceeded");
                return Box::pin(async {
                    Err(actix_web::error::ErrorTooManyRequests(
                        "Rate limit exceeded",
                    ))
                });
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move { fut.await })
    }
}
