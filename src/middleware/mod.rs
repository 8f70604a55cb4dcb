pub mod auth;
pub mod rate_limit;
pub mod tracking;

pub use auth::AuthMiddleware;
pub use rate_limit::{RateLimitMiddleware, RateLimiter};
pub use tracking::TrackingMiddleware;
