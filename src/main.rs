mod breaker;
mod config;
mod error;
mod handlers;
mod middleware;
mod models;
mod notify;
mod providers;
mod tracking;

use breaker::{CircuitBreaker, InMemoryBreakerStore};
use config::Config;
use handlers::{chat, get_stats, health, ChatSettings};
use middleware::{AuthMiddleware, RateLimitMiddleware, RateLimiter, TrackingMiddleware};
use notify::TelegramNotifier;
use providers::{fallback::FallbackChain, gemini::GeminiProvider, openai::OpenAiCompatibleProvider, ChatProvider};
use tracking::UsageTracker;

use actix_web::{middleware::Logger, web, App, HttpServer};
use std::sync::{Arc, RwLock};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Providers in priority order; unconfigured ones are left out.
fn build_providers(config: &Config) -> Vec<Arc<dyn ChatProvider>> {
    let mut providers: Vec<Arc<dyn ChatProvider>> = Vec::new();
    if let Some(groq) = &config.groq {
        providers.push(Arc::new(OpenAiCompatibleProvider::groq(
            groq.base_url.clone(),
            groq.api_key.clone(),
            config.system_prompt.clone(),
        )));
    }
    if let Some(openai) = &config.openai {
        providers.push(Arc::new(OpenAiCompatibleProvider::openai(
            openai.base_url.clone(),
            openai.api_key.clone(),
            config.system_prompt.clone(),
        )));
    }
    if let Some(gemini) = &config.gemini {
        providers.push(Arc::new(GeminiProvider::new(
            gemini.base_url.clone(),
            gemini.api_key.clone(),
            config.system_prompt.clone(),
        )));
    }
    providers
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e));
        }
    };

    let providers = build_providers(&config);
    let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
    info!(providers = ?names, "Fallback chain configured");

    let breaker = CircuitBreaker::new(Arc::new(InMemoryBreakerStore::new()), config.breaker);
    let chain = web::Data::new(FallbackChain::new(providers, breaker));

    let notifier = config.telegram.clone().map(|tg| Arc::new(TelegramNotifier::new(tg)));
    if notifier.is_none() {
        info!("Telegram tracking disabled");
    }
    let settings = web::Data::new(ChatSettings {
        deadline: config.chat_deadline,
        notifier,
    });

    let tracker = Arc::new(RwLock::new(UsageTracker::new()));
    let tracker_data = web::Data::from(tracker.clone());
    let limiter = Arc::new(RateLimiter::new(config.rate_limit_per_minute));
    let secret = config.api_secret.clone();
    let trust_proxy = config.trust_proxy;
    if trust_proxy {
        info!("Keying clients by forwarded headers");
    }

    let bind = (config.host.clone(), config.port);
    info!("Starting chat relay at {}:{}", bind.0, bind.1);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(chain.clone())
            .app_data(settings.clone())
            .app_data(tracker_data.clone())
            .route("/health", web::get().to(health))
            .service(
                // Auth runs first (registered last), then rate limiting, then tracking
                web::scope("/api")
                    .wrap(TrackingMiddleware::new(tracker.clone()))
                    .wrap(RateLimitMiddleware::new(limiter.clone()))
                    .wrap(AuthMiddleware::new(&secret).trust_forwarded(trust_proxy))
                    .route("/chat", web::post().to(chat))
                    .route("/stats", web::get().to(get_stats)),
            )
    })
    .bind(bind)?
    .run()
    .await
}
