use crate::breaker::CircuitBreaker;
use crate::models::{ChainExhausted, ChatReply, ChatRequest, ChatResult};
use crate::providers::{ChatProvider, ProviderError};
use std::sync::Arc;
use tokio::time::timeout_at;

/// Tries providers in priority order until one replies.
///
/// Attempts are strictly sequential and share the request deadline. A
/// provider with an open breaker is skipped without counting as a failure.
/// Once the deadline passes no further provider is tried.
pub struct FallbackChain {
    providers: Vec<Arc<dyn ChatProvider>>,
    breaker: CircuitBreaker,
}

impl FallbackChain {
    /// `providers` are in priority order, first is tried first.
    pub fn new(providers: Vec<Arc<dyn ChatProvider>>, breaker: CircuitBreaker) -> Self {
        Self { providers, breaker }
    }

    pub fn provider_names(&self) -> impl Iterator<Item = &str> {
        self.providers.iter().map(|p| p.name())
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn handle_chat(&self, request: &ChatRequest) -> ChatResult {
        for provider in &self.providers {
            if request.is_expired() {
                return Err(ChainExhausted::DeadlineExceeded);
            }

            let name = provider.name();
            if !self.breaker.is_eligible(name).await {
                continue;
            }

            match timeout_at(request.deadline, provider.invoke(request)).await {
                Ok(Ok(reply)) => {
                    self.breaker.record_success(name).await;
                    return Ok(ChatReply {
                        reply,
                        provider: name.to_string(),
                    });
                }
                Ok(Err(ProviderError::Timeout)) | Err(_) => {
                    self.breaker.record_failure(name).await;
                    return Err(ChainExhausted::DeadlineExceeded);
                }
                Ok(Err(_)) => {
                    self.breaker.record_failure(name).await;
                }
            }
        }

        Err(ChainExhausted::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::tests::UnreachableStore;
    use crate::breaker::{BreakerPolicy, BreakerStore, InMemoryBreakerStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Duration;

    enum Behavior {
        Reply(&'static str),
        Fail,
        TimedOut,
        Hang(Duration),
    }

    struct ScriptedProvider {
        name: &'static str,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name,
                behavior,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn invoke(&self, _request: &ChatRequest) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Reply(text) => Ok(text.to_string()),
                Behavior::Fail => Err(ProviderError::Upstream {
                    status: 500,
                    message: "boom".to_string(),
                }),
                Behavior::TimedOut => Err(ProviderError::Timeout),
                Behavior::Hang(delay) => {
                    tokio::time::sleep(*delay).await;
                    Ok("too late".to_string())
                }
            }
        }
    }

    fn chain(
        providers: &[&Arc<ScriptedProvider>],
    ) -> (FallbackChain, Arc<InMemoryBreakerStore>) {
        let store = Arc::new(InMemoryBreakerStore::new());
        let breaker = CircuitBreaker::new(store.clone(), BreakerPolicy::default());
        let providers = providers
            .iter()
            .map(|p| Arc::clone(*p) as Arc<dyn ChatProvider>)
            .collect();
        (FallbackChain::new(providers, breaker), store)
    }

    fn request() -> ChatRequest {
        ChatRequest::new("hello", None, Duration::from_secs(12))
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_wins_and_later_providers_are_untouched() {
        let a = ScriptedProvider::new("A", Behavior::Reply("hello"));
        let b = ScriptedProvider::new("B", Behavior::Reply("other"));
        let c = ScriptedProvider::new("C", Behavior::Reply("other"));
        let (chain, _) = chain(&[&a, &b, &c]);

        let result = chain.handle_chat(&request()).await;

        assert_eq!(
            result,
            Ok(ChatReply {
                reply: "hello".to_string(),
                provider: "A".to_string()
            })
        );
        assert_eq!((a.calls(), b.calls(), c.calls()), (1, 0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_falls_through_to_next_provider() {
        let a = ScriptedProvider::new("A", Behavior::Fail);
        let b = ScriptedProvider::new("B", Behavior::Reply("from b"));
        let (chain, store) = chain(&[&a, &b]);

        let result = chain.handle_chat(&request()).await.unwrap();

        assert_eq!(result.provider, "B");
        assert_eq!(store.failure_count("A").await.unwrap(), 1);
        assert_eq!(store.failure_count("B").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn three_failed_requests_open_breaker_and_fourth_skips() {
        let a = ScriptedProvider::new("A", Behavior::Fail);
        let b = ScriptedProvider::new("B", Behavior::Reply("ok"));
        let (chain, _) = chain(&[&a, &b]);

        for _ in 0..3 {
            chain.handle_chat(&request()).await.unwrap();
        }
        assert_eq!(a.calls(), 3);

        let result = chain.handle_chat(&request()).await.unwrap();
        assert_eq!(result.provider, "B");
        assert_eq!(a.calls(), 3);
        assert_eq!(b.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn provider_is_retried_first_after_cooldown() {
        let a = ScriptedProvider::new("A", Behavior::Fail);
        let b = ScriptedProvider::new("B", Behavior::Reply("ok"));
        let (chain, _) = chain(&[&a, &b]);
        for _ in 0..3 {
            chain.handle_chat(&request()).await.unwrap();
        }

        tokio::time::advance(Duration::from_secs(5 * 60)).await;
        chain.handle_chat(&request()).await.unwrap();

        assert_eq!(a.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn all_failing_returns_unavailable() {
        let a = ScriptedProvider::new("A", Behavior::Fail);
        let b = ScriptedProvider::new("B", Behavior::Fail);
        let (chain, _) = chain(&[&a, &b]);

        let result = chain.handle_chat(&request()).await;

        assert_eq!(result, Err(ChainExhausted::Unavailable));
        assert_eq!((a.calls(), b.calls()), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn all_ineligible_returns_unavailable_without_invoking() {
        let a = ScriptedProvider::new("A", Behavior::Reply("never"));
        let (chain, store) = chain(&[&a]);
        store.set_open("A", Duration::from_secs(60)).await.unwrap();

        let result = chain.handle_chat(&request()).await;

        assert_eq!(result, Err(ChainExhausted::Unavailable));
        assert_eq!(a.calls(), 0);
        assert_eq!(store.failure_count("A").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_chain_is_unavailable() {
        let (chain, _) = chain(&[]);
        assert_eq!(
            chain.handle_chat(&request()).await,
            Err(ChainExhausted::Unavailable)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_aborts_in_flight_call_and_stops_chain() {
        let a = ScriptedProvider::new("A", Behavior::Hang(Duration::from_millis(500)));
        let b = ScriptedProvider::new("B", Behavior::Reply("ok"));
        let (chain, store) = chain(&[&a, &b]);

        let req = ChatRequest::new("hello", None, Duration::from_millis(200));
        let result = chain.handle_chat(&req).await;

        assert_eq!(result, Err(ChainExhausted::DeadlineExceeded));
        assert_eq!(b.calls(), 0);
        assert_eq!(store.failure_count("A").await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn adapter_timeout_stops_chain_like_the_deadline() {
        let a = ScriptedProvider::new("A", Behavior::TimedOut);
        let b = ScriptedProvider::new("B", Behavior::Reply("ok"));
        let (chain, store) = chain(&[&a, &b]);

        let result = chain.handle_chat(&request()).await;

        assert_eq!(result, Err(ChainExhausted::DeadlineExceeded));
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 0);
        assert_eq!(store.failure_count("A").await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_request_attempts_nothing() {
        let a = ScriptedProvider::new("A", Behavior::Reply("ok"));
        let (chain, _) = chain(&[&a]);

        let req = ChatRequest::new("hello", None, Duration::ZERO);

        assert_eq!(
            chain.handle_chat(&req).await,
            Err(ChainExhausted::DeadlineExceeded)
        );
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn unreachable_store_still_serves_replies() {
        let a = ScriptedProvider::new("A", Behavior::Fail);
        let b = ScriptedProvider::new("B", Behavior::Reply("ok"));
        let breaker = CircuitBreaker::new(Arc::new(UnreachableStore), BreakerPolicy::default());
        let chain = FallbackChain::new(vec![a.clone(), b.clone()], breaker);

        for _ in 0..4 {
            assert_eq!(chain.handle_chat(&request()).await.unwrap().provider, "B");
        }
        assert_eq!(a.calls(), 4);
    }
}
