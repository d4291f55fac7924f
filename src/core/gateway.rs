//! Single entry point for reasoning calls.
//!
//! Order of operations per call: cache lookup, token bucket, concurrency
//! permit, network call, caller's `accept` check, cache fill. Cache hits
//! never touch the limiter. Output the caller rejects is never cached, so
//! a retry of the same input goes back to the backend.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::adapters::{Reasoner, ReasoningRequest};

use super::cache::{cache_key, ResponseCache};
use super::limiter::RateGuard;

/// Cached, rate-limited access to a [`Reasoner`]
#[derive(Clone)]
pub struct ReasoningGateway {
    reasoner: Arc<dyn Reasoner>,
    guard: Arc<RateGuard>,
    cache: Arc<ResponseCache>,
}

impl ReasoningGateway {
    pub fn new(reasoner: Arc<dyn Reasoner>, guard: Arc<RateGuard>, cache: Arc<ResponseCache>) -> Self {
        Self {
            reasoner,
            guard,
            cache,
        }
    }

    pub fn guard(&self) -> &RateGuard {
        &self.guard
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Run a request and interpret the raw model text with `accept`.
    ///
    /// The outer error is a failed call. The inner result is whatever
    /// `accept` returned; the text is cached only when it returned `Ok`.
    #[instrument(skip(self, request, accept), fields(model = %request.model, backend = self.reasoner.name()))]
    pub async fn complete<T, E>(
        &self,
        request: &ReasoningRequest,
        accept: impl FnOnce(&str) -> Result<T, E>,
    ) -> Result<Result<T, E>> {
        let key = cache_key(&request.model, &request.system, &request.user);

        if let Some(hit) = self.cache.get(&key) {
            debug!("Reasoning cache hit");
            return Ok(accept(&hit));
        }

        let output = {
            let _permit = self
                .guard
                .acquire()
                .await
                .context("Reasoning concurrency guard closed")?;
            self.reasoner.complete(request).await?
        };

        debug!(tokens = ?output.tokens_used, "Reasoning call completed");
        let accepted = accept(&output.content);
        if accepted.is_ok() {
            self.cache.set(key, output.content);
        } else {
            debug!("Reasoning output rejected, not caching");
        }
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ReasoningOutput;
    use crate::core::limiter::TokenBucket;
    use async_trait::async_trait;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingReasoner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Reasoner for CountingReasoner {
        fn name(&self) -> &str {
            "counting"
        }

        async fn complete(&self, request: &ReasoningRequest) -> Result<ReasoningOutput> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ReasoningOutput::new(format!("echo{}:{}", n, request.user)))
        }
    }

    fn gateway(reasoner: Arc<CountingReasoner>, bucket: TokenBucket) -> ReasoningGateway {
        ReasoningGateway::new(
            reasoner,
            Arc::new(RateGuard::new(bucket, 2, Duration::from_millis(1))),
            Arc::new(ResponseCache::new()),
        )
    }

    fn any_text(raw: &str) -> Result<String, Infallible> {
        Ok(raw.to_string())
    }

    #[tokio::test]
    async fn test_repeat_request_served_from_cache() {
        let reasoner = Arc::new(CountingReasoner {
            calls: AtomicUsize::new(0),
        });
        let gateway = gateway(reasoner.clone(), TokenBucket::new(10.0, 1.0));

        let request = ReasoningRequest::new("m", "sys", "fog at DEL");
        let first = gateway.complete(&request, any_text).await.unwrap().unwrap();
        let second = gateway.complete(&request, any_text).await.unwrap().unwrap();

        assert_eq!(first, "echo0:fog at DEL");
        assert_eq!(first, second);
        assert_eq!(reasoner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_bypasses_empty_bucket() {
        let reasoner = Arc::new(CountingReasoner {
            calls: AtomicUsize::new(0),
        });
        // One token, refills effectively never
        let gateway = gateway(reasoner.clone(), TokenBucket::new(1.0, 0.0));

        let request = ReasoningRequest::new("m", "sys", "same");
        gateway.complete(&request, any_text).await.unwrap().unwrap();

        let again = tokio::time::timeout(Duration::from_millis(100), gateway.complete(&request, any_text)).await;
        assert!(again.is_ok(), "cache hit should not wait on the bucket");
        assert_eq!(gateway.guard().bucket().tokens(), 0.0);
    }

    #[tokio::test]
    async fn test_rejected_output_not_cached() {
        let reasoner = Arc::new(CountingReasoner {
            calls: AtomicUsize::new(0),
        });
        let gateway = gateway(reasoner.clone(), TokenBucket::new(10.0, 1.0));
        let request = ReasoningRequest::new("m", "sys", "fog at DEL");

        // Only the second reply is acceptable
        let accept = |raw: &str| {
            if raw.starts_with("echo1") {
                Ok(raw.to_string())
            } else {
                Err("unusable")
            }
        };

        let first = gateway.complete(&request, accept).await.unwrap();
        assert_eq!(first, Err("unusable"));
        assert!(gateway.cache().is_empty());

        let retry = gateway.complete(&request, accept).await.unwrap();
        assert_eq!(retry.as_deref(), Ok("echo1:fog at DEL"));
        assert_eq!(reasoner.calls.load(Ordering::SeqCst), 2);

        // Accepted output is now served from the cache
        gateway.complete(&request, accept).await.unwrap().unwrap();
        assert_eq!(reasoner.calls.load(Ordering::SeqCst), 2);
    }
}
