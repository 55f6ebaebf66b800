//! Tower middleware wiring a [`RateLimiter`] around an inner service.
//!
//! Each call runs the sequence the fetch layer would otherwise hand-roll:
//! derive the domain key from the request, await `acquire`, invoke the inner
//! service, and feed the observed outcome back through `on_response`. The
//! limiter never fails a call, so the middleware's error type is the inner
//! service's own.

use crate::rate_limit::RateLimiter;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// Outcome metadata extracted from a response for adaptive feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseMeta {
    /// HTTP status code of the completed call.
    pub status: u16,
    /// Parsed `Retry-After` header, in seconds, when the upstream sent one.
    pub retry_after_secs: Option<u64>,
}

impl ResponseMeta {
    /// Metadata carrying only a status code.
    pub fn status(status: u16) -> Self {
        Self { status, retry_after_secs: None }
    }
}

/// Layer that throttles an inner service per domain.
///
/// `key` derives the domain from a request (it is normalized downstream by
/// the limiter); `observe` extracts [`ResponseMeta`] from a successful
/// response, or `None` to skip feedback for that call.
pub struct ThrottleLayer<K, O> {
    limiter: Arc<dyn RateLimiter>,
    key: K,
    observe: O,
}

impl<K: Clone, O: Clone> Clone for ThrottleLayer<K, O> {
    fn clone(&self) -> Self {
        Self { limiter: self.limiter.clone(), key: self.key.clone(), observe: self.observe.clone() }
    }
}

impl<K, O> ThrottleLayer<K, O> {
    pub fn new(limiter: Arc<dyn RateLimiter>, key: K, observe: O) -> Self {
        Self { limiter, key, observe }
    }
}

impl<S, K: Clone, O: Clone> Layer<S> for ThrottleLayer<K, O> {
    type Service = ThrottleService<S, K, O>;

    fn layer(&self, inner: S) -> Self::Service {
        ThrottleService {
            inner,
            limiter: self.limiter.clone(),
            key: self.key.clone(),
            observe: self.observe.clone(),
        }
    }
}

/// Middleware service produced by [`ThrottleLayer`].
pub struct ThrottleService<S, K, O> {
    inner: S,
    limiter: Arc<dyn RateLimiter>,
    key: K,
    observe: O,
}

impl<S: Clone, K: Clone, O: Clone> Clone for ThrottleService<S, K, O> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            key: self.key.clone(),
            observe: self.observe.clone(),
        }
    }
}

impl<S, K, O, Req> Service<Req> for ThrottleService<S, K, O>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send,
    S::Response: Send,
    S::Error: Send,
    Req: Send + 'static,
    K: Fn(&Req) -> String + Send + Sync + 'static,
    O: Fn(&S::Response) -> Option<ResponseMeta> + Clone + Send + Sync + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let domain = (self.key)(&req);
        let limiter = self.limiter.clone();
        let observe = self.observe.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            limiter.acquire(&domain, 1).await;
            let response = inner.call(req).await?;
            if let Some(meta) = observe(&response) {
                limiter.on_response(&domain, meta.status, meta.retry_after_secs);
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::{AdaptiveRateLimiter, RateLimitConfig, RateLimiter};
    use crate::time::ManualClock;
    use tower::ServiceExt;

    /// Minimal stand-in for an HTTP exchange: url in, status out.
    #[derive(Debug, Clone)]
    struct FakeRequest {
        url: &'static str,
    }

    #[derive(Debug, Clone)]
    struct FakeResponse {
        status: u16,
        retry_after_secs: Option<u64>,
    }

    #[derive(Clone)]
    struct FakeTransport {
        status: u16,
        retry_after_secs: Option<u64>,
        fail: bool,
    }

    impl Service<FakeRequest> for FakeTransport {
        type Response = FakeResponse;
        type Error = std::io::Error;
        type Future = futures::future::Ready<Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: FakeRequest) -> Self::Future {
            if self.fail {
                futures::future::ready(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset",
                )))
            } else {
                futures::future::ready(Ok(FakeResponse {
                    status: self.status,
                    retry_after_secs: self.retry_after_secs,
                }))
            }
        }
    }

    fn throttled(
        limiter: Arc<dyn RateLimiter>,
        transport: FakeTransport,
    ) -> impl Service<FakeRequest, Response = FakeResponse, Error = std::io::Error> + Clone {
        ThrottleLayer::new(
            limiter,
            |req: &FakeRequest| req.url.to_string(),
            |resp: &FakeResponse| Some(ResponseMeta {
                status: resp.status,
                retry_after_secs: resp.retry_after_secs,
            }),
        )
        .layer(transport)
    }

    #[tokio::test]
    async fn successful_call_passes_through() {
        let limiter: Arc<dyn RateLimiter> = Arc::new(AdaptiveRateLimiter::default());
        let service = throttled(
            limiter,
            FakeTransport { status: 200, retry_after_secs: None, fail: false },
        );
        let response = service
            .oneshot(FakeRequest { url: "https://example.org/feed" })
            .await
            .expect("call succeeds");
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn rate_limited_response_feeds_the_limiter() {
        let clock = ManualClock::new();
        let limiter = Arc::new(
            AdaptiveRateLimiter::new(RateLimitConfig::default())
                .expect("valid config")
                .with_clock(clock),
        );
        let service = throttled(
            limiter.clone(),
            FakeTransport { status: 429, retry_after_secs: Some(7), fail: false },
        );
        service
            .oneshot(FakeRequest { url: "https://example.org/feed" })
            .await
            .expect("429 is still a response, not an error");

        let stats = limiter.stats("example.org");
        assert!((stats.requests_per_second - 1.0).abs() < 1e-9, "rate halved");
        assert!((stats.available_tokens - (-7.0)).abs() < 1e-9, "cooldown debt recorded");
        assert_eq!(stats.consecutive_errors, 1);
    }

    #[tokio::test]
    async fn transport_errors_pass_through_without_feedback() {
        let clock = ManualClock::new();
        let limiter = Arc::new(
            AdaptiveRateLimiter::new(RateLimitConfig::default())
                .expect("valid config")
                .with_clock(clock),
        );
        let service = throttled(
            limiter.clone(),
            FakeTransport { status: 0, retry_after_secs: None, fail: true },
        );
        let err = service
            .oneshot(FakeRequest { url: "https://example.org/feed" })
            .await
            .expect_err("transport failure propagates");
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);

        // No response means no feedback; only the acquire touched the bucket.
        let stats = limiter.stats("example.org");
        assert_eq!(stats.consecutive_errors, 0);
        assert!((stats.requests_per_second - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn acquire_consumes_a_token_per_call() {
        let clock = ManualClock::new();
        let limiter = Arc::new(
            AdaptiveRateLimiter::new(RateLimitConfig::default())
                .expect("valid config")
                .with_clock(clock),
        );
        let service = throttled(
            limiter.clone(),
            FakeTransport { status: 200, retry_after_secs: None, fail: false },
        );
        for _ in 0..3 {
            service
                .clone()
                .oneshot(FakeRequest { url: "https://example.org/feed" })
                .await
                .expect("call succeeds");
        }
        let stats = limiter.stats("example.org");
        assert!((stats.available_tokens - 2.0).abs() < 1e-9);
    }
}
