//! Timed behavior of the limiter policies, under tokio's paused test time.

use floodgate::{AdaptiveRateLimiter, RateLimitConfig, RateLimiter, SimpleRateLimiter};
use std::time::Duration;
use tokio::time::Instant;

fn config(requests_per_second: f64, burst_size: u32) -> RateLimitConfig {
    RateLimitConfig { requests_per_second, burst_size, ..RateLimitConfig::default() }
}

#[tokio::test(start_paused = true)]
async fn burst_of_five_is_immediate_then_the_sixth_waits_the_refill_interval() {
    let limiter = AdaptiveRateLimiter::new(config(2.0, 5)).expect("valid config");

    let start = Instant::now();
    for _ in 0..5 {
        limiter.acquire("example.org", 1).await;
    }
    assert_eq!(start.elapsed(), Duration::ZERO, "full burst must not wait");

    let waited = Instant::now();
    limiter.acquire("example.org", 1).await;
    assert_eq!(waited.elapsed(), Duration::from_millis(500), "1 token at 2 req/s");
}

#[tokio::test(start_paused = true)]
async fn weighted_acquires_divide_the_burst() {
    let limiter = AdaptiveRateLimiter::new(config(2.0, 5)).expect("valid config");

    // floor(5 / 2) = 2 immediate weighted acquires.
    let start = Instant::now();
    limiter.acquire("example.org", 2).await;
    limiter.acquire("example.org", 2).await;
    assert_eq!(start.elapsed(), Duration::ZERO);

    // One token left; a weight-2 acquire owes one more.
    let waited = Instant::now();
    limiter.acquire("example.org", 2).await;
    assert_eq!(waited.elapsed(), Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn retry_after_cooldown_delays_the_next_acquire_at_least_that_long() {
    let limiter = AdaptiveRateLimiter::new(config(1.0, 1)).expect("valid config");

    limiter.acquire("example.org", 1).await;
    limiter.on_response("example.org", 429, Some(2));

    // Rate halved to 0.5 and a 2-token debt recorded: the bucket owes
    // 3 tokens at 0.5 tokens/s.
    let waited = Instant::now();
    limiter.acquire("example.org", 1).await;
    let elapsed = waited.elapsed();
    assert!(elapsed >= Duration::from_secs(2), "cooldown must outlast Retry-After");
    assert_eq!(elapsed, Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn max_delay_forces_the_wait_to_be_rechecked_in_slices() {
    let limiter = AdaptiveRateLimiter::new(RateLimitConfig {
        requests_per_second: 2.0,
        burst_size: 1,
        max_delay_ms: 125,
        ..RateLimitConfig::default()
    })
    .expect("valid config");

    limiter.acquire("example.org", 1).await;

    // The full deficit is 500 ms but each slice is capped at 125 ms; the
    // recheck loop still converges on the exact total.
    let waited = Instant::now();
    limiter.acquire("example.org", 1).await;
    assert_eq!(waited.elapsed(), Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn concurrent_acquirers_share_the_refill_fairly_enough_to_serialize() {
    let limiter =
        std::sync::Arc::new(AdaptiveRateLimiter::new(config(10.0, 1)).expect("valid config"));

    // One token up front, then one every 100 ms; three acquirers finish by
    // t = 200 ms regardless of wakeup order.
    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..3 {
        let limiter = limiter.clone();
        handles.push(tokio::spawn(async move {
            limiter.acquire("example.org", 1).await;
        }));
    }
    for handle in handles {
        handle.await.expect("join");
    }
    assert_eq!(start.elapsed(), Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn adaptive_decay_slows_subsequent_acquires() {
    let limiter = AdaptiveRateLimiter::new(config(2.0, 1)).expect("valid config");

    limiter.acquire("example.org", 1).await;
    // Two 429s: 2.0 -> 1.0 -> 0.5 req/s.
    limiter.on_response("example.org", 429, None);
    limiter.on_response("example.org", 429, None);

    let waited = Instant::now();
    limiter.acquire("example.org", 1).await;
    assert_eq!(waited.elapsed(), Duration::from_millis(2000), "1 token at 0.5 req/s");
}

#[tokio::test(start_paused = true)]
async fn simple_limiter_spaces_back_to_back_requests() {
    let limiter = SimpleRateLimiter::new(250);

    let start = Instant::now();
    limiter.acquire("example.org", 1).await;
    limiter.acquire("example.org", 1).await;
    limiter.acquire("example.org", 1).await;
    assert_eq!(start.elapsed(), Duration::from_millis(500), "two 250 ms gaps");
}

#[tokio::test(start_paused = true)]
async fn simple_limiter_does_not_couple_domains() {
    let limiter = SimpleRateLimiter::new(1000);

    let start = Instant::now();
    limiter.acquire("a.org", 1).await;
    limiter.acquire("b.org", 1).await;
    limiter.acquire("c.org", 1).await;
    assert_eq!(start.elapsed(), Duration::ZERO);
}

mod backoff_logging {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl<'a> MakeWriter<'a> for CapturedLog {
        type Writer = CapturedLogWriter;
        fn make_writer(&'a self) -> Self::Writer {
            CapturedLogWriter(self.0.clone())
        }
    }

    struct CapturedLogWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for CapturedLogWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn a_429_emits_a_backoff_warning_naming_the_domain() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(CapturedLog(buffer.clone())))
            .with_target(true)
            .without_time()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let limiter = AdaptiveRateLimiter::default();
        limiter.on_response("https://www.example.org/page", 429, Some(5));

        let logs = String::from_utf8(buffer.lock().unwrap().clone()).expect("utf8 logs");
        assert!(logs.contains("floodgate::rate_limit"), "log target present: {logs}");
        assert!(logs.contains("example.org"), "domain present: {logs}");
        assert!(logs.contains("halving"), "backoff warning present: {logs}");
    }
}
