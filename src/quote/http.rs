//! Request pacing and transient-failure retry for venue HTTP APIs.

use crate::error::QuoteError;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Response;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::debug;

const DEFAULT_REQUESTS_PER_SECOND: NonZeroU32 = match NonZeroU32::new(5) {
    Some(n) => n,
    None => unreachable!(),
};

/// Rate limiter plus retry policy shared by one API client.
pub struct RequestPacer {
    limiter: DefaultDirectRateLimiter,
    retry_attempts: usize,
}

impl RequestPacer {
    pub fn new(requests_per_second: u32, retry_attempts: usize) -> Self {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(DEFAULT_REQUESTS_PER_SECOND);
        Self {
            limiter: RateLimiter::direct(Quota::per_second(rate)),
            retry_attempts,
        }
    }

    /// Runs `request`, waiting for a rate-limit permit before each try and
    /// retrying only transient failures.
    pub async fn run<T, F, Fut>(&self, mut request: F) -> Result<T, QuoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, QuoteError>>,
    {
        let strategy = ExponentialBackoff::from_millis(10)
            .factor(10)
            .max_delay(Duration::from_secs(2))
            .map(jitter)
            .take(self.retry_attempts);

        let limiter = &self.limiter;
        RetryIf::spawn(
            strategy,
            || {
                let attempt = request();
                async move {
                    limiter.until_ready().await;
                    attempt.await
                }
            },
            |e: &QuoteError| {
                let transient = e.is_transient();
                if transient {
                    debug!("Transient venue error, retrying: {}", e);
                }
                transient
            },
        )
        .await
    }
}

/// Decodes a JSON body, turning non-success statuses into [`QuoteError::Status`].
pub async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, QuoteError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(QuoteError::Status {
            status: status.as_u16(),
            body,
        });
    }
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| QuoteError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let pacer = RequestPacer::new(100, 3);
        let calls = AtomicUsize::new(0);
        let result = pacer
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(QuoteError::Status { status: 503, body: String::new() })
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_does_not_retry_no_route() {
        let pacer = RequestPacer::new(100, 3);
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = pacer
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(QuoteError::NoRoute("none".into())) }
            })
            .await;
        assert!(matches!(result, Err(QuoteError::NoRoute(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
