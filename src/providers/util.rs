use crate::core::error::{EngineError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retries an async operation with exponential backoff
///
/// # Parameters
/// - `operation`: Closure returning a future
/// - `retries`: Number of retry attempts (total runs = 1 initial + retries)
/// - `base_delay_ms`: Delay before the first retry, doubled for each later one
///
/// # Returns
/// Either the successful result or the last error. Errors that are not
/// retryable are returned immediately.
pub async fn with_retry<F, Fut, T>(mut operation: F, retries: usize, base_delay_ms: u64) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(err) => {
                if attempt > retries || !err.is_retryable() {
                    return Err(err);
                }
                let delay = backoff_delay(base_delay_ms, attempt);
                debug!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}...",
                    attempt,
                    retries + 1,
                    err,
                    delay
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn backoff_delay(base_delay_ms: u64, attempt: usize) -> Duration {
    let exponent = (attempt.saturating_sub(1)).min(16) as u32;
    Duration::from_millis(base_delay_ms.saturating_mul(1u64 << exponent))
}

/// Maps a transport failure onto the provider error of `ticker`.
pub fn transport_error(ticker: &str, err: reqwest::Error) -> EngineError {
    if err.is_timeout() {
        EngineError::upstream(ticker, format!("request timed out: {err}"))
    } else {
        EngineError::upstream(ticker, format!("request error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff_delay(100, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(100, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(100, 3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_retries_transient_errors_until_success() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result = with_retry(
            move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(EngineError::upstream("AAPL", "HTTP 503"))
                } else {
                    Ok(n)
                }
            },
            2,
            1,
        )
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_retry_budget() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result: Result<()> = with_retry(
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::upstream("AAPL", "HTTP 429"))
            },
            2,
            1,
        )
        .await;
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_errors() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result: Result<()> = with_retry(
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::insufficient("NEWCO", "no price history available"))
            },
            2,
            1,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
