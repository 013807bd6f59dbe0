use crate::error::{MendError, Result};
use std::time::Duration;
use tracing::warn;

/// Upper bound for a single backoff sleep.
const MAX_DELAY: Duration = Duration::from_secs(30);

const NON_RETRYABLE: &[&str] = &["400", "401", "403", "404", "invalid", "unauthorized"];

const RETRYABLE: &[&str] = &[
    "429",
    "500",
    "502",
    "503",
    "504",
    "timeout",
    "timed out",
    "connection refused",
    "connection reset",
    "error sending request",
];

/// Whether a provider error looks transient.
///
/// Client errors (bad request, auth) are never retried, even when the message
/// also mentions a transient pattern.
pub fn is_retryable(err: &MendError) -> bool {
    match err {
        MendError::Authentication(_) | MendError::ProviderNotConfigured(_) | MendError::Configuration(_) => false,
        MendError::Http(e) if e.is_timeout() || e.is_connect() => true,
        other => {
            let msg = other.to_string().to_lowercase();
            !NON_RETRYABLE.iter().any(|p| msg.contains(p)) && RETRYABLE.iter().any(|p| msg.contains(p))
        }
    }
}

/// Run `f` until it succeeds, a non-transient error occurs, or `max_retries`
/// retries are used up. The delay starts at `initial_delay` and doubles per
/// retry, capped at 30 seconds.
pub async fn retry_with_backoff<F, Fut, T>(max_retries: u32, initial_delay: Duration, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = initial_delay;
    let mut attempt = 0;

    loop {
        let err = match f().await {
            Ok(val) => return Ok(val),
            Err(err) => err,
        };

        if attempt >= max_retries || !is_retryable(&err) {
            return Err(err);
        }
        attempt += 1;

        warn!(
            attempt,
            max_attempts = max_retries + 1,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Provider request failed, retrying"
        );

        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_returns_first_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, MendError>("done") }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(3, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(MendError::ApiRequest("Anthropic API error (529 Overloaded): 503 upstream".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_auth_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<u8, _>(MendError::ApiRequest("OpenAI API error (401 Unauthorized): bad key".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(2, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<u8, _>(MendError::ApiRequest("502 Bad Gateway".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_classification() {
        for transient in ["429 Too Many Requests", "504 Gateway Timeout", "operation timed out", "connection reset by peer"] {
            assert!(is_retryable(&MendError::ApiRequest(transient.into())), "{}", transient);
        }
        for permanent in ["400 Bad Request", "404 Not Found", "invalid model", "something odd"] {
            assert!(!is_retryable(&MendError::ApiRequest(permanent.into())), "{}", permanent);
        }
        assert!(!is_retryable(&MendError::Authentication("503".into())));
    }
}
