//! Bounded retry with exponential backoff for remote calls

use std::future::Future;

use crate::config::RetryPolicy;
use crate::remote::RemoteResult;

/// Run `operation` until it succeeds, fails non-transiently, or exhausts the
/// policy. Only transient failures are retried; ownership and schema errors
/// surface immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> RemoteResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RemoteResult<T>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    "{label} attempt {attempt}/{} failed: {error}; retrying in {delay:?}",
                    policy.max_attempts
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::remote::RemoteError;

    use super::*;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = retry_with_backoff(&fast_policy(), "test op", move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RemoteError::Transient("blip".to_string()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exhaustion_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: RemoteResult<()> = retry_with_backoff(&fast_policy(), "test op", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::Transient("still down".to_string()))
            }
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn non_transient_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: RemoteResult<()> = retry_with_backoff(&fast_policy(), "test op", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::Ownership("not yours".to_string()))
            }
        })
        .await;

        assert!(matches!(result.unwrap_err(), RemoteError::Ownership(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn first_success_needs_no_retry() {
        let result = retry_with_backoff(&fast_policy(), "test op", || async { Ok(1) }).await;
        assert_eq!(result.unwrap(), 1);
    }
}
