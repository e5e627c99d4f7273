use std::{future::Future, time::Duration};

use rand::Rng;
use tonic::{Code, Status};

use crate::breaker::CircuitBreaker;

/// Attempts per call, including the first.
const MAX_ATTEMPTS: u32 = 3;
/// Base delay between attempts; grows linearly per attempt.
const BACKOFF_BASE_MS: u64 = 1000;
/// Jitter applied to each delay, as a fraction of the delay.
const JITTER: f64 = 0.1;

/// Invoke a gRPC call with bounded retries and a circuit breaker.
///
/// Only `Unavailable` and `Aborted` are retried; any other status is
/// returned immediately. Delays are linear with ±10% jitter. The breaker
/// is keyed by `method` and consulted before every attempt.
pub async fn retry_call<T, F, Fut>(
    breaker: &CircuitBreaker,
    method: &str,
    mut call: F,
) -> Result<T, Status>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Status>>,
{
    let mut last_status = Status::unavailable("no attempts made");
    for attempt in 1..=MAX_ATTEMPTS {
        if !breaker.allow(method) {
            return Err(Status::unavailable(format!("circuit open for {method}")));
        }

        match call().await {
            Ok(value) => {
                breaker.record_success(method);
                return Ok(value);
            },
            Err(status) => {
                let retryable = matches!(status.code(), Code::Unavailable | Code::Aborted);
                breaker.record_failure(method);
                if !retryable {
                    return Err(status);
                }
                tracing::warn!(
                    method,
                    attempt,
                    code = ?status.code(),
                    "grpc call failed, will retry"
                );
                last_status = status;
            },
        }

        if attempt < MAX_ATTEMPTS {
            tokio::time::sleep(backoff_delay(attempt)).await;
        }
    }
    Err(last_status)
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE_MS * u64::from(attempt);
    let spread = (base as f64 * JITTER) as u64;
    let jitter = if spread == 0 {
        0
    } else {
        rand::rng().random_range(0..=2 * spread)
    };
    // base ± spread
    Duration::from_millis(base - spread + jitter)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn returns_first_success() {
        let breaker = CircuitBreaker::new();
        let calls = AtomicU32::new(0);
        let result = retry_call(&breaker, "m", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Status>(7) }
        })
        .await;
        assert_eq!(result.expect("should succeed"), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_unavailable_then_succeeds() {
        let breaker = CircuitBreaker::new();
        let calls = AtomicU32::new(0);
        let result = retry_call(&breaker, "m", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Status::unavailable("down"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.expect("should succeed"), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_retry_invalid_argument() {
        let breaker = CircuitBreaker::new();
        let calls = AtomicU32::new(0);
        let result: Result<u64, Status> = retry_call(&breaker, "m", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Status::invalid_argument("bad")) }
        })
        .await;
        assert_eq!(
            result.expect_err("should fail").code(),
            Code::InvalidArgument
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_attempts() {
        let breaker = CircuitBreaker::new();
        let calls = AtomicU32::new(0);
        let result: Result<u64, Status> = retry_call(&breaker, "m", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Status::aborted("conflict")) }
        })
        .await;
        assert_eq!(result.expect_err("should fail").code(), Code::Aborted);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
