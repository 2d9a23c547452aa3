//! Bounded retry-with-delay around operations that can ask to be retried.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// Outcome of a single attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Attempt<T, E> {
    Done(T),
    Retry,
    Fatal(E),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    #[error("retries exceeded after {attempts} attempts")]
    Exceeded { attempts: u32 },
    #[error("{0}")]
    Fatal(E),
}

/// How many times to retry after the first attempt, and how long to wait in between.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }
}

/// Run `op` until it returns `Done` or `Fatal`, at most `policy.retries + 1` times.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let attempts = policy.retries + 1;
    for attempt in 1..=attempts {
        match op().await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fatal(err) => return Err(RetryError::Fatal(err)),
            Attempt::Retry => {
                trace!("attempt {}/{} asked for a retry", attempt, attempts);
                if attempt < attempts {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }
    Err(RetryError::Exceeded { attempts })
}
