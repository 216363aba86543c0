//! Fixed-delay retry loops that stop when the process is shutting down.
//!
//! An attempt that is already running is never interrupted; cancellation is
//! only observed between attempts, so a unit of work either finishes or fails
//! on its own terms.

use backon::{ConstantBuilder, Retryable};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    #[error("retry loop cancelled")]
    Cancelled,

    #[error("permanent failure: {0}")]
    Permanent(E),
}

/// Retries `op` every `delay` while `retryable` accepts the error and
/// `shutdown` has not fired.
pub async fn retry_while<T, E, F, Fut, P>(
    shutdown: &CancellationToken,
    delay: Duration,
    what: &str,
    op: F,
    retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let backoff = ConstantBuilder::default()
        .with_delay(delay)
        .with_max_times(usize::MAX);

    let result = op
        .retry(backoff)
        .when(|err: &E| !shutdown.is_cancelled() && retryable(err))
        .notify(|err: &E, after: Duration| {
            error!("{} failed: {}; retrying in {:?}", what, err, after);
        })
        .await;

    match result {
        Ok(value) => Ok(value),
        Err(_) if shutdown.is_cancelled() => Err(RetryError::Cancelled),
        Err(err) => Err(RetryError::Permanent(err)),
    }
}

/// Retries `op` every `delay` until it succeeds or `shutdown` fires.
pub async fn retry_until_cancelled<T, E, F, Fut>(
    shutdown: &CancellationToken,
    delay: Duration,
    what: &str,
    op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_while(shutdown, delay, what, op, |_| true).await
}
