use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::FlyoverError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone)]
pub struct Cancellation(watch::Receiver<bool>);

#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

pub fn cancellation() -> (CancelHandle, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), Cancellation(rx))
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

impl Cancellation {
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Cancellation(rx)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation is requested; never resolves if the handle was dropped
    /// without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    pub async fn sleep(&mut self, duration: Duration) -> Result<(), FlyoverError> {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(FlyoverError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

#[derive(Debug)]
pub enum RetryError {
    Cancelled,
    Fatal(FlyoverError),
    Exhausted { attempts: u32, last_error: String },
}

impl RetryError {
    pub fn into_error(self, exhausted: impl FnOnce(u32, String) -> FlyoverError) -> FlyoverError {
        match self {
            RetryError::Cancelled => FlyoverError::Cancelled,
            RetryError::Fatal(err) => err,
            RetryError::Exhausted {
                attempts,
                last_error,
            } => exhausted(attempts, last_error),
        }
    }
}

/// Retries recoverable failures and timeouts with backoff; non-recoverable errors return at once.
pub async fn with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    call_timeout: Duration,
    cancel: &mut Cancellation,
    what: &str,
    mut f: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FlyoverError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            outcome = tokio::time::timeout(call_timeout, f()) => outcome,
        };

        let err = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) if !err.is_recoverable() => return Err(RetryError::Fatal(err)),
            Ok(Err(err)) => err.to_string(),
            Err(_) => format!("timed out after {}ms", call_timeout.as_millis()),
        };

        if attempt >= max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last_error: err,
            });
        }

        let backoff = policy.backoff(attempt);
        tracing::warn!(
            what,
            attempt,
            error = %err,
            backoff_ms = backoff.as_millis() as u64,
            "remote call failed, retrying"
        );
        if cancel.sleep(backoff).await.is_err() {
            return Err(RetryError::Cancelled);
        }
    }
}
