use std::future::Future;
use std::time::Duration;

use anyhow::{Context as _, Result};
use tokio::time::Instant;

/// Polls `f` until it yields a value, backing off from 10ms up to 200ms.
pub async fn wait_until<T, F, Fut>(what: &str, timeout: Duration, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + timeout;
    let mut backoff = Duration::from_millis(10);

    loop {
        if let Some(value) = f().await.with_context(|| format!("poll {what}"))? {
            return Ok(value);
        }
        if Instant::now() >= deadline {
            anyhow::bail!("timeout waiting for {what}");
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(Duration::from_millis(200));
    }
}
