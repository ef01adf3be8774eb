// ABOUTME: Client-side connect loop for attaching to a sandbox
// ABOUTME: Retries while the sandbox is not ready, bounded by an optional deadline

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::debug;

use crate::error::AttachError;

/// Pause between attempts while the sandbox is still coming up.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Calls `connect` until it succeeds, fails permanently, or the deadline
/// passes. Without a timeout a single attempt is made and its result
/// returned as-is. With one, not-ready rejections are retried every
/// [`RETRY_INTERVAL`]; any other error aborts immediately. The attempt loop
/// checks the deadline itself, so it stops even when the caller is gone.
pub async fn connect_with_retry<T, F, Fut>(
    connect: F,
    timeout: Option<Duration>,
) -> Result<T, AttachError>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, AttachError>> + Send + 'static,
{
    let Some(timeout) = timeout else {
        return connect().await;
    };

    let deadline = Instant::now() + timeout;
    let (tx, mut rx) = mpsc::channel::<Result<T, AttachError>>(1);

    tokio::spawn(async move {
        loop {
            if Instant::now() >= deadline {
                let _ = tx.send(Err(AttachError::Timeout)).await;
                return;
            }
            match connect().await {
                Ok(conn) => {
                    let _ = tx.send(Ok(conn)).await;
                    return;
                }
                Err(err) if err.is_retryable() => {
                    debug!(error = %err, "Sandbox not ready yet, retrying");
                    sleep(RETRY_INTERVAL).await;
                }
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            }
        }
    });

    tokio::select! {
        _ = sleep_until(deadline) => Err(AttachError::Timeout),
        received = rx.recv() => received.unwrap_or(Err(AttachError::Timeout)),
    }
}
