//! Cancellable waiting.
//!
//! [`sleep`] is the only way the engine waits on a timer, and [`cancellable`]
//! is how it waits on a repository or source future.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::IngestError;

/// Wait for `duration`, or return [`IngestError::Cancelled`] as soon as `cancel` fires.
///
/// An already-cancelled token returns immediately. The timer is dropped on every exit path.
pub async fn sleep(cancel: &CancellationToken, duration: Duration) -> Result<(), IngestError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(IngestError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Race `fut` against `cancel`; the future is dropped if cancellation wins.
pub async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T, IngestError>
where
    F: Future<Output = Result<T, IngestError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(IngestError::Cancelled),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn sleeps_full_duration() {
        let cancel = CancellationToken::new();
        let start = Instant::now();
        sleep(&cancel, Duration::from_millis(250)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn returns_early_on_cancel() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = sleep(&cancel, Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, IngestError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn already_cancelled_returns_immediately() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(sleep(&cancel, Duration::from_secs(3600)).await.is_err());
    }

    #[tokio::test]
    async fn cancellable_passes_result_through() {
        let cancel = CancellationToken::new();
        let value = cancellable(&cancel, async { Ok::<_, IngestError>(7) }).await.unwrap();
        assert_eq!(value, 7);

        cancel.cancel();
        let err = cancellable(&cancel, std::future::pending::<Result<(), IngestError>>())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
