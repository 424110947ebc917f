//! Bounded fan-out over a list of items with first-error cancellation.
//!
//! `worker_count` tasks pull from a queue of capacity `worker_count`. The
//! first failing item cancels every other worker, fires the optional
//! [`CancelHook`], and is the error returned once all workers have joined.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::IngestError;

/// Callback fired once when the pool cancels itself after a failure.
pub type CancelHook = Arc<dyn Fn() + Send + Sync>;

/// Run `process_item` over `items` on `worker_count` parallel workers.
///
/// Returns the first processing error, otherwise [`IngestError::Cancelled`] if
/// `cancel` fired, otherwise `Ok(())`. Never returns before every worker has stopped.
pub async fn process<T, F, Fut>(
    cancel: &CancellationToken,
    worker_count: usize,
    items: Vec<T>,
    process_item: F,
    on_cancel: Option<CancelHook>,
) -> Result<(), IngestError>
where
    T: Send + 'static,
    F: Fn(CancellationToken, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), IngestError>> + Send + 'static,
{
    let worker_count = worker_count.max(1);
    let inner = cancel.child_token();
    let (tx, rx) = mpsc::channel::<T>(worker_count);
    let rx = Arc::new(Mutex::new(rx));
    let process_item = Arc::new(process_item);
    let mut tasks = JoinSet::new();

    for _ in 0..worker_count {
        let rx = Arc::clone(&rx);
        let inner = inner.clone();
        let process_item = Arc::clone(&process_item);
        tasks.spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = inner.cancelled() => return Ok(()),
                    next = async { rx.lock().await.recv().await } => next,
                };
                let Some(item) = next else {
                    return Ok(());
                };
                process_item(inner.clone(), item).await?;
            }
        });
    }

    // Feeder: stops enqueueing as soon as the pool is cancelled.
    {
        let inner = inner.clone();
        tasks.spawn(async move {
            for item in items {
                tokio::select! {
                    biased;
                    _ = inner.cancelled() => break,
                    sent = tx.send(item) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            Ok(())
        });
    }

    let mut first_error: Option<IngestError> = None;
    while let Some(joined) = tasks.join_next().await {
        let result = joined
            .unwrap_or_else(|e| Err(IngestError::Other(format!("worker task failed: {e}"))));
        if let Err(err) = result {
            // Workers unwinding from the caller's cancellation are not failures.
            if err.is_cancelled() && cancel.is_cancelled() {
                continue;
            }
            if first_error.is_none() {
                debug!(error = %err, "worker pool cancelling after first error");
                inner.cancel();
                if let Some(hook) = &on_cancel {
                    hook();
                }
                first_error = Some(err);
            }
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }
    if cancel.is_cancelled() {
        return Err(IngestError::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn processes_every_item() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let cancel = CancellationToken::new();

        process(
            &cancel,
            4,
            (0..100u64).collect(),
            move |_cancel, _item| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            None,
        )
        .await
        .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn empty_input_is_ok() {
        let cancel = CancellationToken::new();
        process(&cancel, 50, Vec::<u64>::new(), |_c, _i| async { Ok(()) }, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn first_error_cancels_and_fires_hook_once() {
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let hook_counter = Arc::clone(&hook_calls);
        let hook: CancelHook = Arc::new(move || {
            hook_counter.fetch_add(1, Ordering::SeqCst);
        });
        let cancel = CancellationToken::new();

        let err = process(
            &cancel,
            2,
            vec![5u64, 6],
            |cancel, height| async move {
                if height == 5 {
                    return Err(IngestError::fetch_block(
                        height,
                        IngestError::Source("boom".into()),
                    ));
                }
                // Height 6 is slow enough to observe the cancellation.
                crate::sleep::sleep(&cancel, Duration::from_secs(30)).await
            },
            Some(hook),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("height 5"), "got: {err}");
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
        assert!(!cancel.is_cancelled(), "parent token must stay untouched");
    }

    #[tokio::test]
    async fn remaining_items_are_drained_after_error() {
        let processed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&processed);
        let cancel = CancellationToken::new();

        let result = process(
            &cancel,
            1,
            (0..1000u64).collect(),
            move |_cancel, item| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if item == 0 {
                        Err(IngestError::Source("first".into()))
                    } else {
                        Ok(())
                    }
                }
            },
            None,
        )
        .await;

        assert!(result.is_err());
        assert!(processed.load(Ordering::SeqCst) < 1000);
    }

    #[tokio::test]
    async fn external_cancel_does_not_fire_hook() {
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let hook_counter = Arc::clone(&hook_calls);
        let hook: CancelHook = Arc::new(move || {
            hook_counter.fetch_add(1, Ordering::SeqCst);
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = process(
            &cancel,
            3,
            (0..10u64).collect(),
            |cancel, _item| async move {
                crate::sleep::sleep(&cancel, Duration::from_secs(30)).await
            },
            Some(hook),
        )
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(hook_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn external_cancel_returns_cancelled() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = process(
            &cancel,
            3,
            (0..10u64).collect(),
            |cancel, _item| async move {
                // Workers that swallow cancellation still lead to `Cancelled`.
                let _ = crate::sleep::sleep(&cancel, Duration::from_secs(30)).await;
                Ok(())
            },
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, IngestError::Cancelled));
    }
}
