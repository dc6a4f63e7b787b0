//! Generic restart-on-failure supervision for long-running source tasks.
//!
//! Every supervised task's body returns once it hits an unrecoverable
//! error (or simply finishes); this wrapper restarts it after the standard
//! 10 s backoff. Cancellation is terminal — once `shutdown` fires, the
//! task is not restarted (spec §5: "must treat cancellation as terminal").

use std::future::Future;
use std::time::Duration;

use ingest_core::errors::CoreError;
use tokio_util::sync::CancellationToken;

const RESTART_BACKOFF: Duration = Duration::from_secs(10);

/// Runs `make_task()` repeatedly. `make_task` is called fresh on every
/// restart so it can recreate per-attempt state (e.g. a new listener
/// connection). Logs failures with `name` for context and stops as soon as
/// `shutdown` is cancelled, even mid-backoff.
pub async fn run_supervised<F, Fut>(name: &str, shutdown: CancellationToken, mut make_task: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), CoreError>>,
{
    loop {
        if shutdown.is_cancelled() {
            return;
        }
        let outcome = tokio::select! {
            _ = shutdown.cancelled() => return,
            outcome = make_task() => outcome,
        };
        match outcome {
            Ok(()) => log::info!("supervised task '{name}' completed"),
            Err(err) => log::error!("supervised task '{name}' failed: {err}"),
        }
        if shutdown.is_cancelled() {
            return;
        }
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(RESTART_BACKOFF) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn stops_restarting_once_cancelled() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();
        let shutdown_for_task = shutdown.clone();
        let attempts_for_task = attempts.clone();

        let handle = tokio::spawn(async move {
            run_supervised("test-task", shutdown_for_task, move || {
                let attempts = attempts_for_task.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(CoreError::ConnectFailed { client_id: "x".to_string() })
                }
            })
            .await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.cancel();
        handle.await.unwrap();
        assert!(attempts.load(Ordering::SeqCst) >= 1);
    }
}
