use crate::error::NetworkError;
use anyhow::Result;
use std::{future::Future, time::Duration};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

/// Poll `condition` every `interval` until it holds or `timeout` elapsed.
///
/// Returns `Ok(false)` on timeout and a `Cancelled` error as soon as `cancel`
/// fires. The condition is checked at least once.
pub async fn poll_until<F, Fut>(
    mut condition: F,
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;

    loop {
        if cancel.is_cancelled() {
            return Err(NetworkError::Cancelled.into());
        }

        if condition().await {
            return Ok(true);
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(NetworkError::Cancelled.into()),
            _ = sleep(interval.min(deadline - now)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::network_error;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    #[tokio::test(start_paused = true)]
    async fn returns_true_once_condition_holds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let held = poll_until(
            move || {
                let counter = counter.clone();
                async move { counter.fetch_add(1, Ordering::SeqCst) >= 2 }
            },
            Duration::from_millis(100),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .expect("should not fail");

        assert!(held);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out() {
        let start = Instant::now();

        let held = poll_until(
            || async { false },
            Duration::from_millis(300),
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await
        .expect("should not fail");

        assert!(!held);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_wait() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        tokio::spawn(async move {
            sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let err = poll_until(
            || async { false },
            Duration::from_secs(1),
            Duration::from_secs(60),
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(network_error(&err), Some(NetworkError::Cancelled)));
    }
}
