//! Cooperative cancellation shared between the signal path and the action path.
//!
//! A `CancellationSource` is the only handle able to trigger cancellation.
//! Every step that may suspend receives a `CancelToken` and checks it on entry;
//! once cancelled, a token stays cancelled.
use crate::error::RunnerError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Owner of the cancellation state. Cancelling is idempotent.
#[derive(Debug, Default)]
pub struct CancellationSource {
    inner: CancellationToken,
}

/// Read-only view of a `CancellationSource`.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: CancellationToken,
}

/// Create a fresh, not-yet-cancelled source together with its token.
pub fn create_source() -> (CancellationSource, CancelToken) {
    let source = CancellationSource::new();
    let token = source.token();
    (source, token)
}

impl CancellationSource {
    pub fn new() -> Self {
        Self {
            inner: CancellationToken::new(),
        }
    }

    /// Derive another token observing this source.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            inner: self.inner.clone(),
        }
    }

    /// Transition to cancelled and wake every task waiting on a derived token.
    /// Calling this again has no effect.
    pub fn cancel(&self) {
        self.inner.cancel();
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Fail with `RunnerError::Cancelled` if cancellation was already requested.
    pub fn check_cancelled(&self) -> Result<(), RunnerError> {
        if self.inner.is_cancelled() {
            Err(RunnerError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }

    /// Run `callback` exactly once when cancellation is requested.
    ///
    /// The callback task is detached; if the process exits first it never runs.
    pub fn on_cancelled<F>(&self, callback: F) -> tokio::task::JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.cancelled().await;
            callback();
        })
    }
}

/// Wait for `duration` unless the token is cancelled first.
///
/// Returns `RunnerError::Cancelled` immediately if the token is already
/// cancelled, or as soon as cancellation arrives mid-wait.
pub async fn sleep(token: &CancelToken, duration: Duration) -> Result<(), RunnerError> {
    token.check_cancelled()?;
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(RunnerError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn new_source_is_not_cancelled() {
        let (source, token) = create_source();
        assert!(!token.is_cancelled());
        assert!(!source.token().is_cancelled());
        assert!(token.check_cancelled().is_ok());
    }

    #[test]
    fn cancel_is_idempotent_and_permanent() {
        let (source, token) = create_source();
        source.cancel();
        source.cancel();
        assert!(token.is_cancelled());
        assert!(token.check_cancelled().unwrap_err().is_cancelled());
        // Tokens derived after cancellation observe it too
        assert!(source.token().is_cancelled());
    }

    #[tokio::test]
    async fn sleep_completes_without_cancellation() {
        let (_source, token) = create_source();
        sleep(&token, Duration::from_millis(10)).await.unwrap();
    }

    #[tokio::test]
    async fn sleep_with_cancelled_token_fails_immediately() {
        let (source, token) = create_source();
        source.cancel();

        let start = Instant::now();
        let err = sleep(&token, Duration::from_secs(30)).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn sleep_cancelled_mid_wait_returns_early() {
        let (source, token) = create_source();

        let start = Instant::now();
        let waiter = tokio::spawn(async move { sleep(&token, Duration::from_secs(30)).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        source.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn on_cancelled_runs_callback_once() {
        let (source, token) = create_source();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let handle = token.on_cancelled(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        source.cancel();
        source.cancel();
        handle.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
