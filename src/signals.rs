/// Signal handling for graceful shutdown.
///
/// Handles SIGTERM and SIGINT (Ctrl-C).
/// First signal: cancel the shared token so the running action unwinds at its
/// next checkpoint.
/// Later signals: logged with their running count, nothing else.
use crate::cancellation::{CancelToken, CancellationSource};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Termination signals the coordinator reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Terminate,
    Interrupt,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Armed,
    ShuttingDown,
}

/// Turns termination signals into a single cancellation.
///
/// Owns the process' `CancellationSource` and the count of shutdown requests.
/// Both are safe to touch from the signal task while an action is in flight.
#[derive(Debug, Default)]
pub struct SignalCoordinator {
    source: CancellationSource,
    requests: AtomicU64,
}

impl SignalCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token to thread through the action.
    pub fn token(&self) -> CancelToken {
        self.source.token()
    }

    /// Number of termination signals received so far.
    pub fn shutdown_requests(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> CoordinatorState {
        if self.shutdown_requests() == 0 {
            CoordinatorState::Armed
        } else {
            CoordinatorState::ShuttingDown
        }
    }

    /// Record a termination signal. Only the first one cancels.
    pub fn handle(&self, signal: ShutdownSignal) -> CoordinatorState {
        let count = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        if count == 1 {
            self.source.cancel();
            tracing::info!(%signal, "Interrupt signal received");
        } else {
            tracing::info!(%signal, count, "Interrupt signal received again");
        }
        CoordinatorState::ShuttingDown
    }

    /// Register SIGTERM and SIGINT handlers and feed every delivery into
    /// [`SignalCoordinator::handle`] from a background task.
    ///
    /// Handlers are registered before this returns, so a signal raised right
    /// afterwards is not lost.
    #[cfg(unix)]
    pub fn listen(self: &Arc<Self>) -> std::io::Result<tokio::task::JoinHandle<()>> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let coordinator = Arc::clone(self);

        Ok(tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    Some(()) = sigterm.recv() => ShutdownSignal::Terminate,
                    Some(()) = sigint.recv() => ShutdownSignal::Interrupt,
                    else => break,
                };
                coordinator.handle(received);
            }
        }))
    }

    #[cfg(not(unix))]
    pub fn listen(self: &Arc<Self>) -> std::io::Result<tokio::task::JoinHandle<()>> {
        let coordinator = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                coordinator.handle(ShutdownSignal::Interrupt);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn starts_armed() {
        let coordinator = SignalCoordinator::new();
        assert_eq!(coordinator.state(), CoordinatorState::Armed);
        assert_eq!(coordinator.shutdown_requests(), 0);
        assert!(!coordinator.token().is_cancelled());
    }

    #[test]
    fn first_signal_cancels() {
        let coordinator = SignalCoordinator::new();
        let token = coordinator.token();

        let state = coordinator.handle(ShutdownSignal::Terminate);

        assert_eq!(state, CoordinatorState::ShuttingDown);
        assert_eq!(coordinator.shutdown_requests(), 1);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn repeated_signals_cancel_exactly_once() {
        let coordinator = SignalCoordinator::new();
        let cancellations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&cancellations);
        let callback = coordinator.token().on_cancelled(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for i in 0..5 {
            let signal = if i % 2 == 0 {
                ShutdownSignal::Interrupt
            } else {
                ShutdownSignal::Terminate
            };
            coordinator.handle(signal);
        }
        callback.await.unwrap();

        assert_eq!(coordinator.shutdown_requests(), 5);
        assert_eq!(cancellations.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.state(), CoordinatorState::ShuttingDown);
    }

    #[test]
    fn signal_names() {
        assert_eq!(ShutdownSignal::Terminate.to_string(), "SIGTERM");
        assert_eq!(ShutdownSignal::Interrupt.to_string(), "SIGINT");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn listen_cancels_on_raised_sigterm() {
        let coordinator = Arc::new(SignalCoordinator::new());
        let token = coordinator.token();
        let listener = coordinator.listen().unwrap();

        nix::sys::signal::raise(nix::sys::signal::Signal::SIGTERM).unwrap();

        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .expect("SIGTERM should cancel the token");
        assert_eq!(coordinator.shutdown_requests(), 1);
        listener.abort();
    }
}
