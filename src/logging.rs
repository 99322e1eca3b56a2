use std::io::Write;
use std::time::Duration;

const DEFAULT_FILTER: &str = "migration_runner_sqlite=info";

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER)),
        )
        .with_thread_ids(false)
        .init();
}

/// Result of a bounded flush attempt.
#[derive(Debug)]
pub enum FlushOutcome {
    Flushed,
    Failed(String),
    /// The flush did not finish in time and was abandoned.
    TimedOut,
}

/// Flush buffered log output, waiting at most `timeout`.
pub async fn shutdown(timeout: Duration) -> FlushOutcome {
    flush_with_timeout(
        || {
            std::io::stdout().flush()?;
            std::io::stderr().flush()
        },
        timeout,
    )
    .await
}

/// Race `flush` on the blocking pool against `timeout`.
///
/// On timeout the blocking task is left detached; its late result is dropped.
pub async fn flush_with_timeout<F>(flush: F, timeout: Duration) -> FlushOutcome
where
    F: FnOnce() -> std::io::Result<()> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(flush);
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(()))) => FlushOutcome::Flushed,
        Ok(Ok(Err(e))) => FlushOutcome::Failed(e.to_string()),
        Ok(Err(e)) => FlushOutcome::Failed(e.to_string()),
        Err(_) => FlushOutcome::TimedOut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn flush_completes() {
        let outcome = flush_with_timeout(|| Ok(()), Duration::from_secs(1)).await;
        assert!(matches!(outcome, FlushOutcome::Flushed));
    }

    #[tokio::test]
    async fn flush_error_is_reported() {
        let outcome = flush_with_timeout(
            || Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed")),
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(outcome, FlushOutcome::Failed(msg) if msg.contains("pipe closed")));
    }

    #[tokio::test]
    async fn stalled_flush_is_abandoned() {
        let start = Instant::now();
        let outcome = flush_with_timeout(
            || {
                std::thread::sleep(Duration::from_millis(500));
                Ok(())
            },
            Duration::from_millis(20),
        )
        .await;
        assert!(matches!(outcome, FlushOutcome::TimedOut));
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn shutdown_flushes_std_streams() {
        let outcome = shutdown(Duration::from_secs(5)).await;
        assert!(matches!(outcome, FlushOutcome::Flushed));
    }
}
