/// Outcome classification and process termination.
///
/// This is the one place that turns an action result into an exit code and
/// makes sure log output is flushed (within a bound) before exiting.
use crate::error::{ConfigError, RunnerError};
use crate::logging::{self, FlushOutcome};
use std::time::Duration;

pub const EXIT_SUCCESS: i32 = 0;
/// No action given.
pub const EXIT_USAGE: i32 = 1;
pub const EXIT_INVALID_DATABASE_FILE: i32 = 4;
pub const EXIT_CANCELLED: i32 = 42;
/// Unsupported action or any unhandled failure.
pub const EXIT_FAILURE: i32 = 127;

#[derive(Debug)]
pub enum ActionOutcome {
    Success,
    Cancelled,
    Failed(RunnerError),
}

impl From<Result<(), RunnerError>> for ActionOutcome {
    fn from(result: Result<(), RunnerError>) -> Self {
        match result {
            Ok(()) => ActionOutcome::Success,
            Err(e) if e.is_cancelled() => ActionOutcome::Cancelled,
            Err(e) => ActionOutcome::Failed(e),
        }
    }
}

impl ActionOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            ActionOutcome::Success => EXIT_SUCCESS,
            ActionOutcome::Cancelled => EXIT_CANCELLED,
            ActionOutcome::Failed(_) => EXIT_FAILURE,
        }
    }

    /// Log the outcome at the level it deserves.
    pub fn report(&self) {
        match self {
            ActionOutcome::Success => {}
            ActionOutcome::Cancelled => tracing::warn!("Application cancelled by user"),
            ActionOutcome::Failed(e) => {
                tracing::error!(error = %e, cause = ?e, "Application crashed")
            }
        }
    }
}

pub fn config_exit_code(err: &ConfigError) -> i32 {
    match err {
        ConfigError::InvalidDatabaseFile(_) => EXIT_INVALID_DATABASE_FILE,
        ConfigError::UnsupportedAction(_) => EXIT_FAILURE,
    }
}

/// Flush logs (bounded by `flush_timeout`) and terminate with `code`.
pub async fn shutdown_and_exit(code: i32, flush_timeout: Duration) -> ! {
    match logging::shutdown(flush_timeout).await {
        FlushOutcome::Flushed => {}
        FlushOutcome::Failed(e) => eprintln!("Failure flushing log output: {e}"),
        FlushOutcome::TimedOut => eprintln!(
            "Log output did not flush within {} ms, exiting anyway",
            flush_timeout.as_millis()
        ),
    }
    std::process::exit(code)
}
