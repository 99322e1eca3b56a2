use crate::data_dir::DataDir;
use crate::error::ConfigError;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

/// Accepted `DATABASE_FILE` values: a plain file name made of ASCII letters,
/// digits and dots, not starting with a dot.
static DATABASE_FILE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9.]*$").unwrap());

pub const TARGET_VERSION_VAR: &str = "TARGET_VERSION";
pub const DATABASE_FILE_VAR: &str = "DATABASE_FILE";
pub const DEFAULT_DATABASE_FILE: &str = "database.db";

/// Resolved settings for one runner invocation.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub data_dir: DataDir,
    pub database_file: String,
    /// Version to converge to; `None` means latest (install) or nothing (rollback).
    pub target_version: Option<String>,
    /// Window given to the operator to abort before the action starts.
    pub pre_action_delay: Duration,
    /// Upper bound on waiting for log output to flush at exit.
    pub log_flush_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            data_dir: DataDir::default(),
            database_file: DEFAULT_DATABASE_FILE.to_string(),
            target_version: None,
            pre_action_delay: Duration::from_millis(8000),
            log_flush_timeout: Duration::from_millis(5000),
        }
    }
}

impl RunnerConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve `TARGET_VERSION` and `DATABASE_FILE` through `lookup`.
    ///
    /// An empty `TARGET_VERSION` counts as unset; an empty `DATABASE_FILE`
    /// is rejected like any other invalid name.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_file =
            lookup(DATABASE_FILE_VAR).unwrap_or_else(|| DEFAULT_DATABASE_FILE.to_string());
        validate_database_file(&database_file)?;

        Ok(Self {
            database_file,
            target_version: lookup(TARGET_VERSION_VAR).filter(|value| !value.is_empty()),
            ..Self::default()
        })
    }
}

/// Reject anything that is not a plain file name inside the work directory.
pub fn validate_database_file(value: &str) -> Result<(), ConfigError> {
    if DATABASE_FILE_PATTERN.is_match(value) && !value.contains("..") {
        Ok(())
    } else {
        Err(ConfigError::InvalidDatabaseFile(value.to_string()))
    }
}
