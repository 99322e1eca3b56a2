/// Install and rollback orchestration.
///
/// Each action prepares the database, loads migration sources, reports the
/// current version, optionally pauses so the operator can still abort, then
/// delegates to the migration manager. Failures propagate untouched; nothing
/// is retried.
use crate::cancellation::{self, CancelToken};
use crate::db::SqliteProviderFactory;
use crate::error::{ConfigError, RunnerError};
use crate::migrate::{MigrationManager, SqliteMigrationManager};
use crate::sources::MigrationSources;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Install,
    Rollback,
}

impl FromStr for Action {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "install" => Ok(Action::Install),
            "rollback" => Ok(Action::Rollback),
            other => Err(ConfigError::UnsupportedAction(other.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Install => write!(f, "install"),
            Action::Rollback => write!(f, "rollback"),
        }
    }
}

/// Database side of an action: existence checks, creation, and a migration
/// manager bound to the loaded sources.
pub trait MigrationBackend {
    type Manager: MigrationManager;

    /// Connection URL, for logging.
    fn url(&self) -> String;

    async fn is_database_exists(&self, token: &CancelToken) -> Result<bool, RunnerError>;

    async fn new_database(&self, token: &CancelToken) -> Result<(), RunnerError>;

    fn migration_manager(&self, sources: MigrationSources) -> Self::Manager;
}

impl MigrationBackend for SqliteProviderFactory {
    type Manager = SqliteMigrationManager;

    fn url(&self) -> String {
        SqliteProviderFactory::url(self)
    }

    async fn is_database_exists(&self, token: &CancelToken) -> Result<bool, RunnerError> {
        SqliteProviderFactory::is_database_exists(self, token).await
    }

    async fn new_database(&self, token: &CancelToken) -> Result<(), RunnerError> {
        SqliteProviderFactory::new_database(self, token).await
    }

    fn migration_manager(&self, sources: MigrationSources) -> Self::Manager {
        SqliteMigrationManager::new(sources, self.clone())
    }
}

pub struct ActionRunner<B> {
    backend: B,
    dist_dir: PathBuf,
    target_version: Option<String>,
    /// `None` skips the pause before the action.
    pre_action_delay: Option<Duration>,
}

impl<B: MigrationBackend> ActionRunner<B> {
    pub fn new(
        backend: B,
        dist_dir: impl Into<PathBuf>,
        target_version: Option<String>,
        pre_action_delay: Option<Duration>,
    ) -> Self {
        Self {
            backend,
            dist_dir: dist_dir.into(),
            target_version,
            pre_action_delay,
        }
    }

    pub async fn run(&self, action: Action, token: &CancelToken) -> Result<(), RunnerError> {
        token.check_cancelled()?;
        let span = tracing::info_span!("action", %action);
        match action {
            Action::Install => self.install(token).instrument(span).await,
            Action::Rollback => self.rollback(token).instrument(span).await,
        }
    }

    async fn install(&self, token: &CancelToken) -> Result<(), RunnerError> {
        let started = Instant::now();

        tracing::info!(url = %self.backend.url(), "Prepare database connection...");
        if !self.backend.is_database_exists(token).await? {
            tracing::info!("Database does not exist, creating it");
            self.backend.new_database(token).await?;
        }

        let manager = self.prepare_manager(token).await?;
        self.pause_before(Action::Install, token).await?;

        match self.target_version.as_deref() {
            Some(target) => {
                tracing::info!("Installing migration scripts to target version '{target}'...");
                manager.install(token, Some(target)).await?;
            }
            None => {
                tracing::info!("Installing migration scripts to latest version...");
                manager.install(token, None).await?;
            }
        }

        log_elapsed(started);
        Ok(())
    }

    async fn rollback(&self, token: &CancelToken) -> Result<(), RunnerError> {
        let started = Instant::now();

        tracing::info!(url = %self.backend.url(), "Prepare database connection...");
        if !self.backend.is_database_exists(token).await? {
            tracing::warn!("Database does not exist. Nothing to do.");
            return Ok(());
        }

        let manager = self.prepare_manager(token).await?;
        self.pause_before(Action::Rollback, token).await?;

        match self.target_version.as_deref() {
            Some(target) => {
                tracing::info!("Rollback migration scripts to target version '{target}'...");
                manager.rollback(token, Some(target)).await?;
            }
            None => {
                tracing::info!("Rollback ALL migration scripts...");
                manager.rollback(token, None).await?;
            }
        }

        log_elapsed(started);
        Ok(())
    }

    /// Load sources, build the manager and report the current version.
    async fn prepare_manager(&self, token: &CancelToken) -> Result<B::Manager, RunnerError> {
        tracing::info!(
            path = %self.dist_dir.display(),
            "Loading migration scripts..."
        );
        let sources = MigrationSources::load_from_filesystem(token, &self.dist_dir).await?;
        if sources.is_empty() {
            tracing::warn!("No migration versions found.");
        } else {
            tracing::info!(
                versions = sources.versions().len(),
                latest = ?sources.latest().map(|v| v.version.as_str()),
                "Loaded migration scripts."
            );
        }
        let manager = self.backend.migration_manager(sources);

        tracing::info!("Obtaining current database version...");
        let current = manager.get_current_version(token).await?;
        match current {
            Some(version) => tracing::info!("Current database version is '{version}'."),
            None => tracing::info!("Database has no migrations installed yet."),
        }
        Ok(manager)
    }

    async fn pause_before(&self, action: Action, token: &CancelToken) -> Result<(), RunnerError> {
        let Some(delay) = self.pre_action_delay else {
            return Ok(());
        };

        match (action, self.target_version.as_deref()) {
            (_, Some(target)) => tracing::info!("Target version '{target}' to {action}."),
            (Action::Install, None) => {
                tracing::info!("Target version is not defined. Using latest version to install.")
            }
            (Action::Rollback, None) => {
                tracing::info!("Target version is not defined. All versions will be rolled back.")
            }
        }
        tracing::info!(
            delay_ms = delay.as_millis() as u64,
            "Sleep a little bit before {action} (you are able to cancel with Ctrl+C yet)..."
        );
        cancellation::sleep(token, delay).await
    }
}

fn log_elapsed(started: Instant) {
    tracing::info!("Done in {:.3} seconds.", started.elapsed().as_secs_f64());
}
