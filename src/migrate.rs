use crate::cancellation::CancelToken;
use crate::db::SqliteProviderFactory;
use crate::error::RunnerError;
use crate::sources::{MigrationSources, MigrationVersion, Script};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::sync::Arc;

/// Bookkeeping table: one row per installed version, in install order.
const MIGRATION_TABLE_DDL: &str = "CREATE TABLE IF NOT EXISTS __migration (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    version         TEXT NOT NULL UNIQUE,
    utc_deployed_at TEXT NOT NULL,
    log             TEXT NOT NULL
);";

/// Inspects and moves the schema version of a database.
pub trait MigrationManager {
    /// Newest installed version, `None` for an uninitialized schema.
    async fn get_current_version(&self, token: &CancelToken)
        -> Result<Option<String>, RunnerError>;

    /// Install versions after the current one up to `target` (inclusive),
    /// or up to the latest when `target` is `None`.
    async fn install(&self, token: &CancelToken, target: Option<&str>) -> Result<(), RunnerError>;

    /// Revert installed versions newer than `target`, or all of them when
    /// `target` is `None`.
    async fn rollback(&self, token: &CancelToken, target: Option<&str>)
        -> Result<(), RunnerError>;
}

/// `MigrationManager` over a SQLite database file.
///
/// Every version is applied or reverted in its own transaction, so a failure
/// or cancellation leaves the database at the last fully committed version.
#[derive(Debug, Clone)]
pub struct SqliteMigrationManager {
    sources: Arc<MigrationSources>,
    factory: SqliteProviderFactory,
}

/// JSON stored in the `log` column.
#[derive(Debug, Serialize)]
struct DeployLog<'a> {
    scripts: Vec<&'a str>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

impl SqliteMigrationManager {
    pub fn new(sources: MigrationSources, factory: SqliteProviderFactory) -> Self {
        Self {
            sources: Arc::new(sources),
            factory,
        }
    }

    /// Run `f` with a fresh connection on the blocking pool.
    async fn with_connection<T, F>(&self, token: &CancelToken, f: F) -> Result<T, RunnerError>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken, &mut Connection, &MigrationSources) -> Result<T, RunnerError>
            + Send
            + 'static,
    {
        token.check_cancelled()?;
        let token = token.clone();
        let sources = Arc::clone(&self.sources);
        let factory = self.factory.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = factory.open()?;
            f(&token, &mut conn, &sources)
        })
        .await?
    }
}

impl MigrationManager for SqliteMigrationManager {
    async fn get_current_version(
        &self,
        token: &CancelToken,
    ) -> Result<Option<String>, RunnerError> {
        self.with_connection(token, |_, conn, _| current_version(conn))
            .await
    }

    async fn install(&self, token: &CancelToken, target: Option<&str>) -> Result<(), RunnerError> {
        let target = target.map(str::to_string);
        self.with_connection(token, move |token, conn, sources| {
            install_blocking(token, conn, sources, target.as_deref())
        })
        .await
    }

    async fn rollback(
        &self,
        token: &CancelToken,
        target: Option<&str>,
    ) -> Result<(), RunnerError> {
        let target = target.map(str::to_string);
        self.with_connection(token, move |token, conn, sources| {
            rollback_blocking(token, conn, sources, target.as_deref())
        })
        .await
    }
}

/// Whether the bookkeeping table exists. Read paths never create it.
fn has_migration_table(conn: &Connection) -> Result<bool, RunnerError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '__migration'",
        [],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn current_version(conn: &Connection) -> Result<Option<String>, RunnerError> {
    if !has_migration_table(conn)? {
        return Ok(None);
    }
    Ok(conn
        .query_row(
            "SELECT version FROM __migration ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?)
}

/// Installed versions, oldest first.
fn installed_versions(conn: &Connection) -> Result<Vec<String>, RunnerError> {
    if !has_migration_table(conn)? {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare("SELECT version FROM __migration ORDER BY id ASC")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
}

fn install_blocking(
    token: &CancelToken,
    conn: &mut Connection,
    sources: &MigrationSources,
    target: Option<&str>,
) -> Result<(), RunnerError> {
    let target_index = match target {
        Some(t) => sources
            .position(t)
            .ok_or_else(|| RunnerError::UnknownVersion(t.to_string()))?,
        None => match sources.versions().len().checked_sub(1) {
            Some(last) => last,
            None => {
                tracing::warn!("no migration versions available, nothing to install");
                return Ok(());
            }
        },
    };

    conn.execute_batch(MIGRATION_TABLE_DDL)?;
    let current = current_version(conn)?;
    let start = match &current {
        Some(v) => {
            sources.position(v).ok_or_else(|| {
                RunnerError::Layout(format!(
                    "database is at version '{v}' which is missing from migration sources"
                ))
            })? + 1
        }
        None => 0,
    };

    if start > target_index {
        tracing::info!(
            current = ?current,
            target_version = %sources.versions()[target_index].version,
            "database already at or beyond target version, nothing to install"
        );
        return Ok(());
    }

    for version in &sources.versions()[start..=target_index] {
        token.check_cancelled()?;
        apply_version(conn, version)?;
    }
    Ok(())
}

fn rollback_blocking(
    token: &CancelToken,
    conn: &mut Connection,
    sources: &MigrationSources,
    target: Option<&str>,
) -> Result<(), RunnerError> {
    let target_index = match target {
        Some(t) => Some(
            sources
                .position(t)
                .ok_or_else(|| RunnerError::UnknownVersion(t.to_string()))?,
        ),
        None => None,
    };

    let mut revert = Vec::new();
    for version in installed_versions(conn)? {
        let index = sources.position(&version).ok_or_else(|| {
            RunnerError::Layout(format!(
                "installed version '{version}' is missing from migration sources"
            ))
        })?;
        if target_index.map_or(true, |t| index > t) {
            revert.push(index);
        }
    }

    if revert.is_empty() {
        tracing::info!(
            target_version = ?target,
            "no installed versions above target, nothing to roll back"
        );
        return Ok(());
    }

    // Newest first
    revert.sort_unstable();
    for &index in revert.iter().rev() {
        token.check_cancelled()?;
        revert_version(conn, &sources.versions()[index])?;
    }
    Ok(())
}

fn run_scripts(
    tx: &rusqlite::Transaction<'_>,
    version: &str,
    scripts: &[Script],
) -> Result<(), RunnerError> {
    for script in scripts {
        tracing::info!(version, script = %script.name, "executing script");
        tx.execute_batch(&script.sql)
            .map_err(|e| RunnerError::Script {
                version: version.to_string(),
                script: script.name.clone(),
                source: e,
            })?;
    }
    Ok(())
}

fn apply_version(conn: &mut Connection, version: &MigrationVersion) -> Result<(), RunnerError> {
    let started_at = Utc::now();
    let tx = conn.transaction()?;
    run_scripts(&tx, &version.version, &version.install)?;

    let finished_at = Utc::now();
    let log = serde_json::to_string(&DeployLog {
        scripts: version.install.iter().map(|s| s.name.as_str()).collect(),
        started_at,
        finished_at,
    })?;
    tx.execute(
        "INSERT INTO __migration (version, utc_deployed_at, log) VALUES (?1, ?2, ?3)",
        params![version.version, finished_at.to_rfc3339(), log],
    )?;
    tx.commit()?;

    tracing::info!(version = %version.version, "version installed");
    Ok(())
}

fn revert_version(conn: &mut Connection, version: &MigrationVersion) -> Result<(), RunnerError> {
    let tx = conn.transaction()?;
    run_scripts(&tx, &version.version, &version.rollback)?;
    tx.execute(
        "DELETE FROM __migration WHERE version = ?1",
        params![version.version],
    )?;
    tx.commit()?;

    tracing::info!(version = %version.version, "version rolled back");
    Ok(())
}
