use crate::cancellation::CancelToken;
use crate::error::RunnerError;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Hands out connections to one SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteProviderFactory {
    path: PathBuf,
}

impl SqliteProviderFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Connection URL, for logging.
    pub fn url(&self) -> String {
        format!("file+sqlite://{}", self.path().display())
    }

    pub async fn is_database_exists(&self, token: &CancelToken) -> Result<bool, RunnerError> {
        token.check_cancelled()?;
        let path = self.path().to_path_buf();
        Ok(tokio::task::spawn_blocking(move || path.is_file()).await?)
    }

    /// Create the database file (and its parent directory) with WAL journaling.
    pub async fn new_database(&self, token: &CancelToken) -> Result<(), RunnerError> {
        token.check_cancelled()?;
        let path = self.path().to_path_buf();
        tokio::task::spawn_blocking(move || create_blocking(&path)).await?
    }

    /// Open a connection to an existing database. Never creates the file.
    pub fn open(&self) -> Result<Connection, RunnerError> {
        let conn = Connection::open_with_flags(
            self.path(),
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(conn)
    }
}

fn create_blocking(path: &Path) -> Result<(), RunnerError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| RunnerError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let conn = Connection::open(path)?;
    // journal_mode returns a row, so query it instead of execute()
    let mode: String = conn.query_row("PRAGMA journal_mode=WAL;", [], |row| row.get(0))?;
    tracing::info!(path = %path.display(), journal_mode = %mode, "created database");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::create_source;
    use tempfile::TempDir;

    fn factory_in(dir: &TempDir) -> SqliteProviderFactory {
        SqliteProviderFactory::new(dir.path().join("work").join("database.db"))
    }

    #[tokio::test]
    async fn missing_database_does_not_exist() {
        let dir = TempDir::new().unwrap();
        let (_source, token) = create_source();
        assert!(!factory_in(&dir).is_database_exists(&token).await.unwrap());
    }

    #[tokio::test]
    async fn new_database_creates_file_and_parent() {
        let dir = TempDir::new().unwrap();
        let factory = factory_in(&dir);
        let (_source, token) = create_source();

        factory.new_database(&token).await.unwrap();

        assert!(factory.is_database_exists(&token).await.unwrap());
        let conn = factory.open().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn open_does_not_create_missing_database() {
        let dir = TempDir::new().unwrap();
        let factory = factory_in(&dir);
        assert!(factory.open().is_err());
        assert!(!factory.path().exists());
    }

    #[test]
    fn url_uses_sqlite_file_scheme() {
        let factory = SqliteProviderFactory::new("/data/work/database.db");
        assert_eq!(factory.url(), "file+sqlite:///data/work/database.db");
    }

    #[tokio::test]
    async fn cancelled_token_blocks_creation() {
        let dir = TempDir::new().unwrap();
        let factory = factory_in(&dir);
        let (source, token) = create_source();
        source.cancel();

        let err = factory.new_database(&token).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!factory.path().exists());
    }
}
