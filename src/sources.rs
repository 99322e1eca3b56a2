/// Migration scripts loaded from the dist directory.
///
/// Layout:
/// ```text
/// <dist>/
///   1/
///     install/01-create-users.sql
///     rollback/01-drop-users.sql
///   2/
///     install/...
/// ```
/// Version directories are ordered numerically when their names are all
/// digits (numeric names first), otherwise by name. Scripts inside
/// `install/` and `rollback/` run in file-name order.
use crate::cancellation::CancelToken;
use crate::error::RunnerError;
use std::path::{Path, PathBuf};

const INSTALL_DIR: &str = "install";
const ROLLBACK_DIR: &str = "rollback";
const SCRIPT_EXTENSION: &str = "sql";

/// A single SQL script file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub name: String,
    pub sql: String,
}

/// Scripts of one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationVersion {
    pub version: String,
    pub install: Vec<Script>,
    pub rollback: Vec<Script>,
}

/// Ordered collection of migration versions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSources {
    versions: Vec<MigrationVersion>,
}

impl MigrationSources {
    pub fn new(mut versions: Vec<MigrationVersion>) -> Self {
        versions.sort_by_key(|v| version_sort_key(&v.version));
        Self { versions }
    }

    /// Read every version directory under `path`.
    pub async fn load_from_filesystem(
        token: &CancelToken,
        path: &Path,
    ) -> Result<Self, RunnerError> {
        token.check_cancelled()?;
        let root = path.to_path_buf();
        let token = token.clone();
        tokio::task::spawn_blocking(move || load_blocking(&token, &root)).await?
    }

    /// All versions in apply order.
    pub fn versions(&self) -> &[MigrationVersion] {
        &self.versions
    }

    pub fn get(&self, version: &str) -> Option<&MigrationVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    /// Position of `version` in apply order.
    pub fn position(&self, version: &str) -> Option<usize> {
        self.versions.iter().position(|v| v.version == version)
    }

    pub fn latest(&self) -> Option<&MigrationVersion> {
        self.versions.last()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// Numeric names sort first and by value, the rest by name.
fn version_sort_key(version: &str) -> (bool, u64, String) {
    match version.parse::<u64>() {
        Ok(n) if version.bytes().all(|b| b.is_ascii_digit()) => (false, n, version.to_string()),
        _ => (true, 0, version.to_string()),
    }
}

fn load_blocking(token: &CancelToken, root: &Path) -> Result<MigrationSources, RunnerError> {
    let entries = std::fs::read_dir(root).map_err(|e| RunnerError::Sources {
        path: root.to_path_buf(),
        source: e,
    })?;

    let mut versions = Vec::new();
    for entry in entries {
        token.check_cancelled()?;
        let entry = entry.map_err(|e| RunnerError::Sources {
            path: root.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let version = entry.file_name().to_string_lossy().to_string();

        let install_dir = path.join(INSTALL_DIR);
        let rollback_dir = path.join(ROLLBACK_DIR);
        if !install_dir.is_dir() && !rollback_dir.is_dir() {
            return Err(RunnerError::Layout(format!(
                "version directory {} has neither {INSTALL_DIR}/ nor {ROLLBACK_DIR}/",
                path.display()
            )));
        }

        let install = read_scripts(&install_dir)?;
        let rollback = read_scripts(&rollback_dir)?;
        tracing::debug!(
            version = %version,
            install = install.len(),
            rollback = rollback.len(),
            "loaded migration version"
        );
        versions.push(MigrationVersion {
            version,
            install,
            rollback,
        });
    }

    Ok(MigrationSources::new(versions))
}

/// Read `*.sql` files of a directory sorted by name. A missing directory
/// yields no scripts.
fn read_scripts(dir: &Path) -> Result<Vec<Script>, RunnerError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let io_err = |path: PathBuf| move |e: std::io::Error| RunnerError::Io { path, source: e };

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(io_err(dir.to_path_buf()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err(dir.to_path_buf()))?
        .into_iter()
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == SCRIPT_EXTENSION))
        .collect();
    files.sort();

    files
        .into_iter()
        .map(|path| {
            let sql = std::fs::read_to_string(&path).map_err(io_err(path.clone()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            Ok(Script { name, sql })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::create_source;

    fn write_script(root: &Path, version: &str, kind: &str, name: &str, sql: &str) {
        let dir = root.join(version).join(kind);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(name), sql).unwrap();
    }

    #[test]
    fn version_ordering_is_numeric_then_lexical() {
        let mut names = vec!["10", "2", "beta", "1", "alpha"];
        names.sort_by_key(|n| version_sort_key(n));
        assert_eq!(names, vec!["1", "2", "10", "alpha", "beta"]);
    }

    #[tokio::test]
    async fn loads_versions_and_scripts_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write_script(root, "2", "install", "01-b.sql", "CREATE TABLE b(x);");
        write_script(root, "1", "install", "02-second.sql", "SELECT 2;");
        write_script(root, "1", "install", "01-first.sql", "SELECT 1;");
        write_script(root, "1", "rollback", "01-undo.sql", "SELECT 0;");
        write_script(root, "1", "install", "notes.txt", "ignored");
        std::fs::write(root.join("README.md"), "ignored").unwrap();

        let (_source, token) = create_source();
        let sources = MigrationSources::load_from_filesystem(&token, root)
            .await
            .unwrap();

        let versions: Vec<&str> = sources.versions().iter().map(|v| v.version.as_str()).collect();
        assert_eq!(versions, vec!["1", "2"]);

        let first = sources.get("1").unwrap();
        let names: Vec<&str> = first.install.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["01-first.sql", "02-second.sql"]);
        assert_eq!(first.rollback.len(), 1);
        assert!(sources.get("2").unwrap().rollback.is_empty());
        assert_eq!(sources.latest().unwrap().version, "2");
        assert_eq!(sources.position("2"), Some(1));
    }

    #[tokio::test]
    async fn missing_root_is_sources_error() {
        let tmp = tempfile::tempdir().unwrap();
        let (_source, token) = create_source();
        let err = MigrationSources::load_from_filesystem(&token, &tmp.path().join("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Sources { .. }));
    }

    #[tokio::test]
    async fn version_without_script_dirs_is_layout_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("1")).unwrap();
        let (_source, token) = create_source();
        let err = MigrationSources::load_from_filesystem(&token, tmp.path())
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Layout(_)));
    }

    #[tokio::test]
    async fn empty_dist_loads_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let (_source, token) = create_source();
        let sources = MigrationSources::load_from_filesystem(&token, tmp.path())
            .await
            .unwrap();
        assert!(sources.is_empty());
        assert!(sources.latest().is_none());
    }

    #[tokio::test]
    async fn cancelled_token_skips_loading() {
        let tmp = tempfile::tempdir().unwrap();
        let (source, token) = create_source();
        source.cancel();
        let err = MigrationSources::load_from_filesystem(&token, tmp.path())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
