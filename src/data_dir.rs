use std::path::{Path, PathBuf};

/// Fixed filesystem layout of the runner container.
///
/// Databases live under the work directory (default `/data/work/`), migration
/// scripts are shipped in the dist directory (default `/data/dist/`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    work: PathBuf,
    dist: PathBuf,
}

impl DataDir {
    pub const DEFAULT_WORK: &'static str = "/data/work";
    pub const DEFAULT_DIST: &'static str = "/data/dist";

    pub fn new(work: impl Into<PathBuf>, dist: impl Into<PathBuf>) -> Self {
        Self {
            work: work.into(),
            dist: dist.into(),
        }
    }

    /// Directory holding migration scripts.
    pub fn dist(&self) -> &Path {
        &self.dist
    }

    /// Path to a database file inside the work directory.
    ///
    /// `file` must already be validated as a plain file name.
    pub fn database(&self, file: &str) -> PathBuf {
        self.work.join(file)
    }
}

impl Default for DataDir {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WORK, Self::DEFAULT_DIST)
    }
}
