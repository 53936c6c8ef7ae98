//! Path resolution and filesystem primitives rooted at a base directory.
//!
//! Every relative location the orchestrator touches (logs, docker files, the
//! custom config) is resolved against one base, normally the process cwd.

use crate::types::SuiteDescriptor;
use std::io;
use std::path::{Path, PathBuf};

/// Logs root, relative to the base directory.
pub const LOGS_PATH: &str = ".narval/logs";
/// Generated docker files, relative to the base directory.
pub const DOCKER_PATH: &str = ".narval/docker";
/// User configuration file, relative to the base directory.
pub const CONFIG_FILE: &str = ".narval.yml";

/// Resolves paths against a base directory and wraps async filesystem calls.
#[derive(Debug, Clone)]
pub struct Paths {
    base: PathBuf,
    logs_root: PathBuf,
}

impl Paths {
    /// Resolver rooted at `base`, with logs under `<base>/.narval/logs`.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        let logs_root = base.join(LOGS_PATH);
        Self { base, logs_root }
    }

    /// Resolver rooted at the current working directory.
    pub fn cwd() -> io::Result<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }

    /// Override the logs root. Relative roots are resolved against the base.
    pub fn with_logs_root(mut self, logs_root: impl AsRef<Path>) -> Self {
        self.logs_root = self.resolve([logs_root.as_ref()]);
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn logs(&self) -> &Path {
        &self.logs_root
    }

    pub fn docker(&self) -> PathBuf {
        self.base.join(DOCKER_PATH)
    }

    pub fn custom_config(&self) -> PathBuf {
        self.base.join(CONFIG_FILE)
    }

    /// Join `segments` onto the base. An absolute segment replaces everything before it.
    pub fn resolve<I, P>(&self, segments: I) -> PathBuf
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        segments
            .into_iter()
            .fold(self.base.clone(), |acc, segment| acc.join(segment))
    }

    /// Log folder for one suite invocation.
    pub fn suite_log_dir(&self, suite: &SuiteDescriptor) -> PathBuf {
        suite.log_dir(&self.logs_root)
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.resolve([path.as_ref()]).exists()
    }

    /// Create `path` and any missing parents. Returns the absolute path.
    pub async fn ensure_dir(&self, path: impl AsRef<Path>) -> io::Result<PathBuf> {
        let absolute = self.resolve([path.as_ref()]);
        tokio::fs::create_dir_all(&absolute).await?;
        Ok(absolute)
    }

    /// Remove a file or a directory tree. A missing path is not an error.
    pub async fn remove(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let absolute = self.resolve([path.as_ref()]);
        let metadata = match tokio::fs::symlink_metadata(&absolute).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        };
        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&absolute).await
        } else {
            tokio::fs::remove_file(&absolute).await
        };
        match result {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    pub async fn read_file(&self, path: impl AsRef<Path>) -> io::Result<String> {
        tokio::fs::read_to_string(self.resolve([path.as_ref()])).await
    }

    pub async fn write_file(&self, path: impl AsRef<Path>, content: &str) -> io::Result<()> {
        tokio::fs::write(self.resolve([path.as_ref()]), content).await
    }

    /// Empty the logs tree below `segments` (the whole tree when empty).
    pub async fn clean_logs<I, P>(&self, segments: I) -> io::Result<PathBuf>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let target = segments
            .into_iter()
            .fold(self.logs_root.clone(), |acc, segment| acc.join(segment));
        self.remove(&target).await?;
        self.ensure_dir(&target).await
    }
}
