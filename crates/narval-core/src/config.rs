//! Configuration for the orchestrator CLI.
//!
//! Read from `.narval.yml` (YAML). Missing keys keep their defaults.
//! Precedence: CLI flags > `--config` file > `.narval.yml` > defaults.

use crate::paths::{Paths, LOGS_PATH};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid shell: {0}")]
    InvalidShell(String),
}

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root folder for per-suite logs.
    pub logs_dir: PathBuf,
    /// Persist each process exit code to `exit-code.log` (default: false).
    pub exit_code: bool,
    /// Echo the combined output of captured processes to stdout (default: true).
    pub echo: bool,
    /// Shell used for `--command` strings, invoked as `<shell> -c <command>`.
    pub shell: String,
    /// Kill the captured process after this many seconds (0 = no timeout).
    pub timeout_sec: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from(LOGS_PATH),
            exit_code: false,
            echo: true,
            shell: "sh".to_string(),
            timeout_sec: 0,
        }
    }
}

impl Config {
    /// Load config from a YAML file, merging with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_content(&content, path)
    }

    /// Load the explicit `--config` file if given, else `.narval.yml` when present.
    pub fn discover(explicit: Option<&Path>, paths: &Paths) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(&paths.resolve([path]))?,
            None => {
                let custom = paths.custom_config();
                if custom.is_file() {
                    Self::from_file(&custom)?
                } else {
                    Self::default()
                }
            }
        };
        config.resolve_paths(paths.base());
        config.validate()?;
        Ok(config)
    }

    fn parse_content(content: &str, path: &Path) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit; treat it as all defaults.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.shell.trim().is_empty() {
            return Err(ConfigError::InvalidShell(self.shell.clone()));
        }
        Ok(())
    }

    /// Resolve relative paths against the workspace root.
    pub fn resolve_paths(&mut self, workspace_root: &Path) {
        if self.logs_dir.is_relative() {
            self.logs_dir = workspace_root.join(&self.logs_dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.logs_dir, PathBuf::from(".narval/logs"));
        assert!(!config.exit_code);
        assert!(config.echo);
        assert_eq!(config.shell, "sh");
        assert_eq!(config.timeout_sec, 0);
    }

    #[test]
    fn parse_partial_yaml_keeps_defaults() {
        let content = "exit_code: true\ntimeout_sec: 30\n";
        let config = Config::parse_content(content, Path::new("test.yml")).unwrap();
        assert!(config.exit_code);
        assert_eq!(config.timeout_sec, 30);
        assert_eq!(config.shell, "sh");
    }

    #[test]
    fn parse_echo_switch() {
        let config = Config::parse_content("echo: false\n", Path::new("test.yml")).unwrap();
        assert!(!config.echo);
        assert!(!config.exit_code);
    }

    #[test]
    fn parse_empty_document_is_default() {
        let config = Config::parse_content("  \n", Path::new("test.yml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn parse_invalid_yaml_fails() {
        let result = Config::parse_content("exit_code: [", Path::new("bad.yml"));
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn discover_prefers_explicit_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".narval.yml"), "shell: bash\n").unwrap();
        std::fs::write(dir.path().join("custom.yml"), "shell: zsh\n").unwrap();
        let paths = Paths::new(dir.path());

        let config = Config::discover(Some(Path::new("custom.yml")), &paths).unwrap();
        assert_eq!(config.shell, "zsh");

        let config = Config::discover(None, &paths).unwrap();
        assert_eq!(config.shell, "bash");
    }

    #[test]
    fn discover_without_file_resolves_logs_dir() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::new(dir.path());
        let config = Config::discover(None, &paths).unwrap();
        assert_eq!(config.logs_dir, dir.path().join(".narval/logs"));
    }

    #[test]
    fn discover_rejects_blank_shell() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".narval.yml"), "shell: \"  \"\n").unwrap();
        let paths = Paths::new(dir.path());
        let result = Config::discover(None, &paths);
        assert!(matches!(result, Err(ConfigError::InvalidShell(_))));
    }

    #[test]
    fn missing_explicit_file_is_read_error() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::new(dir.path());
        let result = Config::discover(Some(Path::new("nope.yml")), &paths);
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }
}
