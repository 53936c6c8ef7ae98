//! Core types shared by the log handler, the process helpers and the CLI.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Identifies the logical unit under test.
///
/// Only used to derive a log folder: `<logs_root>/<type>/<suite>/<service>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SuiteDescriptor {
    #[serde(rename = "type")]
    kind: String,
    suite: String,
    service: String,
}

impl SuiteDescriptor {
    pub fn new(
        kind: impl Into<String>,
        suite: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            suite: suite.into(),
            service: service.into(),
        }
    }

    /// Suite type (e.g. "unit", "integration", "end-to-end").
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn suite(&self) -> &str {
        &self.suite
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Log folder for this suite below `logs_root`.
    pub fn log_dir(&self, logs_root: &Path) -> PathBuf {
        logs_root
            .join(&self.kind)
            .join(&self.suite)
            .join(&self.service)
    }
}

impl std::fmt::Display for SuiteDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.suite, self.service)
    }
}

/// Log files written for every suite invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFile {
    Out,
    Err,
    Combined,
    ExitCode,
}

impl LogFile {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Out => "out.log",
            Self::Err => "err.log",
            Self::Combined => "combined-outerr.log",
            Self::ExitCode => "exit-code.log",
        }
    }

    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

/// Terminal result of one captured process.
///
/// Serialized with the field names the orchestrator reports to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionPayload {
    /// Last non-empty, ANSI-stripped chunk seen on the combined stream.
    pub last_log: Option<String>,
    pub process_code: i32,
}

/// Exit code reported when a process terminated without one (killed by a signal).
pub const UNKNOWN_EXIT_CODE: i32 = -1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suite_log_dir_nests_type_suite_service() {
        let suite = SuiteDescriptor::new("unit", "api", "server");
        let dir = suite.log_dir(Path::new("/work/.narval/logs"));
        assert_eq!(dir, PathBuf::from("/work/.narval/logs/unit/api/server"));
    }

    #[test]
    fn log_file_names() {
        let dir = Path::new("/logs");
        assert_eq!(LogFile::Out.path_in(dir), PathBuf::from("/logs/out.log"));
        assert_eq!(LogFile::Err.path_in(dir), PathBuf::from("/logs/err.log"));
        assert_eq!(
            LogFile::Combined.path_in(dir),
            PathBuf::from("/logs/combined-outerr.log")
        );
        assert_eq!(
            LogFile::ExitCode.path_in(dir),
            PathBuf::from("/logs/exit-code.log")
        );
    }

    #[test]
    fn completion_payload_serializes_camel_case() {
        let payload = CompletionPayload {
            last_log: Some("hello".to_string()),
            process_code: 0,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["lastLog"], "hello");
        assert_eq!(json["processCode"], 0);

        let empty = CompletionPayload {
            last_log: None,
            process_code: 2,
        };
        let json = serde_json::to_value(&empty).unwrap();
        assert!(json["lastLog"].is_null());
    }

    #[test]
    fn suite_descriptor_displays_as_path() {
        let suite = SuiteDescriptor::new("integration", "books", "api");
        assert_eq!(suite.to_string(), "integration/books/api");
    }
}
