//! Per-file sink for one captured output stream.
//!
//! A logger is bound to one open log file. It is built from the chunks that
//! were buffered before the file existed and replays them before accepting
//! live output, so a file always reflects observation order.

use crate::console::Console;
use narval_core::ansi::strip_ansi;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Separator written before every entry except the first.
const ENTRY_SEPARATOR: &str = "\n";

/// Console echo and line history for the combined stream.
#[derive(Debug)]
pub struct Echo {
    console: Arc<dyn Console>,
    history: Vec<String>,
}

impl Echo {
    pub fn new(console: Arc<dyn Console>) -> Self {
        Self {
            console,
            history: Vec::new(),
        }
    }

    fn record(&mut self, line: String) {
        self.console.print(&line);
        self.history.push(line);
    }
}

#[derive(Debug)]
pub struct StreamLogger {
    file: File,
    path: PathBuf,
    echo: Option<Echo>,
    wrote_entry: bool,
}

impl StreamLogger {
    /// Bind a logger to `file` and replay `pending` into it.
    pub async fn new(
        file: File,
        path: PathBuf,
        echo: Option<Echo>,
        pending: Vec<String>,
    ) -> io::Result<Self> {
        let mut logger = Self {
            file,
            path,
            echo,
            wrote_entry: false,
        };
        for chunk in pending {
            logger.write(&chunk).await?;
        }
        Ok(logger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last line echoed to the console, if this logger echoes.
    pub fn last_line(&self) -> Option<&str> {
        self.echo
            .as_ref()
            .and_then(|echo| echo.history.last())
            .map(String::as_str)
    }

    /// Trim, strip colors, echo and append one chunk. Blank chunks are dropped.
    pub async fn write(&mut self, chunk: &str) -> io::Result<()> {
        let trimmed = chunk.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        let text = strip_ansi(trimmed);
        if text.is_empty() {
            return Ok(());
        }

        let entry = if self.wrote_entry {
            format!("{ENTRY_SEPARATOR}{text}")
        } else {
            text.clone()
        };
        if let Some(echo) = self.echo.as_mut() {
            echo.record(text);
        }

        // tokio queues writes; flushing surfaces the error of this append.
        self.file.write_all(entry.as_bytes()).await?;
        self.file.flush().await?;
        self.wrote_entry = true;
        Ok(())
    }

    /// Flush pending writes and release the file handle.
    pub async fn close(mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await
    }
}

/// Open `path` for appending, creating it when missing.
pub async fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::RecordingConsole;
    use tempfile::TempDir;

    async fn logger_at(dir: &TempDir, echo: Option<Echo>, pending: Vec<String>) -> StreamLogger {
        let path = dir.path().join("out.log");
        let file = open_append(&path).await.unwrap();
        StreamLogger::new(file, path, echo, pending).await.unwrap()
    }

    #[tokio::test]
    async fn replays_pending_before_live_chunks() {
        let dir = TempDir::new().unwrap();
        let mut logger = logger_at(
            &dir,
            None,
            vec!["first".to_string(), "  second  ".to_string()],
        )
        .await;
        logger.write("third\n").await.unwrap();
        let path = logger.path().to_path_buf();
        logger.close().await.unwrap();

        assert_eq!(
            std::fs::read_to_string(path).unwrap(),
            "first\nsecond\nthird"
        );
    }

    #[tokio::test]
    async fn drops_blank_chunks_without_separator() {
        let dir = TempDir::new().unwrap();
        let mut logger = logger_at(&dir, None, Vec::new()).await;
        logger.write("   ").await.unwrap();
        logger.write("\n\t\n").await.unwrap();
        logger.write("only").await.unwrap();
        logger.write("").await.unwrap();
        let path = logger.path().to_path_buf();
        logger.close().await.unwrap();

        assert_eq!(std::fs::read_to_string(path).unwrap(), "only");
    }

    #[tokio::test]
    async fn strips_colors_before_writing_and_echoing() {
        let dir = TempDir::new().unwrap();
        let console = Arc::new(RecordingConsole::new());
        let echo = Echo::new(Arc::clone(&console) as Arc<dyn Console>);
        let mut logger = logger_at(&dir, Some(echo), Vec::new()).await;

        logger.write("\u{1b}[32m  ok  \u{1b}[39m").await.unwrap();
        logger.write("\u{1b}[0m").await.unwrap();
        logger.write("\u{1b}[31mfail\u{1b}[39m").await.unwrap();

        assert_eq!(logger.last_line(), Some("fail"));
        let path = logger.path().to_path_buf();
        logger.close().await.unwrap();

        assert_eq!(console.printed(), vec!["  ok  ", "fail"]);
        assert_eq!(std::fs::read_to_string(path).unwrap(), "  ok  \nfail");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn write_reports_failure_of_that_append() {
        let path = PathBuf::from("/dev/full");
        let file = open_append(&path).await.unwrap();
        let mut logger = StreamLogger::new(file, path, None, Vec::new())
            .await
            .unwrap();

        let err = logger.write("a").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::StorageFull);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn failed_replay_fails_construction() {
        let path = PathBuf::from("/dev/full");
        let file = open_append(&path).await.unwrap();
        let built = StreamLogger::new(file, path, None, vec!["buffered".to_string()]).await;
        assert!(built.is_err());
    }

    #[tokio::test]
    async fn non_echoing_logger_never_prints() {
        let dir = TempDir::new().unwrap();
        let mut logger = logger_at(&dir, None, vec!["buffered".to_string()]).await;
        logger.write("live").await.unwrap();
        assert_eq!(logger.last_line(), None);
        logger.close().await.unwrap();
    }
}
