//! Operator console and diagnostics sink.
//!
//! The combined output stream of every captured process is echoed here, and
//! log setup failures are reported here on a best-effort basis.

use std::sync::Mutex;

/// Where captured output is echoed and setup failures are reported.
pub trait Console: Send + Sync + std::fmt::Debug {
    /// Print one captured line for the operator.
    fn print(&self, line: &str);

    /// Report a failure that does not abort the orchestration run.
    fn report_error(&self, message: &str);
}

/// Echoes to stdout and reports errors through `tracing`.
///
/// With echo switched off, captured lines only reach the log files.
#[derive(Debug, Clone, Copy)]
pub struct StdConsole {
    echo: bool,
}

impl StdConsole {
    pub fn new(echo: bool) -> Self {
        Self { echo }
    }

    pub fn echoes(&self) -> bool {
        self.echo
    }
}

impl Default for StdConsole {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Console for StdConsole {
    fn print(&self, line: &str) {
        if self.echo {
            println!("{line}");
        }
    }

    fn report_error(&self, message: &str) {
        tracing::error!("{message}");
    }
}

/// Keeps everything in memory. Used when output must be inspected afterwards.
#[derive(Debug, Default)]
pub struct RecordingConsole {
    printed: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn printed(&self) -> Vec<String> {
        self.printed
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }
}

impl Console for RecordingConsole {
    fn print(&self, line: &str) {
        if let Ok(mut printed) = self.printed.lock() {
            printed.push(line.to_string());
        }
    }

    fn report_error(&self, message: &str) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(message.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn std_console_echoes_by_default() {
        assert!(StdConsole::default().echoes());
        assert!(!StdConsole::new(false).echoes());
        // Silenced output still goes nowhere without panicking.
        StdConsole::new(false).print("hidden");
    }

    #[test]
    fn recording_console_keeps_order() {
        let console = RecordingConsole::new();
        console.print("first");
        console.print("second");
        console.report_error("boom");
        assert_eq!(console.printed(), vec!["first", "second"]);
        assert_eq!(console.errors(), vec!["boom"]);
    }
}
