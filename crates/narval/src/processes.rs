//! Spawning child processes for the orchestrator.
//!
//! Every child runs from the resolver's base directory with piped output so a
//! [`LogHandler`] can attach to it.

use crate::console::Console;
use crate::process_logs::{HandlerOptions, LogHandler};
use narval_core::{Paths, SuiteDescriptor, UNKNOWN_EXIT_CODE};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("command not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, ProcessError>;

#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub args: Vec<String>,
    /// Extra environment variables, on top of the inherited environment.
    pub env: HashMap<String, String>,
    /// Wait for the process and report its exit code instead of returning it.
    pub resolve_on_close: bool,
}

impl SpawnOptions {
    pub fn with_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Result of [`spawn_and_wait`].
#[derive(Debug)]
pub enum Spawned {
    Running(Child),
    Exited(i32),
}

/// Spawn `program` with piped stdout/stderr from the base directory.
pub fn spawn(program: &str, options: &SpawnOptions, paths: &Paths) -> Result<Child> {
    debug!(
        program,
        args = ?options.args,
        cwd = %paths.base().display(),
        "spawning process"
    );

    Command::new(program)
        .args(&options.args)
        .envs(&options.env)
        .current_dir(paths.base())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProcessError::NotFound(program.to_string())
            } else {
                ProcessError::Io(e)
            }
        })
}

/// Spawn `program`; with `resolve_on_close`, wait for it and return the exit code.
///
/// Output is discarded when waiting; attach a [`LogHandler`] to keep it.
pub async fn spawn_and_wait(program: &str, options: &SpawnOptions, paths: &Paths) -> Result<Spawned> {
    let child = spawn(program, options, paths)?;
    if !options.resolve_on_close {
        return Ok(Spawned::Running(child));
    }
    let output = child.wait_with_output().await?;
    Ok(Spawned::Exited(
        output.status.code().unwrap_or(UNKNOWN_EXIT_CODE),
    ))
}

/// Spawn `program` and capture its output into the suite's log folder.
pub fn run_logged(
    program: &str,
    options: &SpawnOptions,
    suite: SuiteDescriptor,
    handler_options: HandlerOptions,
    paths: &Paths,
    console: Arc<dyn Console>,
) -> Result<LogHandler> {
    let child = spawn(program, options, paths)?;
    Ok(LogHandler::attach(
        child,
        suite,
        handler_options,
        paths.clone(),
        console,
    ))
}
