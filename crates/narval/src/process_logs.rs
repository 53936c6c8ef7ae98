//! Output capture and log persistence for child processes.
//!
//! A [`LogHandler`] attaches to a running process and writes its output to
//! `<logs_root>/<type>/<suite>/<service>/`:
//! - `out.log`: stdout
//! - `err.log`: stderr
//! - `combined-outerr.log`: both, in observation order, echoed to the console
//! - `exit-code.log`: the exit code, only with [`HandlerOptions::close`]
//!
//! The process may print, or even exit, before the log folder is prepared.
//! Everything observed in that window is buffered and replayed once the files
//! are open. All state lives in a single task, so no locking is involved.

use crate::console::Console;
use crate::stream_logger::{open_append, Echo, StreamLogger};
use narval_core::{CompletionPayload, LogFile, Paths, SuiteDescriptor, UNKNOWN_EXIT_CODE};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long to keep draining pipes after the process exited.
///
/// Pipes normally close together with the process, but a detached grandchild
/// can hold them open indefinitely.
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

const READ_CHUNK_BYTES: usize = 8192;

#[derive(Debug, Error)]
pub enum ProcessLogsError {
    #[error("failed to prepare logs for {suite}: {source}")]
    Setup {
        suite: SuiteDescriptor,
        #[source]
        source: io::Error,
    },
    #[error("failed to append to {}: {source}", .path.display())]
    Append {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to close logs for {suite}: {source}")]
    Close {
        suite: SuiteDescriptor,
        #[source]
        source: io::Error,
    },
    #[error("failed to write exit code to {}: {source}", .path.display())]
    ExitCode {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("process output ended without an exit status")]
    Detached,
}

pub type Result<T> = std::result::Result<T, ProcessLogsError>;

/// One observation from the attached process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Stdout(String),
    Stderr(String),
    /// Delivered once, after both output pipes were drained.
    Exit(i32),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerOptions {
    /// Persist the exit code to `exit-code.log`.
    pub close: bool,
}

/// Chunks observed before the log files were open.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PendingBuffer {
    pub out: Vec<String>,
    pub err: Vec<String>,
    pub outerr: Vec<String>,
    pub close: Option<i32>,
}

/// Open handles for one suite's log folder.
#[derive(Debug)]
pub struct LogFiles {
    dir: PathBuf,
    out: tokio::fs::File,
    err: tokio::fs::File,
    combined: tokio::fs::File,
}

impl LogFiles {
    /// Ensure the suite folder exists, delete stale logs and open fresh files.
    pub async fn prepare(
        paths: &Paths,
        suite: &SuiteDescriptor,
        options: HandlerOptions,
    ) -> io::Result<Self> {
        let dir = paths.ensure_dir(paths.suite_log_dir(suite)).await?;

        tokio::try_join!(
            paths.remove(LogFile::Out.path_in(&dir)),
            paths.remove(LogFile::Err.path_in(&dir)),
            paths.remove(LogFile::Combined.path_in(&dir)),
            async {
                if options.close {
                    paths.remove(LogFile::ExitCode.path_in(&dir)).await
                } else {
                    Ok(())
                }
            },
        )?;

        let out_path = LogFile::Out.path_in(&dir);
        let err_path = LogFile::Err.path_in(&dir);
        let combined_path = LogFile::Combined.path_in(&dir);
        let (out, err, combined) = tokio::try_join!(
            open_append(&out_path),
            open_append(&err_path),
            open_append(&combined_path),
        )?;

        Ok(Self {
            dir,
            out,
            err,
            combined,
        })
    }
}

/// The three live loggers once files are ready.
#[derive(Debug)]
struct Loggers {
    dir: PathBuf,
    out: StreamLogger,
    err: StreamLogger,
    combined: StreamLogger,
}

#[derive(Debug)]
enum HandlerState {
    /// Files not open yet; output is buffered.
    Attaching {
        pending: PendingBuffer,
        is_closed: bool,
    },
    /// Files open; output is written as it arrives.
    Streaming(Box<Loggers>),
    /// Close sequence finished or failed.
    Terminated,
}

/// Outcome of feeding one event to the capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Continue,
    /// The process exited with this code; the close sequence should run.
    Exited(i32),
}

/// Explicit capture state machine. Driven by [`LogHandler`], testable on its own.
#[derive(Debug)]
pub struct LogCapture {
    suite: SuiteDescriptor,
    options: HandlerOptions,
    console: Arc<dyn Console>,
    state: HandlerState,
}

impl LogCapture {
    pub fn new(suite: SuiteDescriptor, options: HandlerOptions, console: Arc<dyn Console>) -> Self {
        Self {
            suite,
            options,
            console,
            state: HandlerState::Attaching {
                pending: PendingBuffer::default(),
                is_closed: false,
            },
        }
    }

    pub fn files_ready(&self) -> bool {
        matches!(self.state, HandlerState::Streaming(_))
    }

    /// Buffered chunks, while still attaching.
    pub fn pending(&self) -> Option<&PendingBuffer> {
        match &self.state {
            HandlerState::Attaching { pending, .. } => Some(pending),
            _ => None,
        }
    }

    /// Feed one event. Buffers while attaching, writes once streaming.
    ///
    /// A failed append terminates the capture; no completion follows it.
    pub async fn observe(&mut self, event: ProcessEvent) -> Result<Transition> {
        let loggers = match &mut self.state {
            HandlerState::Attaching { pending, is_closed } => {
                match event {
                    ProcessEvent::Stdout(chunk) => {
                        pending.out.push(chunk.clone());
                        pending.outerr.push(chunk);
                    }
                    ProcessEvent::Stderr(chunk) => {
                        pending.err.push(chunk.clone());
                        pending.outerr.push(chunk);
                    }
                    ProcessEvent::Exit(code) => {
                        *is_closed = true;
                        pending.close = Some(code);
                    }
                }
                return Ok(Transition::Continue);
            }
            HandlerState::Streaming(loggers) => loggers,
            HandlerState::Terminated => return Ok(Transition::Continue),
        };

        let written = match event {
            ProcessEvent::Stdout(chunk) => {
                write_pair(&mut loggers.out, &mut loggers.combined, &chunk).await
            }
            ProcessEvent::Stderr(chunk) => {
                write_pair(&mut loggers.err, &mut loggers.combined, &chunk).await
            }
            ProcessEvent::Exit(code) => return Ok(Transition::Exited(code)),
        };
        if written.is_err() {
            self.state = HandlerState::Terminated;
        }
        written.map(|()| Transition::Continue)
    }

    /// Bind loggers to `files`, replaying everything buffered so far.
    ///
    /// Returns [`Transition::Exited`] when the process already exited while
    /// the files were being prepared.
    pub async fn open(&mut self, files: LogFiles) -> Result<Transition> {
        let (pending, is_closed) = match std::mem::replace(&mut self.state, HandlerState::Terminated) {
            HandlerState::Attaching { pending, is_closed } => (pending, is_closed),
            other => {
                self.state = other;
                return Ok(Transition::Continue);
            }
        };
        let PendingBuffer {
            out,
            err,
            outerr,
            close,
        } = pending;
        let LogFiles {
            dir,
            out: out_file,
            err: err_file,
            combined: combined_file,
        } = files;

        let out = bind(out_file, LogFile::Out.path_in(&dir), None, out).await?;
        let err = bind(err_file, LogFile::Err.path_in(&dir), None, err).await?;
        let combined = bind(
            combined_file,
            LogFile::Combined.path_in(&dir),
            Some(Echo::new(Arc::clone(&self.console))),
            outerr,
        )
        .await?;

        debug!(suite = %self.suite, dir = %dir.display(), "log files ready");
        self.state = HandlerState::Streaming(Box::new(Loggers {
            dir,
            out,
            err,
            combined,
        }));

        Ok(if is_closed {
            Transition::Exited(close.unwrap_or(UNKNOWN_EXIT_CODE))
        } else {
            Transition::Continue
        })
    }

    /// Close all files, persist the exit code if configured, build the payload.
    pub async fn close(&mut self, code: i32) -> Result<CompletionPayload> {
        let loggers = match std::mem::replace(&mut self.state, HandlerState::Terminated) {
            HandlerState::Streaming(loggers) => *loggers,
            _ => return Err(ProcessLogsError::Detached),
        };
        let Loggers {
            dir,
            out,
            err,
            combined,
        } = loggers;
        let last_log = combined.last_line().map(str::to_string);

        tokio::try_join!(out.close(), err.close(), combined.close()).map_err(|source| {
            ProcessLogsError::Close {
                suite: self.suite.clone(),
                source,
            }
        })?;

        if self.options.close {
            let path = LogFile::ExitCode.path_in(&dir);
            std::fs::write(&path, code.to_string())
                .map_err(|source| ProcessLogsError::ExitCode { path, source })?;
        }

        Ok(CompletionPayload {
            last_log,
            process_code: code,
        })
    }
}

async fn bind(
    file: tokio::fs::File,
    path: PathBuf,
    echo: Option<Echo>,
    pending: Vec<String>,
) -> Result<StreamLogger> {
    StreamLogger::new(file, path.clone(), echo, pending)
        .await
        .map_err(|source| ProcessLogsError::Append { path, source })
}

/// Write `chunk` to its own stream, then to the combined one.
async fn write_pair(
    stream: &mut StreamLogger,
    combined: &mut StreamLogger,
    chunk: &str,
) -> Result<()> {
    write_chunk(stream, chunk).await?;
    write_chunk(combined, chunk).await
}

async fn write_chunk(logger: &mut StreamLogger, chunk: &str) -> Result<()> {
    logger
        .write(chunk)
        .await
        .map_err(|source| ProcessLogsError::Append {
            path: logger.path().to_path_buf(),
            source,
        })
}

/// Handle to a capture in progress. Resolves exactly once.
#[derive(Debug)]
pub struct LogHandler {
    completion: oneshot::Receiver<Result<CompletionPayload>>,
}

impl LogHandler {
    /// Attach to `child`, which must have piped stdout and stderr.
    pub fn attach(
        child: Child,
        suite: SuiteDescriptor,
        options: HandlerOptions,
        paths: Paths,
        console: Arc<dyn Console>,
    ) -> Self {
        let events = watch_process(child, CancellationToken::new());
        Self::from_events(events, suite, options, paths, console)
    }

    /// Capture from an arbitrary event source.
    pub fn from_events(
        events: mpsc::UnboundedReceiver<ProcessEvent>,
        suite: SuiteDescriptor,
        options: HandlerOptions,
        paths: Paths,
        console: Arc<dyn Console>,
    ) -> Self {
        let (tx, completion) = oneshot::channel();
        tokio::spawn(async move {
            let result = run_capture(events, suite, options, paths, console).await;
            // The receiver may have been dropped; nobody is waiting then.
            let _ = tx.send(result);
        });
        Self { completion }
    }

    /// Wait for the close sequence. `Ok` is the completion, `Err` the failure.
    pub async fn wait(self) -> Result<CompletionPayload> {
        self.completion
            .await
            .unwrap_or(Err(ProcessLogsError::Detached))
    }
}

async fn run_capture(
    mut events: mpsc::UnboundedReceiver<ProcessEvent>,
    suite: SuiteDescriptor,
    options: HandlerOptions,
    paths: Paths,
    console: Arc<dyn Console>,
) -> Result<CompletionPayload> {
    let mut capture = LogCapture::new(suite.clone(), options, Arc::clone(&console));

    let prepare = LogFiles::prepare(&paths, &suite, options);
    tokio::pin!(prepare);
    let mut events_open = true;

    let files = loop {
        tokio::select! {
            prepared = &mut prepare => match prepared {
                Ok(files) => break files,
                Err(source) => {
                    console.report_error(&format!(
                        "Error writing process logs from service \"{}\", suite \"{}\" of type \"{}\"",
                        suite.service(),
                        suite.suite(),
                        suite.kind(),
                    ));
                    console.report_error(&source.to_string());
                    return Err(ProcessLogsError::Setup { suite: suite.clone(), source });
                }
            },
            event = events.recv(), if events_open => match event {
                Some(event) => {
                    capture.observe(event).await?;
                }
                None => events_open = false,
            },
        }
    };

    let mut transition = capture.open(files).await?;
    while transition == Transition::Continue {
        match events.recv().await {
            Some(event) => transition = capture.observe(event).await?,
            None => {
                warn!(suite = %suite, "process events ended before exit");
                return Err(ProcessLogsError::Detached);
            }
        }
    }

    let Transition::Exited(code) = transition else {
        return Err(ProcessLogsError::Detached);
    };
    let payload = capture.close(code).await?;
    info!(
        suite = %suite,
        exit_code = payload.process_code,
        last_log = payload.last_log.as_deref().unwrap_or(""),
        "process logs closed"
    );
    Ok(payload)
}

/// Forward the output and exit status of `child` as [`ProcessEvent`]s.
///
/// Cancelling `kill` kills the process; the exit is then reported normally.
/// Pipe readers keep draining even after the receiver is dropped so the child
/// never blocks on a full pipe.
pub fn watch_process(
    mut child: Child,
    kill: CancellationToken,
) -> mpsc::UnboundedReceiver<ProcessEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    let stdout_task = child
        .stdout
        .take()
        .map(|stdout| tokio::spawn(forward_stream(stdout, tx.clone(), ProcessEvent::Stdout)));
    let stderr_task = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(forward_stream(stderr, tx.clone(), ProcessEvent::Stderr)));

    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            () = kill.cancelled() => {
                info!(pid = ?child.id(), "killing captured process");
                if let Err(err) = child.kill().await {
                    warn!(error = %err, "failed to kill captured process");
                }
                child.wait().await
            }
        };

        for (name, task) in [("stdout", stdout_task), ("stderr", stderr_task)] {
            let Some(task) = task else { continue };
            match timeout(IO_CAPTURE_TIMEOUT, task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(err))) => warn!(stream = name, error = %err, "output capture failed"),
                Ok(Err(err)) => warn!(stream = name, error = %err, "output reader panicked"),
                Err(_) => warn!(stream = name, "output capture timed out"),
            }
        }

        let code = match status {
            Ok(status) => status.code().unwrap_or(UNKNOWN_EXIT_CODE),
            Err(err) => {
                warn!(error = %err, "failed to wait for captured process");
                UNKNOWN_EXIT_CODE
            }
        };
        let _ = tx.send(ProcessEvent::Exit(code));
    });

    rx
}

/// Read `reader` in chunks and forward them as events until end-of-file.
async fn forward_stream<R>(
    mut reader: R,
    tx: mpsc::UnboundedSender<ProcessEvent>,
    wrap: fn(String) -> ProcessEvent,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    let mut carry = Vec::new();
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        carry.extend_from_slice(&chunk[..n]);
        let text = take_utf8(&mut carry);
        if !text.is_empty() {
            // Receiver gone: keep draining anyway.
            let _ = tx.send(wrap(text));
        }
    }
    if !carry.is_empty() {
        let _ = tx.send(wrap(String::from_utf8_lossy(&carry).into_owned()));
    }
    Ok(())
}

/// Decode as much of `buf` as possible, leaving a split multi-byte sequence
/// at the end for the next read. Invalid bytes become U+FFFD.
fn take_utf8(buf: &mut Vec<u8>) -> String {
    let mut text = String::new();
    let mut start = 0;
    loop {
        match std::str::from_utf8(&buf[start..]) {
            Ok(valid) => {
                text.push_str(valid);
                start = buf.len();
                break;
            }
            Err(err) => {
                let valid_end = start + err.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&buf[start..valid_end]));
                match err.error_len() {
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        start = valid_end + len;
                    }
                    None => {
                        start = valid_end;
                        break;
                    }
                }
            }
        }
    }
    buf.drain(..start);
    text
}
