//! narval - test orchestration runtime
//!
//! Library components for driving child processes and persisting their output.

pub mod console;
pub mod process_logs;
pub mod processes;
pub mod stream_logger;

pub use console::{Console, RecordingConsole, StdConsole};
pub use process_logs::{
    watch_process, HandlerOptions, LogCapture, LogFiles, LogHandler, PendingBuffer, ProcessEvent,
    ProcessLogsError, Transition,
};
pub use processes::{run_logged, spawn, spawn_and_wait, ProcessError, SpawnOptions, Spawned};
