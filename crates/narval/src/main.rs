//! narval - test orchestration CLI
//!
//! Runs a command, captures its output into the suite's log folder and exits
//! with the command's exit code.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::{Parser, Subcommand};
use eyre::{bail, WrapErr};
use narval::{processes, watch_process, HandlerOptions, LogHandler, SpawnOptions, StdConsole};
use narval_core::{Config, LogFile, Paths, SuiteDescriptor};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "narval", about = "Test orchestration with per-suite process logs", version)]
struct Cli {
    /// Config file (default: .narval.yml in the working directory, when present)
    #[arg(long, global = true, env = "NARVAL_CONFIG")]
    config: Option<PathBuf>,

    /// Working directory for spawned processes and the logs tree
    #[arg(long, global = true)]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct SuiteArgs {
    /// Suite type (e.g. unit, integration, end-to-end)
    #[arg(long = "type")]
    kind: String,

    /// Suite name
    #[arg(long)]
    suite: String,

    /// Service name within the suite
    #[arg(long)]
    service: String,
}

impl SuiteArgs {
    fn descriptor(&self) -> SuiteDescriptor {
        SuiteDescriptor::new(&self.kind, &self.suite, &self.service)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Run a command and capture its output
    Run {
        #[command(flatten)]
        suite: SuiteArgs,

        /// Persist the exit code to exit-code.log
        #[arg(long)]
        exit_code: bool,

        /// Kill the command after this many seconds (0 = no timeout)
        #[arg(long)]
        timeout: Option<u32>,

        /// Print the completion as JSON
        #[arg(long)]
        json: bool,

        /// Do not echo captured output to the console
        #[arg(long)]
        no_echo: bool,

        /// Command string run through the configured shell
        #[arg(long, short = 'c', conflicts_with = "program")]
        command: Option<String>,

        /// Program and arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        program: Vec<String>,
    },
    /// Print the exit code persisted for a suite
    ExitCode {
        #[command(flatten)]
        suite: SuiteArgs,
    },
    /// Empty the logs tree, or the part of it below the given segments
    Clean {
        segments: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only captured output and results.
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    match runtime.block_on(run(cli)) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{e:#}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> eyre::Result<i32> {
    let paths = match &cli.cwd {
        Some(cwd) => Paths::new(cwd),
        None => Paths::cwd().wrap_err("failed to read current directory")?,
    };
    let config = Config::discover(cli.config.as_deref(), &paths)?;
    let paths = paths.with_logs_root(&config.logs_dir);

    match cli.command {
        Command::Run {
            suite,
            exit_code,
            timeout,
            json,
            no_echo,
            command,
            program,
        } => {
            let (program, options) = match command {
                Some(command) => (
                    config.shell.clone(),
                    SpawnOptions::with_args(["-c".to_string(), command]),
                ),
                None => {
                    let mut parts = program.into_iter();
                    let Some(program) = parts.next() else {
                        bail!("no command given; pass `-- <program> [args...]` or `--command`");
                    };
                    (program, SpawnOptions::with_args(parts))
                }
            };
            let handler_options = HandlerOptions {
                close: exit_code || config.exit_code,
            };
            let timeout_sec = timeout.unwrap_or(config.timeout_sec);
            let console = StdConsole::new(config.echo && !no_echo);
            run_command(
                &program,
                &options,
                suite.descriptor(),
                handler_options,
                timeout_sec,
                json,
                console,
                &paths,
            )
            .await
        }
        Command::ExitCode { suite } => {
            let path = LogFile::ExitCode.path_in(&paths.suite_log_dir(&suite.descriptor()));
            let code = paths
                .read_file(&path)
                .await
                .wrap_err_with(|| format!("no exit code recorded at {}", path.display()))?;
            println!("{}", code.trim());
            Ok(0)
        }
        Command::Clean { segments } => {
            let cleaned = paths.clean_logs(&segments).await?;
            info!(path = %cleaned.display(), "logs cleaned");
            Ok(0)
        }
    }
}

async fn run_command(
    program: &str,
    options: &SpawnOptions,
    suite: SuiteDescriptor,
    handler_options: HandlerOptions,
    timeout_sec: u32,
    json: bool,
    console: StdConsole,
    paths: &Paths,
) -> eyre::Result<i32> {
    let child = processes::spawn(program, options, paths)?;
    let kill = CancellationToken::new();
    let events = watch_process(child, kill.clone());
    let handler = LogHandler::from_events(
        events,
        suite.clone(),
        handler_options,
        paths.clone(),
        Arc::new(console),
    );

    if timeout_sec > 0 {
        let kill = kill.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(u64::from(timeout_sec))).await;
            warn!(timeout_sec, "command timed out; killing");
            kill.cancel();
        });
    }
    {
        let kill = kill.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received SIGINT, killing command");
                kill.cancel();
            }
        });
    }

    let payload = handler
        .wait()
        .await
        .wrap_err_with(|| format!("failed to capture logs for {suite}"))?;

    if json {
        println!("{}", serde_json::to_string(&payload)?);
    } else {
        info!(
            suite = %suite,
            exit_code = payload.process_code,
            last_log = payload.last_log.as_deref().unwrap_or(""),
            logs = %paths.suite_log_dir(&suite).display(),
            "command finished"
        );
    }
    Ok(payload.process_code)
}
