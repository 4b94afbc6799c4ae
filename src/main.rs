#![forbid(unsafe_code)]

//! `session-relay` binary.
//!
//! `watch` runs the session watcher and event dispatcher, reading lifecycle
//! hook events as JSON lines on stdin and printing every dispatch as a JSON
//! line on stdout. `query` runs one turn through the agent CLI and streams
//! the response text to stdout.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use session_relay::config::GlobalConfig;
use session_relay::dispatcher::lifecycle::LifecycleEvent;
use session_relay::dispatcher::SharedEventDispatcher;
use session_relay::executor::cli::CliExecutor;
use session_relay::executor::codec::NdjsonCodec;
use session_relay::models::query::{GenerateRequest, PermissionMode};
use session_relay::orchestrator::branch::GitBranchResolver;
use session_relay::service::SessionService;
use session_relay::session::watcher::SessionFileWatcher;
use session_relay::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum ModeArg {
    Default,
    AcceptEdits,
    BypassPermissions,
    Plan,
}

impl From<ModeArg> for PermissionMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Default => Self::Default,
            ModeArg::AcceptEdits => Self::AcceptEdits,
            ModeArg::BypassPermissions => Self::BypassPermissions,
            ModeArg::Plan => Self::Plan,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "session-relay", about = "Agent session orchestration relay", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Watch session directories and print dispatches as JSON lines.
    Watch {
        /// Directories to watch; defaults to the projects root.
        dirs: Vec<PathBuf>,
    },
    /// Run one turn and stream the response to stdout.
    Query {
        /// Workspace the agent runs in.
        #[arg(long)]
        workspace: PathBuf,
        /// Session to resume, or to create under this id.
        #[arg(long)]
        session: String,
        /// Acting agent; defaults to the configured agent id.
        #[arg(long)]
        agent: Option<String>,
        /// Permission mode passed to the agent runtime.
        #[arg(long, value_enum)]
        permission_mode: Option<ModeArg>,
        /// Prompt text.
        prompt: String,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    info!("configuration loaded");

    match args.command {
        Command::Watch { dirs } => watch(&config, dirs).await,
        Command::Query {
            workspace,
            session,
            agent,
            permission_mode,
            prompt,
        } => {
            let agent = agent.unwrap_or_else(|| config.default_agent_id.clone());
            let mut request = GenerateRequest::new(prompt, agent, session, workspace);
            request.permission_mode = permission_mode.map(PermissionMode::from);
            query(&config, &request).await
        }
    }
}

async fn watch(config: &GlobalConfig, dirs: Vec<PathBuf>) -> Result<()> {
    let dirs = if dirs.is_empty() {
        vec![config.projects_root()?]
    } else {
        dirs
    };

    let dispatcher = Arc::new(SharedEventDispatcher::new(config.dispatcher.clone()));
    dispatcher.initialize();
    dispatcher.add_listener(|dispatch| {
        let line = serde_json::to_string(dispatch)?;
        writeln!(std::io::stdout().lock(), "{line}")?;
        Ok(())
    });

    let (_agent_tx, agent_rx) = mpsc::channel(64);
    let (lifecycle_tx, lifecycle_rx) = mpsc::channel(64);
    let (change_tx, change_rx) = mpsc::channel(64);
    let router = dispatcher.attach(agent_rx, lifecycle_rx, change_rx);

    let mut watcher = SessionFileWatcher::new(config.watcher.clone());
    watcher.start(&dirs, change_tx).await?;

    let stdin_task = tokio::spawn(read_lifecycle_events(lifecycle_tx));

    info!(dirs = dirs.len(), "session relay watching");
    shutdown_signal().await;
    info!("shutdown signal received");

    watcher.stop().await;
    stdin_task.abort();
    router.abort();
    dispatcher.dispose();
    Ok(())
}

async fn read_lifecycle_events(tx: mpsc::Sender<LifecycleEvent>) {
    let mut lines = FramedRead::new(tokio::io::stdin(), NdjsonCodec::new());
    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(%err, "skipping unreadable lifecycle line");
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LifecycleEvent>(&line) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            Err(err) => warn!(%err, "skipping malformed lifecycle event"),
        }
    }
}

async fn query(config: &GlobalConfig, request: &GenerateRequest) -> Result<()> {
    let dispatcher = Arc::new(SharedEventDispatcher::new(config.dispatcher.clone()));
    dispatcher.initialize();
    let (agent_tx, agent_rx) = mpsc::channel(64);
    let (_lifecycle_tx, lifecycle_rx) = mpsc::channel(1);
    let (_change_tx, change_rx) = mpsc::channel(1);
    let router = dispatcher.attach(agent_rx, lifecycle_rx, change_rx);

    let service = SessionService::new(
        config,
        Arc::new(CliExecutor::new(config.executor.clone())),
        Arc::new(GitBranchResolver),
        Arc::clone(&dispatcher),
        agent_tx,
    )?;

    let outcome = tokio::select! {
        outcome = service.generate_streaming(request, |chunk| {
            let mut out = std::io::stdout().lock();
            if write!(out, "{chunk}").and_then(|()| out.flush()).is_err() {
                warn!("stdout closed");
            }
        }) => outcome?,
        () = shutdown_signal() => {
            let aborted = service.cancel_all();
            info!(aborted, "query interrupted");
            router.abort();
            return Ok(());
        }
    };

    router.abort();
    match outcome {
        Ok(output) => {
            writeln!(std::io::stdout().lock())?;
            info!(
                session_id = output.session_id.as_deref().unwrap_or_default(),
                turns = output.result.num_turns.unwrap_or_default(),
                "turn completed"
            );
            Ok(())
        }
        Err(err) => {
            error!(%err, "turn failed");
            Err(AppError::Agent(err))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
