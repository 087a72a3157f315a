//! ems - event/seat booking over named pipes.
//!
//! ## Modes
//!
//! **Server mode** (`ems server`): starts the booking daemon on a well-known
//! control FIFO and runs until killed. SIGUSR1 dumps a snapshot of every
//! event to stdout.
//!
//! **Client modes**: `exec` replays a job script through one session;
//! `list` and `show` are one-shot conveniences that open a session, run a
//! single query, and quit.

use clap::{Parser as ClapParser, Subcommand};
use ems::{
    client::{Client, ClientError},
    config::{ConfigError, Settings},
    jobs::{self, Command as JobCommand, ScriptError},
    server::{self, ServerConfig, ServerError},
    store::EventStore,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// ems - event/seat booking over named pipes.
///
/// Run `ems server <pipe>` to start the daemon, then drive it with
/// `ems exec`, `ems list`, or `ems show` from other terminals.
#[derive(ClapParser, Debug)]
#[command(name = "ems", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the booking server daemon
    Server {
        /// Path of the control channel FIFO to create
        pipe_path: PathBuf,

        /// Store access delay in microseconds (overrides the config file)
        delay: Option<u64>,

        /// Number of session workers (overrides the config file)
        #[arg(long)]
        workers: Option<usize>,

        /// Path to a TOML settings file
        #[arg(long, env = "EMS_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Run a job script through one session
    Exec {
        /// Path of the server's control channel FIFO
        pipe_path: PathBuf,

        /// Path of the job script to replay
        script: PathBuf,
    },

    /// List all events on the server
    List {
        /// Path of the server's control channel FIFO
        pipe_path: PathBuf,
    },

    /// Print one event's seat grid
    Show {
        /// Path of the server's control channel FIFO
        pipe_path: PathBuf,

        /// Id of the event to show
        event_id: u32,
    },
}

#[derive(Error, Debug)]
pub enum EmsError {
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("script error: {0}")]
    Script(#[from] ScriptError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

fn main() -> Result<(), EmsError> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Server {
            pipe_path,
            delay,
            workers,
            config,
        } => run_server(pipe_path, delay, workers, config),
        Commands::Exec { pipe_path, script } => run_exec(&pipe_path, &script),
        Commands::List { pipe_path } => run_list(&pipe_path),
        Commands::Show {
            pipe_path,
            event_id,
        } => run_show(&pipe_path, event_id),
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "ems=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

// ── Server mode ────────────────────────────────────────────────────

fn run_server(
    pipe_path: PathBuf,
    delay: Option<u64>,
    workers: Option<usize>,
    config: Option<PathBuf>,
) -> Result<(), EmsError> {
    let mut settings = match config {
        Some(path) => Settings::load(&path)?,
        None => Settings::default(),
    };
    if let Some(delay) = delay {
        settings.access_delay_micros = delay;
    }
    if let Some(workers) = workers {
        settings.workers = workers;
    }

    tracing::info!(
        workers = settings.workers,
        access_delay_micros = settings.access_delay_micros,
        "ems server starting"
    );

    let store = Arc::new(EventStore::new(Duration::from_micros(
        settings.access_delay_micros,
    )));
    let server_config = ServerConfig {
        control_pipe: pipe_path,
        workers: settings.workers,
    };
    server::serve(&server_config, store)?;
    Ok(())
}

// ── Client modes ───────────────────────────────────────────────────

/// Pipe paths for this client process's private session channels.
fn session_pipe_paths() -> (PathBuf, PathBuf) {
    let pid = std::process::id();
    (
        PathBuf::from(format!("/tmp/ems-{}-req.pipe", pid)),
        PathBuf::from(format!("/tmp/ems-{}-resp.pipe", pid)),
    )
}

fn connect(control_pipe: &Path) -> Client {
    let (request_pipe, response_pipe) = session_pipe_paths();
    match Client::setup(&request_pipe, &response_pipe, control_pipe) {
        Ok(client) => client,
        Err(e) => {
            eprintln!(
                "ems: failed to connect to server at {}: {}",
                control_pipe.display(),
                e
            );
            std::process::exit(1);
        }
    }
}

fn run_exec(control_pipe: &Path, script_path: &Path) -> Result<(), EmsError> {
    let script = std::fs::read_to_string(script_path)?;
    let commands = jobs::parse_script(&script)?;

    let mut client = connect(control_pipe);
    tracing::info!(session_id = client.session_id(), "session established");

    let mut stdout = io::stdout().lock();
    for command in commands {
        let result = match command {
            JobCommand::Create {
                event_id,
                rows,
                cols,
            } => client.create(event_id, rows, cols),
            JobCommand::Reserve { event_id, ref seats } => client.reserve(event_id, seats),
            JobCommand::Show { event_id } => client.show(event_id, &mut stdout),
            JobCommand::List => client.list_events(&mut stdout),
            JobCommand::Wait { millis } => {
                std::thread::sleep(Duration::from_millis(millis));
                Ok(())
            }
            JobCommand::Quit => {
                client.quit()?;
                return Ok(());
            }
        };

        // A rejection is a script-level event, not a broken session: report
        // it and keep going, like the server keeps the session alive.
        match result {
            Ok(()) => {}
            Err(ClientError::Rejected(code)) => {
                eprintln!("ems exec: command failed (return code {})", code);
            }
            Err(e) => return Err(e.into()),
        }
    }

    client.quit()?;
    Ok(())
}

fn run_list(control_pipe: &Path) -> Result<(), EmsError> {
    let mut client = connect(control_pipe);
    let mut stdout = io::stdout().lock();
    client.list_events(&mut stdout)?;
    client.quit()?;
    Ok(())
}

fn run_show(control_pipe: &Path, event_id: u32) -> Result<(), EmsError> {
    let mut client = connect(control_pipe);
    let mut stdout = io::stdout().lock();
    match client.show(event_id, &mut stdout) {
        Ok(()) => {}
        Err(ClientError::Rejected(_)) => {
            eprintln!("ems show: no event {}", event_id);
            client.quit()?;
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    }
    client.quit()?;
    Ok(())
}
