//! Stage Daemon - headless presentation stage driven over stdin
//!
//! Runs one stage with simulated surfaces and a clocked media player, reads
//! controller commands line by line from stdin and writes every stage
//! notification to stdout as one JSON object per line. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Bundled demo personas
//! stage-daemon
//!
//! # Custom config and a real credential issuer
//! stage-daemon --config ./stage.toml --issuer-url http://127.0.0.1:8700/session
//!
//! # Verbose logging
//! RUST_LOG=stage_core=debug stage-daemon
//! ```

mod commands;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use stage_core::{
    default_config_path, load_config_from_path, load_config_from_str, AssetSelector,
    ClockedPlayer, ConfigOverrides, CredentialIssuer, HttpCredentialIssuer, PersonaId,
    SimulatedSurfaceConfig, SimulatedSurfaceProvider, Stage, StageConfig, StageHandle,
    StageNotification, StageParts, StaticCredentialIssuer,
};

use commands::{Command, HELP};

/// Demo stage used when the loaded configuration has no personas
const BUNDLED_CONFIG: &str = include_str!("../stage.toml");

/// Stage Daemon - headless presentation stage
#[derive(Parser, Debug)]
#[command(name = "stage-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "STAGE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Credential issuer endpoint (static tokens when unset)
    #[arg(long, value_name = "URL")]
    issuer_url: Option<String>,

    /// Activation fallback bound in milliseconds
    #[arg(long, value_name = "MS")]
    fallback_ms: Option<u64>,

    /// Simulated surface construction latency in milliseconds
    #[arg(long, default_value_t = 1200, value_name = "MS")]
    surface_latency_ms: u64,

    /// Simulated surfaces never signal readiness
    #[arg(long)]
    never_ready: bool,

    /// Seed for clip selection (entropy when unset)
    #[arg(long)]
    seed: Option<u64>,

    /// Print the configured personas and exit
    #[arg(long)]
    list_personas: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "STAGE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Initialize logging with the specified level
///
/// stdout carries notifications, so logs go to stderr.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("stage_daemon={level},stage_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .init();
}

/// Load the stage configuration, falling back to the bundled demo
fn resolve_config(args: &Args) -> Result<StageConfig> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(path.clone())
        .with_context(|| format!("Failed to load configuration from {path:?}"))?;

    if config.personas.is_empty() {
        info!("No personas configured, using bundled demo stage");
        let issuer_url = config.issuer_url.take();
        config = load_config_from_str(BUNDLED_CONFIG).context("Bundled config is invalid")?;
        config.issuer_url = issuer_url;
    }

    let mut overrides = ConfigOverrides::new();
    if let Some(ms) = args.fallback_ms {
        overrides = overrides.with_fallback_ms(ms);
    }
    if let Some(ref url) = args.issuer_url {
        overrides = overrides.with_issuer_url(url.clone());
    }
    overrides.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    Ok(config)
}

fn build_issuer(config: &StageConfig) -> Result<Arc<dyn CredentialIssuer>> {
    match config.issuer_url {
        Some(ref url) => {
            info!(url = %url, "Using HTTP credential issuer");
            let issuer = HttpCredentialIssuer::new(url.clone(), config.issuer_timeout)
                .context("Failed to build credential issuer")?;
            Ok(Arc::new(issuer))
        }
        None => {
            info!("No issuer configured, using static demo credentials");
            Ok(Arc::new(StaticCredentialIssuer::new("demo-session")))
        }
    }
}

fn build_provider(args: &Args) -> SimulatedSurfaceProvider {
    let latency = Duration::from_millis(args.surface_latency_ms);
    if args.never_ready {
        SimulatedSurfaceProvider::new(SimulatedSurfaceConfig {
            construct_latency: latency,
            ..SimulatedSurfaceConfig::default()
        })
    } else {
        SimulatedSurfaceProvider::ready_after(latency)
    }
}

/// Write one value to stdout as a JSON line
async fn emit<T: Serialize>(stdout: &mut tokio::io::Stdout, value: &T) -> Result<()> {
    let mut line = serde_json::to_string(value).context("Failed to encode output")?;
    line.push('\n');
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

/// Forward stage notifications to stdout until the stage stops
///
/// Takes only the receiver so it sees `Closed` once the stage and every
/// handle are gone.
async fn print_notifications(mut notes: broadcast::Receiver<StageNotification>) {
    let mut stdout = tokio::io::stdout();

    loop {
        match notes.recv().await {
            Ok(note) => {
                if let Err(e) = emit(&mut stdout, &note).await {
                    warn!(error = %e, "Failed to write notification");
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Notification printer lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Apply one command; returns false when the daemon should stop
async fn dispatch(handle: &StageHandle, command: Command) -> Result<bool> {
    let mut stdout = tokio::io::stdout();

    match command {
        Command::Activate(id) => handle.activate(PersonaId::new(id)).await?,
        Command::Dismiss => handle.dismiss().await?,
        Command::Reset => handle.force_reset().await?,
        Command::Speech => handle.speech_detected().await?,
        Command::Response => handle.response_started().await?,
        Command::Status => {
            handle.settle().await?;
            emit(&mut stdout, &handle.snapshot()).await?;
        }
        Command::Personas => emit(&mut stdout, &handle.personas().info()).await?,
        Command::Help => eprintln!("{HELP}"),
        Command::Quit => return Ok(false),
    }

    Ok(true)
}

/// Read commands from stdin until EOF, `quit` or Ctrl-C
async fn command_loop(handle: &StageHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt, initiating shutdown");
                return Ok(());
            }
        };

        let Some(line) = line else {
            info!("stdin closed, initiating shutdown");
            return Ok(());
        };

        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<Command>() {
            Ok(command) => {
                if !dispatch(handle, command).await? {
                    return Ok(());
                }
            }
            Err(e) => eprintln!("{e}"),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!("Stage Daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = resolve_config(&args)?;

    if args.list_personas {
        let mut stdout = tokio::io::stdout();
        emit(&mut stdout, &config.registry().info()).await?;
        return Ok(());
    }

    let issuer = build_issuer(&config)?;
    let provider = build_provider(&args);
    let player = Arc::new(ClockedPlayer::new(config.clip_catalog()));

    let mut parts = StageParts::new(config, issuer, Arc::new(provider), player);
    if let Some(seed) = args.seed {
        parts = parts.with_selector(AssetSelector::seeded(seed));
    }

    let handle = Stage::spawn(parts);
    info!(personas = handle.personas().len(), "Stage running");

    let printer = tokio::spawn(print_notifications(handle.subscribe()));

    let result = command_loop(&handle).await;

    info!("Shutting down...");
    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "Stage already stopped");
    }
    drop(handle);
    if let Err(e) = printer.await {
        warn!(error = %e, "Notification printer failed");
    }

    match result {
        Ok(()) => {
            info!("Stage daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e)
        }
    }
}
