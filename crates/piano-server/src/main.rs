//! PianoML autocomplete server: entry point.
//!
//! Listens for framed JSON requests from a recording front end, continues the
//! submitted notes with a sequence model, and replies with the result.
//!
//! # Usage
//!
//! ```text
//! piano-server [OPTIONS]
//!
//! Options:
//!   --config    <PATH>   TOML config file [default: platform config dir]
//!   --bind      <ADDR>   IP address to listen on
//!   --port      <PORT>   TCP port to listen on
//!   --predictor <KIND>   identity | command
//!   --log-level <LEVEL>  Fallback log level when RUST_LOG is unset
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable          | Overrides               |
//! |-------------------|-------------------------|
//! | `PIANO_CONFIG`    | `--config`              |
//! | `PIANO_BIND`      | `[server] bind_address` |
//! | `PIANO_PORT`      | `[server] port`         |
//! | `PIANO_PREDICTOR` | `[predictor] kind`      |
//! | `PIANO_LOG_LEVEL` | `[server] log_level`    |
//!
//! Command-line arguments win over environment variables, which win over the
//! config file.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use piano_core::{check_compatibility, TokenCodec};
use piano_server::application::AutocompleteService;
use piano_server::infrastructure::predictor::build_predictor;
use piano_server::infrastructure::storage::{load_config, PredictorKind, ServerConfig};
use piano_server::infrastructure::{AutocompleteServer, ServerSettings};

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PredictorArg {
    Identity,
    Command,
}

impl From<PredictorArg> for PredictorKind {
    fn from(arg: PredictorArg) -> Self {
        match arg {
            PredictorArg::Identity => PredictorKind::Identity,
            PredictorArg::Command => PredictorKind::Command,
        }
    }
}

/// PianoML autocomplete server.
#[derive(Debug, Parser)]
#[command(
    name = "piano-server",
    about = "Continues recorded piano phrases with a sequence model",
    version
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "PIANO_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to bind the listener to.
    #[arg(long, env = "PIANO_BIND")]
    bind: Option<String>,

    /// TCP port to listen on.
    #[arg(long, env = "PIANO_PORT")]
    port: Option<u16>,

    /// Which predictor to run.
    #[arg(long, value_enum, env = "PIANO_PREDICTOR")]
    predictor: Option<PredictorArg>,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, env = "PIANO_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Applies the command-line overrides on top of a loaded config.
    fn apply(&self, mut config: ServerConfig) -> ServerConfig {
        if let Some(bind) = &self.bind {
            config.server.bind_address = bind.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(kind) = self.predictor {
            config.predictor.kind = kind.into();
        }
        if let Some(level) = &self.log_level {
            config.server.log_level = level.clone();
        }
        config
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    let config = cli.apply(config);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    let bind_addr = config
        .server
        .socket_addr()
        .context("invalid listen address")?;
    let codec = TokenCodec::new(config.codec).context("invalid [codec] section")?;
    let predictor = build_predictor(&config.predictor).context("invalid [predictor] section")?;
    check_compatibility(codec.config(), &*predictor)
        .context("predictor was trained with a different codec configuration")?;

    info!(
        %bind_addr,
        vocabulary = codec.config().vocabulary_size(),
        "PianoML autocomplete server starting"
    );

    let service = Arc::new(AutocompleteService::new(
        codec,
        predictor,
        config.autocomplete.settings(),
    ));
    let server = AutocompleteServer::bind(
        ServerSettings {
            bind_addr,
            receive: config.protocol.receive_policy(),
        },
        service,
    )
    .await
    .with_context(|| format!("cannot listen on {bind_addr}"))?;

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    server.serve(running).await?;

    info!("PianoML autocomplete server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
