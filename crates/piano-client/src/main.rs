//! PianoML autocomplete client: entry point.
//!
//! Reads a note list, asks the server to continue it, and writes the
//! server's notes to another note list.
//!
//! # Usage
//!
//! ```text
//! piano-client <INPUT> <OUTPUT> [OPTIONS]
//!
//! Options:
//!   --host       <HOST>  Server hostname or IP [default: localhost]
//!   --port       <PORT>  Server port [default: 7611]
//!   --timeout-ms <MS>    Receive timeout [default: 5000]
//! ```
//!
//! Note lists hold one `<pitch> <start> <end>` line per note.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use piano_client::{AutocompleteClient, DEFAULT_PORT};
use piano_core::{EventSink, EventSource, NoteListFile, ReceivePolicy};

/// PianoML autocomplete client.
#[derive(Debug, Parser)]
#[command(
    name = "piano-client",
    about = "Sends a note list to the PianoML server and saves its continuation",
    version
)]
struct Cli {
    /// Note list to send.
    input: PathBuf,

    /// Where to write the returned notes.
    output: PathBuf,

    /// Server hostname or IP address.
    #[arg(long, default_value = "localhost", env = "PIANO_HOST")]
    host: String,

    /// Server port.
    #[arg(long, default_value_t = DEFAULT_PORT, env = "PIANO_PORT")]
    port: u16,

    /// Receive timeout in milliseconds.
    #[arg(long, default_value_t = 5000, env = "PIANO_TIMEOUT_MS")]
    timeout_ms: u64,
}

impl Cli {
    fn receive_policy(&self) -> ReceivePolicy {
        ReceivePolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            ..ReceivePolicy::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let file = NoteListFile::default();
    let events = file
        .read_events(&cli.input)
        .with_context(|| format!("cannot read notes from {}", cli.input.display()))?;

    let addr = tokio::net::lookup_host((cli.host.as_str(), cli.port))
        .await
        .with_context(|| format!("cannot resolve {}:{}", cli.host, cli.port))?
        .next()
        .with_context(|| format!("{} has no addresses", cli.host))?;

    let client = AutocompleteClient::with_policy(addr, cli.receive_policy());
    let continuation = client
        .autocomplete(&events)
        .await
        .with_context(|| format!("autocomplete request to {addr} failed"))?;

    file.write_events(&cli.output, &continuation)
        .with_context(|| format!("cannot write notes to {}", cli.output.display()))?;
    info!(
        sent = events.len(),
        received = continuation.len(),
        output = %cli.output.display(),
        "continuation saved"
    );
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
