//! piano-client library crate.
//!
//! The wire half of a recording front end: sends recorded notes to the
//! autocomplete server and returns the continuation it produces.
//!
//! ```no_run
//! # async fn run() -> Result<(), piano_client::ClientError> {
//! use piano_client::AutocompleteClient;
//! use piano_core::AbsMessage;
//!
//! let client = AutocompleteClient::new("127.0.0.1:7611".parse().unwrap());
//! let phrase = vec![AbsMessage::new(60, 0.8, 0.0, 0.5).unwrap()];
//! let continuation = client.autocomplete(&phrase).await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;

use piano_core::protocol::frame::{read_frame, write_frame};
use piano_core::{AbsMessage, EnvelopeError, FrameError, ReceivePolicy, Request, Response};
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;

/// Port the server listens on by default.
pub const DEFAULT_PORT: u16 = 7611;

/// Velocity assigned to returned notes; the server does not send one.
pub const RESPONSE_VELOCITY: f64 = 0.8;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    #[error("bad envelope: {0}")]
    Envelope(#[from] EnvelopeError),
}

/// One-request-per-connection client.
#[derive(Debug, Clone)]
pub struct AutocompleteClient {
    addr: SocketAddr,
    policy: ReceivePolicy,
}

impl AutocompleteClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            policy: ReceivePolicy::default(),
        }
    }

    pub fn with_policy(addr: SocketAddr, policy: ReceivePolicy) -> Self {
        Self { addr, policy }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Sends `events` and waits for the server's continuation.
    ///
    /// Velocities are not transmitted; returned notes carry
    /// [`RESPONSE_VELOCITY`].
    ///
    /// # Errors
    ///
    /// - [`ClientError::Connect`] if the server is unreachable.
    /// - [`ClientError::Frame`] if the server closes the connection without
    ///   answering or does not answer within the receive timeout.
    /// - [`ClientError::Envelope`] if the reply is not a response envelope.
    pub async fn autocomplete(&self, events: &[AbsMessage]) -> Result<Vec<AbsMessage>, ClientError> {
        let mut stream = TcpStream::connect(self.addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: self.addr,
                source,
            })?;

        let body = Request::autocomplete(events).to_json()?;
        write_frame(&mut stream, &body).await?;
        debug!(addr = %self.addr, notes = events.len(), "request sent");

        let reply = read_frame(&mut stream, &self.policy).await?;
        let events = Response::parse(&reply)?.into_events(RESPONSE_VELOCITY)?;
        debug!(notes = events.len(), "response received");
        Ok(events)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
