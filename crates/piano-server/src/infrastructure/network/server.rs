//! TCP server: accept loop and per-connection task management.
//!
//! Each accepted connection carries exactly one request and at most one
//! response:
//!
//! ```text
//! Accepted → ReceivingLength → ReceivingPayload → Processing → SendingResponse → Closed
//! ```
//!
//! Every connection runs in its own Tokio task; the request itself is handled
//! on the blocking pool because the predictor is a blocking call.  There is
//! no connection limit and no queue between connections.  Any failure (a
//! framing timeout, a malformed envelope, a predictor error) closes that
//! connection without a response and never reaches the accept loop.
//!
//! Shutdown is driven by a shared `AtomicBool`; the accept loop polls it
//! every [`ACCEPT_POLL_INTERVAL`].

use std::fmt;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use piano_core::protocol::frame::{decode_length, receive_exact, write_frame, LENGTH_PREFIX_SIZE};
use piano_core::{EnvelopeError, FrameError, ReceivePolicy};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinError;
use tokio::time::timeout;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::application::{AutocompleteService, RouterError};

/// How often the accept loop re-checks the shutdown flag.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Where a connection was in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    ReceivingLength,
    ReceivingPayload,
    Processing,
    SendingResponse,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Accepted => "accepted",
            ConnectionState::ReceivingLength => "receiving length",
            ConnectionState::ReceivingPayload => "receiving payload",
            ConnectionState::Processing => "processing",
            ConnectionState::SendingResponse => "sending response",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What went wrong on a connection.
#[derive(Debug, Error)]
pub enum ConnectionFailure {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("cannot serialize response: {0}")]
    Response(#[from] EnvelopeError),

    #[error("request handler did not finish: {0}")]
    Handler(#[from] JoinError),
}

/// A connection that ended without completing its request.
#[derive(Debug, Error)]
#[error("connection failed while {state}: {source}")]
pub struct ConnectionError {
    pub state: ConnectionState,
    #[source]
    pub source: ConnectionFailure,
}

impl ConnectionError {
    fn at(state: ConnectionState) -> impl FnOnce(ConnectionFailure) -> Self {
        move |source| Self { state, source }
    }
}

/// How a connection that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// A response frame was written.
    Responded,
    /// The request type was not recognised; nothing was written.
    Ignored,
}

/// Errors that stop the server itself.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind listener on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("listener I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Network settings for [`AutocompleteServer::bind`].
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub bind_addr: SocketAddr,
    pub receive: ReceivePolicy,
}

/// The autocomplete TCP server.
pub struct AutocompleteServer {
    listener: TcpListener,
    service: Arc<AutocompleteService>,
    policy: ReceivePolicy,
}

impl AutocompleteServer {
    /// Binds the listener.  Port `0` picks a free port; see
    /// [`AutocompleteServer::local_addr`].
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::BindFailed`] if the address cannot be bound.
    pub async fn bind(
        settings: ServerSettings,
        service: Arc<AutocompleteService>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(settings.bind_addr)
            .await
            .map_err(|source| ServerError::BindFailed {
                addr: settings.bind_addr,
                source,
            })?;
        Ok(Self {
            listener,
            service,
            policy: settings.receive,
        })
    }

    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs the accept loop until `running` is cleared.
    ///
    /// Connections already accepted keep running to completion after the
    /// loop exits.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the local address cannot be read at
    /// start-up.  Accept errors are logged and the loop continues.
    pub async fn serve(self, running: Arc<AtomicBool>) -> Result<(), ServerError> {
        info!(addr = %self.local_addr()?, "autocomplete server listening");

        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            match timeout(ACCEPT_POLL_INTERVAL, self.listener.accept()).await {
                Ok(Ok((stream, peer_addr))) => {
                    let service = Arc::clone(&self.service);
                    let policy = self.policy;
                    tokio::spawn(handle_connection(stream, peer_addr, service, policy));
                }
                Ok(Err(e)) => {
                    // e.g. too many open file descriptors; the listener survives.
                    error!("accept error: {e}");
                }
                Err(_) => {
                    // No connection within the poll interval.
                }
            }
        }

        Ok(())
    }
}

// ── Per-connection handler ────────────────────────────────────────────────────

/// Entry point of each per-connection task: tags the connection with an id
/// and logs how it ended.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    service: Arc<AutocompleteService>,
    policy: ReceivePolicy,
) {
    let connection_id = Uuid::new_v4();
    let span = info_span!("connection", id = %connection_id, peer = %peer_addr);

    async move {
        debug!(state = %ConnectionState::Accepted, "connection accepted");
        match run_connection(&mut stream, service, &policy).await {
            Ok(ConnectionOutcome::Responded) => info!("connection closed after response"),
            Ok(ConnectionOutcome::Ignored) => {
                info!("connection closed without response (unknown request type)")
            }
            Err(e) => warn!(state = %e.state, "connection closed with error: {e}"),
        }
    }
    .instrument(span)
    .await;
}

/// Runs one request/response exchange over `stream` and shuts the write half
/// down.
///
/// # Errors
///
/// Returns a [`ConnectionError`] naming the state the connection was in when
/// it failed.  No response is written after a failure.
pub async fn run_connection<S>(
    stream: &mut S,
    service: Arc<AutocompleteService>,
    policy: &ReceivePolicy,
) -> Result<ConnectionOutcome, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    use ConnectionState::*;

    let prefix = receive_exact(stream, LENGTH_PREFIX_SIZE, policy)
        .await
        .map_err(|e| ConnectionError::at(ReceivingLength)(e.into()))?;
    let mut raw = [0u8; LENGTH_PREFIX_SIZE];
    raw.copy_from_slice(&prefix);
    let declared = decode_length(raw);
    if declared > policy.max_frame_len {
        return Err(ConnectionError::at(ReceivingLength)(
            FrameError::FrameTooLarge {
                declared,
                limit: policy.max_frame_len,
            }
            .into(),
        ));
    }

    let payload = receive_exact(stream, declared, policy)
        .await
        .map_err(|e| ConnectionError::at(ReceivingPayload)(e.into()))?;
    debug!(bytes = payload.len(), "request received");

    let response = tokio::task::spawn_blocking(move || service.handle(&payload))
        .await
        .map_err(|e| ConnectionError::at(Processing)(e.into()))?
        .map_err(|e| ConnectionError::at(Processing)(e.into()))?;

    let outcome = match response {
        Some(response) => {
            let body = response
                .to_json()
                .map_err(|e| ConnectionError::at(SendingResponse)(e.into()))?;
            write_frame(stream, &body)
                .await
                .map_err(|e| ConnectionError::at(SendingResponse)(e.into()))?;
            debug!(bytes = body.len(), "response sent");
            ConnectionOutcome::Responded
        }
        None => ConnectionOutcome::Ignored,
    };

    // The peer may already be gone; the exchange is complete either way.
    let _ = stream.shutdown().await;
    debug!(state = %Closed, "connection finished");
    Ok(outcome)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use piano_core::protocol::frame::read_frame;
    use piano_core::{Predictor, PredictorError, Token, TokenCodec};

    use super::*;
    use crate::application::AutocompleteSettings;

    struct Echo;

    impl Predictor for Echo {
        fn predict(&self, tokens: &[Token], _: usize) -> Result<Vec<Token>, PredictorError> {
            Ok(tokens.to_vec())
        }
    }

    struct Broken;

    impl Predictor for Broken {
        fn predict(&self, _: &[Token], _: usize) -> Result<Vec<Token>, PredictorError> {
            Err(PredictorError::Failed("no model loaded".into()))
        }
    }

    fn service(predictor: impl Predictor + 'static) -> Arc<AutocompleteService> {
        Arc::new(AutocompleteService::new(
            TokenCodec::default(),
            Arc::new(predictor),
            AutocompleteSettings::default(),
        ))
    }

    fn quick_policy() -> ReceivePolicy {
        ReceivePolicy {
            timeout: Duration::from_millis(100),
            ..ReceivePolicy::default()
        }
    }

    fn framed(payload: &[u8]) -> Vec<u8> {
        piano_core::protocol::frame::encode_frame(payload).unwrap()
    }

    #[tokio::test]
    async fn test_run_connection_responds_to_autocomplete() {
        // Arrange
        let (mut client, mut server) = tokio::io::duplex(4096);
        client
            .write_all(&framed(
                br#"{"type":"autocomplete","data":[[60,0.0,0.5],[64,0.5,1.0]]}"#,
            ))
            .await
            .unwrap();

        // Act
        let outcome = run_connection(&mut server, service(Echo), &quick_policy())
            .await
            .unwrap();
        let reply = read_frame(&mut client, &quick_policy()).await.unwrap();

        // Assert
        assert_eq!(outcome, ConnectionOutcome::Responded);
        assert_eq!(reply, br#"{"data":[[60,0.0,0.5],[64,0.5,1.0]]}"#);
    }

    #[tokio::test]
    async fn test_run_connection_ignores_unknown_type() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client
            .write_all(&framed(br#"{"type":"harmonize","data":[]}"#))
            .await
            .unwrap();

        let outcome = run_connection(&mut server, service(Echo), &quick_policy())
            .await
            .unwrap();
        drop(server);
        let reply = read_frame(&mut client, &quick_policy()).await;

        assert_eq!(outcome, ConnectionOutcome::Ignored);
        assert!(matches!(reply, Err(FrameError::UnexpectedEof { received: 0, .. })));
    }

    #[tokio::test]
    async fn test_run_connection_times_out_waiting_for_length() {
        let (_client, mut server) = tokio::io::duplex(64);

        let err = run_connection(&mut server, service(Echo), &quick_policy())
            .await
            .unwrap_err();

        assert_eq!(err.state, ConnectionState::ReceivingLength);
        assert!(matches!(
            err.source,
            ConnectionFailure::Frame(FrameError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_connection_times_out_on_partial_payload() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&50u32.to_le_bytes()).await.unwrap();
        client.write_all(b"{\"type\"").await.unwrap();

        let err = run_connection(&mut server, service(Echo), &quick_policy())
            .await
            .unwrap_err();

        assert_eq!(err.state, ConnectionState::ReceivingPayload);
    }

    #[tokio::test]
    async fn test_run_connection_rejects_oversized_frame_before_reading_it() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let policy = ReceivePolicy {
            max_frame_len: 8,
            ..quick_policy()
        };
        client.write_all(&1_000u32.to_le_bytes()).await.unwrap();

        let err = run_connection(&mut server, service(Echo), &policy)
            .await
            .unwrap_err();

        assert_eq!(err.state, ConnectionState::ReceivingLength);
        assert!(matches!(
            err.source,
            ConnectionFailure::Frame(FrameError::FrameTooLarge { declared: 1_000, .. })
        ));
    }

    #[tokio::test]
    async fn test_run_connection_reports_predictor_failure_while_processing() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client
            .write_all(&framed(br#"{"type":"autocomplete","data":[[60,0,1]]}"#))
            .await
            .unwrap();

        let err = run_connection(&mut server, service(Broken), &quick_policy())
            .await
            .unwrap_err();

        assert_eq!(err.state, ConnectionState::Processing);
        assert!(matches!(
            err.source,
            ConnectionFailure::Router(RouterError::Predictor(_))
        ));
    }

    #[tokio::test]
    async fn test_bind_reports_address_in_use() {
        let first = AutocompleteServer::bind(
            ServerSettings {
                bind_addr: "127.0.0.1:0".parse().unwrap(),
                receive: ReceivePolicy::default(),
            },
            service(Echo),
        )
        .await
        .unwrap();
        let taken = first.local_addr().unwrap();

        let second = AutocompleteServer::bind(
            ServerSettings {
                bind_addr: taken,
                receive: ReceivePolicy::default(),
            },
            service(Echo),
        )
        .await;

        assert!(matches!(second, Err(ServerError::BindFailed { addr, .. }) if addr == taken));
    }

    #[test]
    fn test_connection_error_message_names_state() {
        let err = ConnectionError {
            state: ConnectionState::ReceivingPayload,
            source: FrameError::UnexpectedEof {
                received: 3,
                expected: 10,
            }
            .into(),
        };
        assert_eq!(
            err.to_string(),
            "connection failed while receiving payload: stream closed after 3 of 10 bytes"
        );
    }
}
