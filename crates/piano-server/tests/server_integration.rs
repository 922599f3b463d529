//! End-to-end tests for the autocomplete server over loopback TCP.
//!
//! Each test binds a server on an ephemeral port, runs its accept loop in a
//! background task, and talks to it with plain `TcpStream`s using the
//! framing primitives from `piano-core`.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use piano_core::protocol::frame::{read_frame, write_frame};
use piano_core::{FrameError, Predictor, PredictorError, ReceivePolicy, Token, TokenCodec};
use piano_server::application::{AutocompleteService, AutocompleteSettings};
use piano_server::infrastructure::predictor::IdentityPredictor;
use piano_server::infrastructure::{AutocompleteServer, ServerSettings};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

const SCENARIO_REQUEST: &[u8] = br#"{"type":"autocomplete","data":[[60,0.0,0.5],[64,0.5,1.0]]}"#;
const SCENARIO_RESPONSE: &[u8] = br#"{"data":[[60,0.0,0.5],[64,0.5,1.0]]}"#;

struct RunningServer {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl RunningServer {
    async fn stop(self) {
        self.running.store(false, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_secs(2), self.task)
            .await
            .expect("accept loop must notice the shutdown flag")
            .unwrap();
    }
}

async fn start_server(predictor: Arc<dyn Predictor>, receive_timeout: Duration) -> RunningServer {
    let service = Arc::new(AutocompleteService::new(
        TokenCodec::default(),
        predictor,
        AutocompleteSettings::default(),
    ));
    let server = AutocompleteServer::bind(
        ServerSettings {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            receive: ReceivePolicy {
                timeout: receive_timeout,
                ..ReceivePolicy::default()
            },
        },
        service,
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    let task = tokio::spawn(async move {
        server.serve(flag).await.unwrap();
    });
    RunningServer {
        addr,
        running,
        task,
    }
}

fn client_policy() -> ReceivePolicy {
    ReceivePolicy {
        timeout: Duration::from_secs(5),
        ..ReceivePolicy::default()
    }
}

async fn exchange(addr: SocketAddr, request: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut stream = TcpStream::connect(addr).await?;
    write_frame(&mut stream, request).await?;
    read_frame(&mut stream, &client_policy()).await
}

/// Sleeps inside `predict` to keep requests in flight concurrently.
struct SlowEcho(Duration);

impl Predictor for SlowEcho {
    fn predict(&self, tokens: &[Token], _: usize) -> Result<Vec<Token>, PredictorError> {
        std::thread::sleep(self.0);
        Ok(tokens.to_vec())
    }
}

#[tokio::test]
async fn test_identity_scenario_over_tcp() {
    let server = start_server(Arc::new(IdentityPredictor::new()), Duration::from_secs(5)).await;

    let reply = exchange(server.addr, SCENARIO_REQUEST).await.unwrap();

    assert_eq!(reply, SCENARIO_RESPONSE);
    server.stop().await;
}

#[tokio::test]
async fn test_unknown_type_closes_without_response() {
    let server = start_server(Arc::new(IdentityPredictor::new()), Duration::from_secs(5)).await;

    let result = exchange(server.addr, br#"{"type":"ping","data":[]}"#).await;

    assert!(matches!(
        result,
        Err(FrameError::UnexpectedEof { received: 0, .. }) | Err(FrameError::Io(_))
    ));
    server.stop().await;
}

#[tokio::test]
async fn test_malformed_envelope_closes_only_that_connection() {
    // Arrange
    let server = start_server(Arc::new(IdentityPredictor::new()), Duration::from_secs(5)).await;

    // Act: one bad request, then a good one on a fresh connection.
    let bad = exchange(server.addr, b"definitely not json").await;
    let good = exchange(server.addr, SCENARIO_REQUEST).await;

    // Assert
    assert!(bad.is_err());
    assert_eq!(good.unwrap(), SCENARIO_RESPONSE);
    server.stop().await;
}

#[tokio::test]
async fn test_stalled_client_is_dropped_and_listener_survives() {
    // Arrange: the server gives each receive 150 ms.
    let server = start_server(Arc::new(IdentityPredictor::new()), Duration::from_millis(150)).await;
    let mut stalled = TcpStream::connect(server.addr).await.unwrap();
    stalled.write_all(&100u32.to_le_bytes()).await.unwrap();
    stalled.write_all(b"{\"type\":").await.unwrap();

    // Act: the stalled connection is closed by the server...
    let closed = read_frame(&mut stalled, &client_policy()).await;
    // ...while new connections are still served.
    let good = exchange(server.addr, SCENARIO_REQUEST).await;

    // Assert
    assert!(closed.is_err());
    assert_eq!(good.unwrap(), SCENARIO_RESPONSE);
    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_connections_are_served_in_parallel() {
    // Arrange: each prediction takes 300 ms.
    let delay = Duration::from_millis(300);
    let server = start_server(Arc::new(SlowEcho(delay)), Duration::from_secs(5)).await;

    // Act: eight requests at once.
    let started = std::time::Instant::now();
    let requests: Vec<_> = (0..8)
        .map(|_| {
            let addr = server.addr;
            tokio::spawn(async move { exchange(addr, SCENARIO_REQUEST).await })
        })
        .collect();
    for request in requests {
        assert_eq!(request.await.unwrap().unwrap(), SCENARIO_RESPONSE);
    }

    // Assert: well under 8 × 300 ms.
    assert!(started.elapsed() < delay * 4, "took {:?}", started.elapsed());
    server.stop().await;
}

#[tokio::test]
async fn test_out_of_vocabulary_prediction_closes_without_response() {
    struct Garbage;
    impl Predictor for Garbage {
        fn predict(&self, _: &[Token], _: usize) -> Result<Vec<Token>, PredictorError> {
            Ok(vec![60, 10_000])
        }
    }
    let server = start_server(Arc::new(Garbage), Duration::from_secs(5)).await;

    let result = exchange(server.addr, SCENARIO_REQUEST).await;

    assert!(result.is_err());
    server.stop().await;
}
