//! Length-prefixed framing over a reliable byte stream.
//!
//! Wire format:
//! ```text
//! [payload_len:4 little-endian][payload:N]
//! ```
//! There is no separator, version byte or checksum.  The payload is a UTF-8
//! JSON envelope (see [`crate::protocol::envelope`]).
//!
//! Reads are bounded: [`receive_exact`] computes one wall-clock deadline per
//! call and fails with [`FrameError::Timeout`] if the requested bytes have
//! not all arrived by then.  Partial reads are accumulated, never discarded.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};
use tracing::trace;

/// Size of the little-endian length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default bound on a single [`receive_exact`] call.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default largest payload a reader will allocate for.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Errors raised while reading or writing frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The deadline passed before all bytes arrived.
    #[error("receive timed out after {received} of {expected} bytes")]
    Timeout { received: usize, expected: usize },

    /// The peer closed the stream mid-frame.
    #[error("stream closed after {received} of {expected} bytes")]
    UnexpectedEof { received: usize, expected: usize },

    /// The length prefix announces more than the reader accepts.
    #[error("frame of {declared} bytes exceeds the {limit}-byte limit")]
    FrameTooLarge { declared: usize, limit: usize },

    /// The payload is too long for a 4-byte length prefix.
    #[error("payload of {0} bytes does not fit a 32-bit length prefix")]
    PayloadTooLarge(usize),

    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FrameError::Timeout { .. })
    }
}

/// Bounds applied to every receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivePolicy {
    /// Wall-clock budget for one [`receive_exact`] call.
    pub timeout: Duration,
    /// Largest payload [`read_frame`] accepts.
    pub max_frame_len: usize,
}

impl Default for ReceivePolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_RECEIVE_TIMEOUT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

// ── Pure helpers ──────────────────────────────────────────────────────────────

/// Prepends the 4-byte little-endian length to `payload`.
///
/// # Errors
///
/// Returns [`FrameError::PayloadTooLarge`] if the payload exceeds `u32::MAX`
/// bytes.
///
/// # Examples
///
/// ```rust
/// use piano_core::protocol::frame::encode_frame;
///
/// let bytes = encode_frame(b"hi").unwrap();
/// assert_eq!(bytes, vec![2, 0, 0, 0, b'h', b'i']);
/// ```
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge(payload.len()))?;
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Interprets a length prefix.
pub fn decode_length(prefix: [u8; LENGTH_PREFIX_SIZE]) -> usize {
    u32::from_le_bytes(prefix) as usize
}

// ── Stream primitives ─────────────────────────────────────────────────────────

/// Reads exactly `len` bytes from `reader`, or fails once
/// `policy.timeout` has elapsed since the call started.
///
/// # Errors
///
/// - [`FrameError::Timeout`] when the deadline passes first.
/// - [`FrameError::UnexpectedEof`] when the stream ends first.
/// - [`FrameError::Io`] for any other read failure.
pub async fn receive_exact<R>(
    reader: &mut R,
    len: usize,
    policy: &ReceivePolicy,
) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let deadline = Instant::now() + policy.timeout;
    let mut buf = vec![0u8; len];
    let mut filled = 0;

    while filled < len {
        let read = match timeout_at(deadline, reader.read(&mut buf[filled..])).await {
            Ok(read) => read,
            Err(_) => {
                return Err(FrameError::Timeout {
                    received: filled,
                    expected: len,
                })
            }
        };
        match read {
            Ok(0) => {
                return Err(FrameError::UnexpectedEof {
                    received: filled,
                    expected: len,
                })
            }
            Ok(n) => {
                filled += n;
                trace!(filled, len, "received chunk");
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(buf)
}

/// Reads one length-prefixed frame and returns its payload.
///
/// The prefix and the payload are each read with their own
/// [`receive_exact`] deadline.
///
/// # Errors
///
/// As for [`receive_exact`], plus [`FrameError::FrameTooLarge`] when the
/// prefix exceeds `policy.max_frame_len`.
pub async fn read_frame<R>(reader: &mut R, policy: &ReceivePolicy) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let prefix = receive_exact(reader, LENGTH_PREFIX_SIZE, policy).await?;
    let mut raw = [0u8; LENGTH_PREFIX_SIZE];
    raw.copy_from_slice(&prefix);
    let declared = decode_length(raw);
    if declared > policy.max_frame_len {
        return Err(FrameError::FrameTooLarge {
            declared,
            limit: policy.max_frame_len,
        });
    }
    receive_exact(reader, declared, policy).await
}

/// Writes `payload` as one frame and flushes the writer.
///
/// # Errors
///
/// Returns [`FrameError::PayloadTooLarge`] or [`FrameError::Io`].
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_policy() -> ReceivePolicy {
        ReceivePolicy {
            timeout: Duration::from_millis(100),
            ..ReceivePolicy::default()
        }
    }

    #[test]
    fn test_encode_frame_prefix_is_little_endian() {
        let payload = vec![0xAA; 0x0102];
        let bytes = encode_frame(&payload).unwrap();
        assert_eq!(&bytes[..4], &[0x02, 0x01, 0x00, 0x00]);
        assert_eq!(bytes.len(), 4 + 0x0102);
    }

    #[test]
    fn test_encode_empty_payload_is_prefix_only() {
        assert_eq!(encode_frame(&[]).unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_decode_length_reads_little_endian() {
        assert_eq!(decode_length([0x10, 0x27, 0x00, 0x00]), 10_000);
    }

    #[tokio::test]
    async fn test_receive_exact_accumulates_partial_reads() {
        // Arrange: the bytes trickle in over three reads with pauses between.
        let mut reader = tokio_test::io::Builder::new()
            .read(b"he")
            .wait(Duration::from_millis(5))
            .read(b"ll")
            .wait(Duration::from_millis(5))
            .read(b"o")
            .build();

        // Act
        let bytes = receive_exact(&mut reader, 5, &quick_policy()).await.unwrap();

        // Assert
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn test_receive_exact_zero_length_reads_nothing() {
        let mut reader = tokio_test::io::Builder::new().build();
        let bytes = receive_exact(&mut reader, 0, &quick_policy()).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_receive_exact_reports_eof_with_progress() {
        let mut reader = tokio_test::io::Builder::new().read(b"abc").build();
        let err = receive_exact(&mut reader, 8, &quick_policy()).await.unwrap_err();
        assert!(matches!(
            err,
            FrameError::UnexpectedEof {
                received: 3,
                expected: 8
            }
        ));
    }

    #[tokio::test]
    async fn test_receive_exact_times_out_on_stalled_sender() {
        // Arrange: the writer half stays open but only ever sends two bytes.
        let (mut reader, mut writer) = tokio::io::duplex(64);
        writer.write_all(&[1, 2]).await.unwrap();

        // Act
        let started = std::time::Instant::now();
        let err = receive_exact(&mut reader, 4, &quick_policy()).await.unwrap_err();

        // Assert
        assert!(err.is_timeout());
        assert!(matches!(
            err,
            FrameError::Timeout {
                received: 2,
                expected: 4
            }
        ));
        assert!(started.elapsed() < Duration::from_secs(2));
        drop(writer);
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized_prefix() {
        let policy = ReceivePolicy {
            max_frame_len: 16,
            ..quick_policy()
        };
        let mut reader = tokio_test::io::Builder::new()
            .read(&1024u32.to_le_bytes())
            .build();
        let err = read_frame(&mut reader, &policy).await.unwrap_err();
        assert!(matches!(
            err,
            FrameError::FrameTooLarge {
                declared: 1024,
                limit: 16
            }
        ));
    }

    #[tokio::test]
    async fn test_write_then_read_frame_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(16);
        let payload = br#"{"type":"autocomplete","data":[]}"#.to_vec();
        let expected = payload.clone();

        let writer = tokio::spawn(async move {
            write_frame(&mut client, &payload).await.unwrap();
            client
        });
        let received = read_frame(&mut server, &quick_policy()).await.unwrap();
        let _client = writer.await.unwrap();

        assert_eq!(received, expected);
    }
}
