//! Client transport abstraction.
//!
//! This mirrors the shape of an `IpcTransport`: a thin, async, object-safe
//! seam so the connection registry and dispatcher never depend on the
//! concrete socket type. The core only ever sees `{send, recv, close}`;
//! it does not interpret frame contents beyond the delimited-read
//! discipline described in the socket server module.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Maximum size, in bytes, of any single handshake or data frame.
///
/// Frames are newline-delimited; a read that exceeds this cap without
/// finding a delimiter is treated as `MalformedFrame` rather than
/// silently truncated or buffered without bound.
pub const MAX_FRAME_BYTES: usize = 32_000;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Stable per-connection identity, used for transport identity comparisons.
///
/// The registry keys on this id rather than on the transport value itself
/// (the Python original used mutable socket objects as dictionary keys).
pub type ConnectionId = u64;

/// A bidirectional, framed byte channel to one connected worker.
///
/// Implementations must be safe to hold behind an `Arc` and called from
/// multiple tasks concurrently (the registry broadcasts to many
/// transports from a single dispatcher call, and a transport's own
/// receiver task reads from it independently).
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Stable identity for this connection, used for registry membership
    /// and `remove_client` lookups.
    fn id(&self) -> ConnectionId;

    /// Send one frame. A trailing delimiter is appended by the
    /// implementation; callers pass the undelimited payload.
    ///
    /// Returns the raw io error on failure; the transport has no notion
    /// of "topic", so it is the dispatcher's job to wrap this into a
    /// `BoltError::DispatchFailed` naming the topic being broadcast to.
    async fn send(&self, frame: &[u8]) -> std::io::Result<()>;

    /// Read one frame, blocking until a full frame, a disconnect (empty
    /// read), or a frame-too-large error occurs.
    async fn recv(&self) -> std::io::Result<Vec<u8>>;

    /// Shut down the underlying channel. Idempotent.
    async fn close(&self);
}

impl fmt::Debug for dyn ClientTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientTransport").field("id", &self.id()).finish()
    }
}

/// The shipped transport: a Tokio `TcpStream` split into independently
/// lockable read/write halves so a connection's receiver task and the
/// dispatcher's broadcast writes never contend on the same lock.
pub struct TcpClientTransport {
    id: ConnectionId,
    writer: Mutex<OwnedWriteHalf>,
    reader: Mutex<BufReader<OwnedReadHalf>>,
}

impl TcpClientTransport {
    pub fn new(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            writer: Mutex::new(write_half),
            reader: Mutex::new(BufReader::new(read_half)),
        }
    }
}

#[async_trait]
impl ClientTransport for TcpClientTransport {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send(&self, frame: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await?;
        writer.write_all(b"\n").await
    }

    async fn recv(&self) -> std::io::Result<Vec<u8>> {
        let mut reader = self.reader.lock().await;
        let mut buf = Vec::new();
        let n = read_delimited(&mut *reader, &mut buf).await?;
        if n == 0 {
            return Ok(Vec::new());
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        Ok(buf)
    }

    async fn close(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// Read up to `MAX_FRAME_BYTES` looking for a `\n` delimiter.
///
/// Returns `Ok(0)` on a clean disconnect (no bytes at all, no delimiter).
/// Returns an `InvalidData` io error if the cap is hit before a
/// delimiter is found, which callers surface as `MalformedFrame`.
async fn read_delimited<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<usize> {
    let mut total = 0usize;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(total);
        }
        if let Some(pos) = available.iter().position(|&b| b == b'\n') {
            buf.extend_from_slice(&available[..=pos]);
            total += pos + 1;
            reader.consume(pos + 1);
            return Ok(total);
        }
        let chunk_len = available.len();
        if total + chunk_len > MAX_FRAME_BYTES {
            reader.consume(chunk_len);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "frame exceeded maximum size without a delimiter",
            ));
        }
        buf.extend_from_slice(available);
        total += chunk_len;
        reader.consume(chunk_len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader as TokioBufReader;

    #[tokio::test]
    async fn reads_one_delimited_frame() {
        let data = b"hello world\nsecond\n".to_vec();
        let mut reader = TokioBufReader::new(&data[..]);
        let mut buf = Vec::new();
        let n = read_delimited(&mut reader, &mut buf).await.unwrap();
        assert_eq!(n, 12);
        assert_eq!(buf, b"hello world\n");
    }

    #[tokio::test]
    async fn empty_input_signals_disconnect() {
        let data: Vec<u8> = Vec::new();
        let mut reader = TokioBufReader::new(&data[..]);
        let mut buf = Vec::new();
        let n = read_delimited(&mut reader, &mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn oversized_frame_without_delimiter_errors() {
        let data = vec![b'a'; MAX_FRAME_BYTES + 10];
        let mut reader = TokioBufReader::new(&data[..]);
        let mut buf = Vec::new();
        let err = read_delimited(&mut reader, &mut buf).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
