//! Byte-oriented duplex transport to the daemon.
//!
//! The [`Socket`] trait is the only surface the protocol layer sees;
//! the primary implementation wraps any `AsyncRead + AsyncWrite`
//! stream (a `TcpStream` in production, an in-memory duplex pipe in
//! tests). All operations suspend; none silently lose bytes.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

mod buffer;
mod conn;
mod stream;

pub use buffer::{
    BufferPool, MAX_FILE_PACKET_LENGTH, MAX_PACKET_LENGTH, PooledBuffer, SMALL_BUFFER_LENGTH,
};
pub use conn::Connection;
pub use stream::{StreamSocket, TcpSocketFactory};

// ── Socket ───────────────────────────────────────────────────────

/// A suspending duplex byte stream.
///
/// `read_exact` either fills the buffer or errors — a short read is an
/// I/O error, never a silent truncation. `read_available` is the
/// cooperative variant: `Some(0)` means nothing buffered right now
/// (yield and retry), `None` means end of stream.
#[async_trait]
pub trait Socket: Send {
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;
    async fn read_available(&mut self, buf: &mut [u8]) -> Result<Option<usize>>;
    async fn read_u8(&mut self) -> Result<u8>;
    async fn read_u32_le(&mut self) -> Result<u32>;

    async fn write_all(&mut self, buf: &[u8]) -> Result<()>;
    async fn write_u8(&mut self, value: u8) -> Result<()>;
    async fn write_u32_le(&mut self, value: u32) -> Result<()>;

    fn is_closed_for_read(&self) -> bool;
    fn is_closed_for_write(&self) -> bool;

    /// Idempotent. Releases the OS resources behind the stream.
    async fn close(&mut self) -> Result<()>;
}

// ── SocketFactory ────────────────────────────────────────────────

/// Opens a fresh socket per request execution.
///
/// Every request runs on its own connection; the factory is how tests
/// point the client at a scripted daemon.
#[async_trait]
pub trait SocketFactory: Send + Sync {
    async fn connect(&self, idle_timeout: Option<Duration>) -> Result<Box<dyn Socket>>;
}

// ── TransportResponse ────────────────────────────────────────────

/// Result of reading a 4-byte `OKAY`/`FAIL` status token, with the
/// optional length-prefixed message that follows a `FAIL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub ok: bool,
    pub message: Option<String>,
}

impl TransportResponse {
    /// The daemon's message, or a placeholder when none was sent.
    pub fn message_or_default(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| "no response message".to_string())
    }
}
