//! `Socket` implementation over any async byte stream.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Result, TetherError};
use crate::transport::{Socket, SocketFactory};

/// Granularity of the cooperative `read_available` poll.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ── StreamSocket ─────────────────────────────────────────────────

/// Wraps an `AsyncRead + AsyncWrite` stream into the [`Socket`]
/// contract, with an optional idle-read deadline.
///
/// Production wraps a `TcpStream`; tests wrap `tokio::io::duplex`.
pub struct StreamSocket<S> {
    stream: S,
    idle_timeout: Option<Duration>,
    last_data: Instant,
    read_closed: bool,
    write_closed: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> StreamSocket<S> {
    pub fn new(stream: S, idle_timeout: Option<Duration>) -> Self {
        Self {
            stream,
            idle_timeout,
            last_data: Instant::now(),
            read_closed: false,
            write_closed: false,
        }
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Unpin + Send> Socket for StreamSocket<S> {
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let result = match self.idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.stream.read_exact(buf)).await {
                Ok(inner) => inner.map(|_| ()).map_err(TetherError::from),
                Err(_) => Err(TetherError::Timeout(limit)),
            },
            None => self
                .stream
                .read_exact(buf)
                .await
                .map(|_| ())
                .map_err(TetherError::from),
        };
        match result {
            Ok(()) => {
                self.last_data = Instant::now();
                Ok(())
            }
            Err(e) => {
                self.read_closed = true;
                Err(e)
            }
        }
    }

    async fn read_available(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        if self.read_closed {
            return Ok(None);
        }
        match tokio::time::timeout(READ_POLL_INTERVAL, self.stream.read(buf)).await {
            Ok(Ok(0)) => {
                self.read_closed = true;
                Ok(None)
            }
            Ok(Ok(n)) => {
                self.last_data = Instant::now();
                Ok(Some(n))
            }
            Ok(Err(e)) => {
                self.read_closed = true;
                Err(e.into())
            }
            Err(_) => {
                if let Some(limit) = self.idle_timeout {
                    if self.last_data.elapsed() > limit {
                        self.read_closed = true;
                        return Err(TetherError::Timeout(limit));
                    }
                }
                Ok(Some(0))
            }
        }
    }

    async fn read_u8(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte).await?;
        Ok(byte[0])
    }

    async fn read_u32_le(&mut self) -> Result<u32> {
        let mut word = [0u8; 4];
        self.read_exact(&mut word).await?;
        Ok(u32::from_le_bytes(word))
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match self.stream.write_all(buf).await {
            Ok(()) => {
                self.stream.flush().await?;
                Ok(())
            }
            Err(e) => {
                self.write_closed = true;
                Err(e.into())
            }
        }
    }

    async fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_all(&[value]).await
    }

    async fn write_u32_le(&mut self, value: u32) -> Result<()> {
        self.write_all(&value.to_le_bytes()).await
    }

    fn is_closed_for_read(&self) -> bool {
        self.read_closed
    }

    fn is_closed_for_write(&self) -> bool {
        self.write_closed
    }

    async fn close(&mut self) -> Result<()> {
        if self.write_closed {
            return Ok(());
        }
        self.write_closed = true;
        self.read_closed = true;
        // Peer may already be gone; shutdown failure is not an error.
        let _ = self.stream.shutdown().await;
        Ok(())
    }
}

// ── TcpSocketFactory ─────────────────────────────────────────────

/// Dials the daemon over TCP. One connection per request.
pub struct TcpSocketFactory {
    address: SocketAddr,
    default_timeout: Option<Duration>,
}

impl TcpSocketFactory {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            default_timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Override the idle timeout applied when a request sets none.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }
}

#[async_trait]
impl SocketFactory for TcpSocketFactory {
    async fn connect(&self, idle_timeout: Option<Duration>) -> Result<Box<dyn Socket>> {
        let stream = TcpStream::connect(self.address).await?;
        stream.set_nodelay(true)?;
        let timeout = idle_timeout.or(self.default_timeout);
        Ok(Box::new(StreamSocket::new(stream, timeout)))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_exact_and_integers() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut socket = StreamSocket::new(client, None);

        server.write_all(b"OKAY").await.unwrap();
        server.write_all(&1234u32.to_le_bytes()).await.unwrap();
        server.write_all(&[7]).await.unwrap();

        let mut status = [0u8; 4];
        socket.read_exact(&mut status).await.unwrap();
        assert_eq!(&status, b"OKAY");
        assert_eq!(socket.read_u32_le().await.unwrap(), 1234);
        assert_eq!(socket.read_u8().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn read_available_reports_empty_then_data_then_eof() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut socket = StreamSocket::new(client, None);
        let mut buf = [0u8; 16];

        assert_eq!(socket.read_available(&mut buf).await.unwrap(), Some(0));

        server.write_all(b"abc").await.unwrap();
        assert_eq!(socket.read_available(&mut buf).await.unwrap(), Some(3));
        assert_eq!(&buf[..3], b"abc");

        drop(server);
        assert_eq!(socket.read_available(&mut buf).await.unwrap(), None);
        assert!(socket.is_closed_for_read());
    }

    #[tokio::test]
    async fn idle_timeout_raises_and_closes() {
        let (client, _server) = tokio::io::duplex(64);
        let mut socket = StreamSocket::new(client, Some(Duration::from_millis(30)));

        let mut buf = [0u8; 4];
        let err = socket.read_exact(&mut buf).await.unwrap_err();
        assert!(matches!(err, TetherError::Timeout(_)));
        assert!(socket.is_closed_for_read());
    }

    #[tokio::test]
    async fn short_read_is_an_error() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut socket = StreamSocket::new(client, None);

        server.write_all(b"ab").await.unwrap();
        drop(server);

        let mut buf = [0u8; 4];
        assert!(socket.read_exact(&mut buf).await.is_err());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (client, _server) = tokio::io::duplex(64);
        let mut socket = StreamSocket::new(client, None);
        socket.close().await.unwrap();
        socket.close().await.unwrap();
        assert!(socket.is_closed_for_write());
    }
}
