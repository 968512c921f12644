//! A managed connection: one socket, one buffer pool, and the
//! protocol-level read/write helpers shared by every request.
//!
//! ## Wire conventions
//!
//! ```text
//! command header:   4 uppercase ASCII hex digits = byte length of rest
//! status token:     4 bytes, "OKAY" | "FAIL"
//! protocol string:  4 ASCII hex digits + that many payload bytes
//! sync frame:       4-byte magic + u32 LE length + payload
//! ```
//!
//! The header length is ASCII-hex big-endian-ish; sync numeric fields
//! are binary little-endian. The two encodings are never mixed.

use std::sync::Arc;

use bytes::{BufMut, BytesMut};

use crate::error::{Result, TetherError};
use crate::transport::{BufferPool, Socket, TransportResponse};

pub struct Connection {
    socket: Box<dyn Socket>,
    buffers: Arc<BufferPool>,
}

impl Connection {
    pub fn new(socket: Box<dyn Socket>, buffers: Arc<BufferPool>) -> Self {
        Self { socket, buffers }
    }

    /// The pool backing this connection's I/O staging.
    pub fn buffers(&self) -> Arc<BufferPool> {
        self.buffers.clone()
    }

    // ── Socket delegation ────────────────────────────────────────

    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.socket.read_exact(buf).await
    }

    pub async fn read_available(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        self.socket.read_available(buf).await
    }

    pub async fn read_u8(&mut self) -> Result<u8> {
        self.socket.read_u8().await
    }

    pub async fn read_u32_le(&mut self) -> Result<u32> {
        self.socket.read_u32_le().await
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.socket.write_all(buf).await
    }

    pub async fn write_u8(&mut self, value: u8) -> Result<()> {
        self.socket.write_u8(value).await
    }

    pub async fn write_u32_le(&mut self, value: u32) -> Result<()> {
        self.socket.write_u32_le(value).await
    }

    pub fn is_closed_for_read(&self) -> bool {
        self.socket.is_closed_for_read()
    }

    pub fn is_closed_for_write(&self) -> bool {
        self.socket.is_closed_for_write()
    }

    pub async fn close(&mut self) -> Result<()> {
        self.socket.close().await
    }

    // ── Status frames ────────────────────────────────────────────

    /// Read a 4-byte `OKAY`/`FAIL` token; on `FAIL`, also read the
    /// optional length-prefixed error message.
    pub async fn read_transport_response(&mut self) -> Result<TransportResponse> {
        let mut status = [0u8; 4];
        self.read_exact(&mut status).await?;
        if &status == b"OKAY" {
            return Ok(TransportResponse {
                ok: true,
                message: None,
            });
        }
        let message = self.read_optional_protocol_string().await?;
        Ok(TransportResponse { ok: false, message })
    }

    // ── Protocol strings ─────────────────────────────────────────

    /// Read a mandatory hex-length-prefixed string. A malformed size
    /// field or a short payload is an error, never a truncation.
    pub async fn read_protocol_string(&mut self) -> Result<String> {
        let mut size = [0u8; 4];
        self.read_exact(&mut size).await?;
        let length = parse_hex_length(&size)?;

        let mut payload = vec![0u8; length];
        self.read_exact(&mut payload).await?;
        Ok(String::from_utf8(payload)?)
    }

    /// Read a hex-length-prefixed string if the peer sent one.
    ///
    /// Used after `FAIL` tokens, where older daemons close the stream
    /// without a message. Returns `None` on EOF or a non-hex size.
    pub async fn read_optional_protocol_string(&mut self) -> Result<Option<String>> {
        let mut size = [0u8; 4];
        let mut filled = 0;
        while filled < 4 {
            match self.read_available(&mut size[filled..]).await? {
                None => return Ok(None),
                Some(0) => {
                    if self.is_closed_for_read() {
                        return Ok(None);
                    }
                    tokio::task::yield_now().await;
                }
                Some(n) => filled += n,
            }
        }
        let Ok(length) = parse_hex_length(&size) else {
            return Ok(None);
        };
        let mut payload = vec![0u8; length];
        self.read_exact(&mut payload).await?;
        Ok(Some(String::from_utf8_lossy(&payload).into_owned()))
    }

    /// Accumulate the rest of the stream as text (status trailers of
    /// `exec:`/install services).
    pub async fn read_string_to_eof(&mut self) -> Result<String> {
        let mut collected = Vec::new();
        let mut buf = self.buffers.packet().await;
        loop {
            match self.socket.read_available(&mut buf).await? {
                None => break,
                Some(0) => tokio::task::yield_now().await,
                Some(n) => collected.extend_from_slice(&buf[..n]),
            }
        }
        Ok(String::from_utf8_lossy(&collected).into_owned())
    }

    // ── Sync protocol frames ─────────────────────────────────────

    /// Write a v1 sync request frame: magic + u32 LE path length + path.
    pub async fn write_sync_request(&mut self, magic: &[u8; 4], path: &str) -> Result<()> {
        let path = path.as_bytes();
        let mut frame = BytesMut::with_capacity(8 + path.len());
        frame.put_slice(magic);
        frame.put_u32_le(path.len() as u32);
        frame.put_slice(path);
        self.write_all(&frame).await
    }

    /// Write a v2 sync request: the path frame, then a second frame
    /// carrying the optional mode and the flag word.
    pub async fn write_sync_v2_request(
        &mut self,
        magic: &[u8; 4],
        path: &str,
        flags: u32,
        mode: Option<u32>,
    ) -> Result<()> {
        self.write_sync_request(magic, path).await?;

        let mut frame = BytesMut::with_capacity(12);
        frame.put_slice(magic);
        if let Some(mode) = mode {
            frame.put_u32_le(mode);
        }
        frame.put_u32_le(flags);
        self.write_all(&frame).await
    }
}

/// Parse a 4-digit ASCII hex length field.
fn parse_hex_length(digits: &[u8; 4]) -> Result<usize> {
    let text = std::str::from_utf8(digits)
        .map_err(|_| TetherError::Encoding("length field is not ASCII".to_string()))?;
    usize::from_str_radix(text, 16)
        .map_err(|_| TetherError::Encoding(format!("length field is not hex: {text:?}")))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StreamSocket;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn pair() -> (Connection, DuplexStream) {
        let (near, far) = tokio::io::duplex(4096);
        let conn = Connection::new(
            Box::new(StreamSocket::new(near, None)),
            BufferPool::with_capacities(4, 2, 2),
        );
        (conn, far)
    }

    #[tokio::test]
    async fn transport_response_okay() {
        let (mut conn, mut far) = pair();
        far.write_all(b"OKAY").await.unwrap();
        let response = conn.read_transport_response().await.unwrap();
        assert!(response.ok);
        assert!(response.message.is_none());
    }

    #[tokio::test]
    async fn transport_response_fail_with_message() {
        let (mut conn, mut far) = pair();
        far.write_all(b"FAIL0013something-something").await.unwrap();
        let response = conn.read_transport_response().await.unwrap();
        assert!(!response.ok);
        assert_eq!(response.message.as_deref(), Some("something-something"));
    }

    #[tokio::test]
    async fn transport_response_fail_without_message() {
        let (mut conn, mut far) = pair();
        far.write_all(b"FAIL").await.unwrap();
        drop(far);
        let response = conn.read_transport_response().await.unwrap();
        assert!(!response.ok);
        assert!(response.message.is_none());
    }

    #[tokio::test]
    async fn protocol_string_round_trip() {
        let (mut conn, mut far) = pair();
        far.write_all(b"000Chello world!").await.unwrap();
        assert_eq!(conn.read_protocol_string().await.unwrap(), "hello world!");
    }

    #[tokio::test]
    async fn protocol_string_rejects_non_hex_size() {
        let (mut conn, mut far) = pair();
        far.write_all(b"zzzzgarbage").await.unwrap();
        assert!(matches!(
            conn.read_protocol_string().await,
            Err(TetherError::Encoding(_))
        ));
    }

    #[tokio::test]
    async fn protocol_string_short_payload_is_fatal() {
        let (mut conn, mut far) = pair();
        far.write_all(b"0010only-ten").await.unwrap();
        drop(far);
        assert!(conn.read_protocol_string().await.is_err());
    }

    #[tokio::test]
    async fn sync_request_layout() {
        let (mut conn, mut far) = pair();
        conn.write_sync_request(b"RECV", "/sdcard/f").await.unwrap();

        let mut frame = [0u8; 17];
        far.read_exact(&mut frame).await.unwrap();
        assert_eq!(&frame[0..4], b"RECV");
        assert_eq!(u32::from_le_bytes(frame[4..8].try_into().unwrap()), 9);
        assert_eq!(&frame[8..], b"/sdcard/f");
    }

    #[tokio::test]
    async fn sync_v2_request_layout_with_mode() {
        let (mut conn, mut far) = pair();
        conn.write_sync_v2_request(b"SND2", "/x", 1, Some(0o644))
            .await
            .unwrap();

        let mut path_frame = [0u8; 10];
        far.read_exact(&mut path_frame).await.unwrap();
        assert_eq!(&path_frame[0..4], b"SND2");
        assert_eq!(u32::from_le_bytes(path_frame[4..8].try_into().unwrap()), 2);
        assert_eq!(&path_frame[8..10], b"/x");

        let mut arg_frame = [0u8; 12];
        far.read_exact(&mut arg_frame).await.unwrap();
        assert_eq!(&arg_frame[0..4], b"SND2");
        assert_eq!(
            u32::from_le_bytes(arg_frame[4..8].try_into().unwrap()),
            0o644
        );
        assert_eq!(u32::from_le_bytes(arg_frame[8..12].try_into().unwrap()), 1);
    }
}
