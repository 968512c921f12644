//! Shell v2: framed streams with a real exit-code channel.
//!
//! The synchronous variant is strict — frame types that only make
//! sense client-to-server (`Stdin`, `CloseStdin`, `WindowSizeChange`)
//! or unrecognized bytes are protocol errors. The duplex variant is
//! lenient: it consumes and skips such frames, keeping the stream
//! aligned, since stdin echo can legitimately appear there.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Result, TetherError};
use crate::request::{
    AsyncChannelRequest, ComplexRequest, Request, Target, encode_command,
};
use crate::shell::{
    MessageType, ShellCommandInputChunk, ShellCommandResult, ShellCommandResultChunk,
};
use crate::transport::{Connection, MAX_FILE_PACKET_LENGTH};

/// Read one frame payload in pool-sized chunks, appending to `sink`.
async fn read_payload(conn: &mut Connection, length: usize, sink: &mut Vec<u8>) -> Result<()> {
    let pool = conn.buffers();
    let mut buf = pool.packet().await;
    let mut remaining = length;
    while remaining > 0 {
        let step = remaining.min(buf.len());
        conn.read_exact(&mut buf[..step]).await?;
        sink.extend_from_slice(&buf[..step]);
        remaining -= step;
    }
    Ok(())
}

/// Consume and discard one frame payload (lenient skip path).
async fn discard_payload(conn: &mut Connection, length: usize) -> Result<()> {
    if length > MAX_FILE_PACKET_LENGTH {
        return Err(TetherError::FrameTooLarge {
            size: length,
            max: MAX_FILE_PACKET_LENGTH,
        });
    }
    let pool = conn.buffers();
    let mut buf = pool.packet().await;
    let mut remaining = length;
    while remaining > 0 {
        let step = remaining.min(buf.len());
        conn.read_exact(&mut buf[..step]).await?;
        remaining -= step;
    }
    Ok(())
}

// ── Synchronous variant ──────────────────────────────────────────

/// `shell,v2,raw:<cmd>` — accumulate stdout/stderr until `EXIT`.
pub struct ShellCommandRequest {
    cmd: String,
    target: Target,
    io_timeout: Option<Duration>,
}

impl ShellCommandRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            target: Target::NonSpecified,
            io_timeout: None,
        }
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }
}

impl Request for ShellCommandRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(&self.target, &format!("shell,v2,raw:{}", self.cmd))
    }

    fn target(&self) -> Target {
        self.target.clone()
    }

    fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout
    }
}

#[async_trait]
impl ComplexRequest for ShellCommandRequest {
    type Output = ShellCommandResult;

    async fn read_element(&mut self, conn: &mut Connection) -> Result<ShellCommandResult> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let exit_code;

        loop {
            let message_type = MessageType::of(conn.read_u8().await?);
            match message_type {
                MessageType::Stdout => {
                    let length = conn.read_u32_le().await? as usize;
                    read_payload(conn, length, &mut stdout).await?;
                }
                MessageType::Stderr => {
                    let length = conn.read_u32_le().await? as usize;
                    read_payload(conn, length, &mut stderr).await?;
                }
                MessageType::Exit => {
                    // Declared length is ignored; the payload is one
                    // status byte.
                    let _length = conn.read_u32_le().await?;
                    exit_code = conn.read_u8().await? as i32;
                    break;
                }
                MessageType::Stdin
                | MessageType::CloseStdin
                | MessageType::WindowSizeChange
                | MessageType::Invalid => {
                    return Err(TetherError::UnexpectedShellFrame(message_type));
                }
            }
        }

        Ok(ShellCommandResult {
            stdout,
            stderr,
            exit_code,
        })
    }
}

// ── Channeled variant ────────────────────────────────────────────

/// Duplex shell session: stdin chunks in, stdout/stderr/exit chunks
/// out. `EXIT` terminates the stream; no frames follow it.
pub struct ChanneledShellCommandRequest {
    cmd: String,
    target: Target,
}

impl ChanneledShellCommandRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            target: Target::NonSpecified,
        }
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }
}

impl Request for ChanneledShellCommandRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(&self.target, &format!("shell,v2,raw:{}", self.cmd))
    }

    fn target(&self) -> Target {
        self.target.clone()
    }
}

#[async_trait]
impl AsyncChannelRequest for ChanneledShellCommandRequest {
    type Output = ShellCommandResultChunk;
    type Input = ShellCommandInputChunk;

    async fn read_element(
        &mut self,
        conn: &mut Connection,
        out: &mpsc::Sender<ShellCommandResultChunk>,
    ) -> Result<bool> {
        // Cooperative check: skip the step when the stream is quiet so
        // the write side gets its turn.
        let mut type_byte = [0u8; 1];
        match conn.read_available(&mut type_byte).await? {
            None => return Ok(true),
            Some(0) => return Ok(false),
            Some(_) => {}
        }

        match MessageType::of(type_byte[0]) {
            MessageType::Stdout => {
                let length = conn.read_u32_le().await? as usize;
                let mut data = Vec::new();
                read_payload(conn, length, &mut data).await?;
                out.send(ShellCommandResultChunk {
                    stdout: Some(data),
                    ..Default::default()
                })
                .await?;
                Ok(false)
            }
            MessageType::Stderr => {
                let length = conn.read_u32_le().await? as usize;
                let mut data = Vec::new();
                read_payload(conn, length, &mut data).await?;
                out.send(ShellCommandResultChunk {
                    stderr: Some(data),
                    ..Default::default()
                })
                .await?;
                Ok(false)
            }
            MessageType::Exit => {
                let _length = conn.read_u32_le().await?;
                let exit_code = conn.read_u8().await? as i32;
                out.send(ShellCommandResultChunk {
                    exit_code: Some(exit_code),
                    ..Default::default()
                })
                .await?;
                Ok(true)
            }
            MessageType::Stdin
            | MessageType::CloseStdin
            | MessageType::WindowSizeChange
            | MessageType::Invalid => {
                // Consume the payload so the stream stays frame-aligned,
                // then move on.
                let length = conn.read_u32_le().await? as usize;
                discard_payload(conn, length).await?;
                Ok(false)
            }
        }
    }

    async fn write_element(
        &mut self,
        item: ShellCommandInputChunk,
        conn: &mut Connection,
    ) -> Result<()> {
        if let Some(stdin) = item.stdin {
            conn.write_u8(MessageType::Stdin as u8).await?;
            conn.write_u32_le(stdin.len() as u32).await?;
            conn.write_all(&stdin).await?;
        }
        if item.close_stdin {
            conn.write_u8(MessageType::CloseStdin as u8).await?;
            conn.write_u32_le(0).await?;
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_uses_the_raw_v2_service() {
        let request = ShellCommandRequest::new("logcat -d");
        assert_eq!(
            String::from_utf8(request.serialize()).unwrap(),
            "0016shell,v2,raw:logcat -d"
        );
    }

    #[test]
    fn serialize_with_serial_target() {
        let request =
            ChanneledShellCommandRequest::new("cat").with_target(Target::Serial("abc".into()));
        let text = String::from_utf8(request.serialize()).unwrap();
        assert!(text.ends_with("host-serial:abc:shell,v2,raw:cat"));
    }
}
