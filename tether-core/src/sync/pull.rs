//! Single-file pull: `RECV`/`RCV2` + `DATA` stream until `DONE`.
//!
//! Progress is reported as a monotonically increasing fraction of
//! `bytes_received / total_size`; the total comes from a stat issued
//! during the handshake when the caller does not supply it. Completion
//! means the consumer observed `1.0` — absence of an error is not a
//! completion signal.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::device::Feature;
use crate::error::{Result, TetherError};
use crate::request::{AsyncChannelRequest, Request, ValidationResponse, encode_command};
use crate::sync::stat::{unexpected_magic, validate_remote_path};
use crate::sync::{StatFileRequest, SyncV2Flags, SyncVersion, magic, select_version};
use crate::transport::{Connection, MAX_FILE_PACKET_LENGTH};

pub struct PullFileRequest {
    remote_path: String,
    local_path: PathBuf,
    version: SyncVersion,
    supported_features: Vec<Feature>,
    io_timeout: Option<Duration>,
    total_bytes: Option<u64>,
    received: u64,
    file: Option<tokio::fs::File>,
}

impl PullFileRequest {
    pub fn v1(remote_path: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            remote_path: remote_path.into(),
            local_path: local_path.into(),
            version: SyncVersion::V1,
            supported_features: Vec::new(),
            io_timeout: None,
            total_bytes: None,
            received: 0,
            file: None,
        }
    }

    /// `RCV2` wire form; requires [`Feature::SendRecvV2`].
    pub fn v2(
        remote_path: impl Into<String>,
        local_path: impl Into<PathBuf>,
        supported_features: &[Feature],
    ) -> Self {
        let mut request = Self::v1(remote_path, local_path);
        request.version = SyncVersion::V2;
        request.supported_features = supported_features.to_vec();
        request
    }

    pub fn compat(
        remote_path: impl Into<String>,
        local_path: impl Into<PathBuf>,
        supported_features: &[Feature],
    ) -> Self {
        let mut request = Self::v1(remote_path, local_path);
        request.version = select_version(supported_features, Feature::SendRecvV2);
        request.supported_features = supported_features.to_vec();
        request
    }

    /// Skip the handshake stat by supplying a known size.
    pub fn with_size(mut self, total_bytes: u64) -> Self {
        self.total_bytes = Some(total_bytes);
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    pub fn version(&self) -> SyncVersion {
        self.version
    }

    async fn send_progress(&self, out: &mpsc::Sender<f64>) -> Result<()> {
        let total = self.total_bytes.unwrap_or(0);
        let fraction = if total == 0 {
            1.0
        } else {
            self.received as f64 / total as f64
        };
        out.send(fraction).await?;
        Ok(())
    }
}

#[async_trait]
impl Request for PullFileRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(&self.target(), "sync:")
    }

    fn validate(&self) -> ValidationResponse {
        let response = validate_remote_path(&self.remote_path);
        if !response.success {
            return response;
        }
        if self.version == SyncVersion::V2
            && !self.supported_features.contains(&Feature::SendRecvV2)
        {
            return ValidationResponse::missing_feature(Feature::SendRecvV2);
        }
        ValidationResponse::success()
    }

    fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout
    }

    async fn handshake(&mut self, conn: &mut Connection) -> Result<()> {
        let command = self.serialize();
        conn.write_all(&command).await?;
        let response = conn.read_transport_response().await?;
        if !response.ok {
            return Err(TetherError::Rejected(response.message_or_default()));
        }

        // The sync connection is live; learn the size if we must.
        if self.total_bytes.is_none() {
            let entry =
                StatFileRequest::stat_on(conn, &self.remote_path, SyncVersion::V1).await?;
            self.total_bytes = Some(entry.size());
        }

        if let Some(parent) = self.local_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        self.file = Some(tokio::fs::File::create(&self.local_path).await?);

        match self.version {
            SyncVersion::V1 => {
                conn.write_sync_request(magic::RECV_V1, &self.remote_path)
                    .await
            }
            SyncVersion::V2 => {
                conn.write_sync_v2_request(
                    magic::RECV_V2,
                    &self.remote_path,
                    SyncV2Flags::NONE.bits(),
                    None,
                )
                .await
            }
        }
    }
}

#[async_trait]
impl AsyncChannelRequest for PullFileRequest {
    type Output = f64;
    type Input = ();

    async fn read_element(
        &mut self,
        conn: &mut Connection,
        out: &mpsc::Sender<f64>,
    ) -> Result<bool> {
        let mut header = [0u8; 8];
        conn.read_exact(&mut header).await?;
        let frame_magic = &header[0..4];
        let length = u32::from_le_bytes(header[4..8].try_into().expect("4-byte slice")) as usize;

        if frame_magic == magic::DONE {
            if let Some(mut file) = self.file.take() {
                file.flush().await?;
            }
            if self.total_bytes == Some(0) {
                // No DATA frame ever fired a progress update.
                let _ = out.send(1.0).await;
            }
            return Ok(true);
        }

        if frame_magic == magic::DATA {
            if length > MAX_FILE_PACKET_LENGTH {
                return Err(TetherError::FrameTooLarge {
                    size: length,
                    max: MAX_FILE_PACKET_LENGTH,
                });
            }
            let pool = conn.buffers();
            let mut buf = pool.file().await;
            conn.read_exact(&mut buf[..length]).await?;
            let file = self
                .file
                .as_mut()
                .ok_or(TetherError::ProtocolViolation("DATA frame after DONE"))?;
            file.write_all(&buf[..length]).await?;
            self.received += length as u64;
            self.send_progress(out).await?;
            return Ok(false);
        }

        if frame_magic == magic::FAIL {
            let length = length.min(MAX_FILE_PACKET_LENGTH);
            let mut message = vec![0u8; length];
            conn.read_exact(&mut message).await?;
            return Err(TetherError::PullFailed {
                path: self.remote_path.clone(),
                message: String::from_utf8_lossy(&message).into_owned(),
            });
        }

        Err(unexpected_magic(frame_magic))
    }

    async fn write_element(&mut self, _item: (), _conn: &mut Connection) -> Result<()> {
        Ok(())
    }

    async fn on_close(&mut self, _out: &mpsc::Sender<f64>) -> Result<()> {
        // Cancellation path: make sure buffered writes reach disk.
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compat_selects_by_feature() {
        let tmp = std::env::temp_dir().join("tether-pull-compat");
        assert_eq!(
            PullFileRequest::compat("/x", &tmp, &[Feature::SendRecvV2]).version(),
            SyncVersion::V2
        );
        assert_eq!(
            PullFileRequest::compat("/x", &tmp, &[]).version(),
            SyncVersion::V1
        );
    }

    #[test]
    fn v2_requires_the_feature() {
        let tmp = std::env::temp_dir().join("tether-pull-v2");
        assert!(!PullFileRequest::v2("/x", &tmp, &[]).validate().success);
    }
}
