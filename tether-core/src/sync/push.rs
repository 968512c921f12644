//! Single-file push: `SEND`/`SND2`, a `DATA` stream from the local
//! source, then `DONE` + mtime and the daemon's final status.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::device::Feature;
use crate::error::{Result, TetherError};
use crate::request::{AsyncChannelRequest, Request, ValidationResponse, encode_command};
use crate::sync::stat::validate_remote_path;
use crate::sync::{
    SyncV2Flags, SyncVersion, magic, seconds_since_epoch, select_version,
};
use crate::transport::{Connection, MAX_FILE_PACKET_LENGTH};

/// Room left for the `DATA` + length header inside one file buffer.
/// USB bridges are picky about the chunk size, so the payload cap
/// matches the daemon's default exactly.
const DATA_HEADER_LENGTH: usize = 8;

pub struct PushFileRequest {
    local_path: PathBuf,
    remote_path: String,
    mode: u32,
    version: SyncVersion,
    supported_features: Vec<Feature>,
    dry_run: bool,
    io_timeout: Option<Duration>,
    total_bytes: u64,
    sent: u64,
    mtime_seconds: u32,
    file: Option<tokio::fs::File>,
}

impl PushFileRequest {
    pub fn v1(local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            mode: 0o777,
            version: SyncVersion::V1,
            supported_features: Vec::new(),
            dry_run: false,
            io_timeout: None,
            total_bytes: 0,
            sent: 0,
            mtime_seconds: 0,
            file: None,
        }
    }

    /// `SND2` wire form; requires [`Feature::SendRecvV2`].
    pub fn v2(
        local_path: impl Into<PathBuf>,
        remote_path: impl Into<String>,
        supported_features: &[Feature],
    ) -> Self {
        let mut request = Self::v1(local_path, remote_path);
        request.version = SyncVersion::V2;
        request.supported_features = supported_features.to_vec();
        request
    }

    pub fn compat(
        local_path: impl Into<PathBuf>,
        remote_path: impl Into<String>,
        supported_features: &[Feature],
    ) -> Self {
        let mut request = Self::v1(local_path, remote_path);
        request.version = select_version(supported_features, Feature::SendRecvV2);
        request.supported_features = supported_features.to_vec();
        request
    }

    /// Permission bits applied on the remote side (default `0777`).
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Ask the daemon to verify without writing; requires
    /// [`Feature::SendRecvV2DryRunSend`].
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    pub fn version(&self) -> SyncVersion {
        self.version
    }

    fn mode_value(&self) -> u32 {
        self.mode & 0o777
    }
}

#[async_trait]
impl Request for PushFileRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(&self.target(), "sync:")
    }

    fn validate(&self) -> ValidationResponse {
        let response = validate_remote_path(&self.remote_path);
        if !response.success {
            return response;
        }
        let metadata = match std::fs::metadata(&self.local_path) {
            Ok(metadata) => metadata,
            Err(_) => {
                return ValidationResponse::failure(format!(
                    "local file {} doesn't exist",
                    self.local_path.display()
                ));
            }
        };
        if !metadata.is_file() {
            return ValidationResponse::failure(format!(
                "{} is not a file",
                self.local_path.display()
            ));
        }
        if self.version == SyncVersion::V2 {
            if !self.supported_features.contains(&Feature::SendRecvV2) {
                return ValidationResponse::missing_feature(Feature::SendRecvV2);
            }
            if self.dry_run
                && !self
                    .supported_features
                    .contains(&Feature::SendRecvV2DryRunSend)
            {
                return ValidationResponse::missing_feature(Feature::SendRecvV2DryRunSend);
            }
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

        let file = tokio::fs::File::open(&self.local_path).await?;
        let metadata = file.metadata().await?;
        self.total_bytes = metadata.len();
        self.mtime_seconds = metadata
            .modified()
            .map(seconds_since_epoch)
            .unwrap_or_default();
        self.file = Some(file);

        match self.version {
            SyncVersion::V1 => {
                let spec = format!("{},{}", self.remote_path, self.mode_value());
                conn.write_sync_request(magic::SEND_V1, &spec).await
            }
            SyncVersion::V2 => {
                let mut flags = SyncV2Flags::NONE;
                if self.dry_run {
                    flags |= SyncV2Flags::DRY_RUN;
                }
                conn.write_sync_v2_request(
                    magic::SEND_V2,
                    &self.remote_path,
                    flags.bits(),
                    Some(self.mode_value()),
                )
                .await
            }
        }
    }
}

#[async_trait]
impl AsyncChannelRequest for PushFileRequest {
    type Output = f64;
    type Input = ();

    /// The push direction drives from here: each step ships one `DATA`
    /// frame; source exhaustion ships `DONE` + mtime and reads the
    /// daemon's verdict.
    async fn read_element(
        &mut self,
        conn: &mut Connection,
        out: &mpsc::Sender<f64>,
    ) -> Result<bool> {
        let file = self
            .file
            .as_mut()
            .ok_or(TetherError::ProtocolViolation("push already completed"))?;

        let pool = conn.buffers();
        let mut buf = pool.file().await;
        let capacity = MAX_FILE_PACKET_LENGTH - DATA_HEADER_LENGTH;
        let read = file
            .read(&mut buf[DATA_HEADER_LENGTH..DATA_HEADER_LENGTH + capacity])
            .await?;

        if read > 0 {
            buf[0..4].copy_from_slice(magic::DATA);
            buf[4..8].copy_from_slice(&(read as u32).to_le_bytes());
            conn.write_all(&buf[..DATA_HEADER_LENGTH + read]).await?;
            self.sent += read as u64;
            if self.total_bytes > 0 {
                out.send(self.sent as f64 / self.total_bytes as f64).await?;
            }
            return Ok(false);
        }

        // Source exhausted.
        self.file = None;
        let mut done = [0u8; 8];
        done[0..4].copy_from_slice(magic::DONE);
        done[4..8].copy_from_slice(&self.mtime_seconds.to_le_bytes());
        conn.write_all(&done).await?;

        let response = conn.read_transport_response().await?;
        if response.ok {
            out.send(1.0).await?;
            Ok(true)
        } else {
            Err(TetherError::PushFailed {
                path: self.remote_path.clone(),
                message: response.message_or_default(),
            })
        }
    }

    async fn write_element(&mut self, _item: (), _conn: &mut Connection) -> Result<()> {
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn validation_requires_an_existing_file() {
        let request = PushFileRequest::v1("/definitely/not/here", "/sdcard/f");
        let response = request.validate();
        assert!(!response.success);
        assert!(response.message.unwrap().contains("doesn't exist"));
    }

    #[test]
    fn validation_rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        let request = PushFileRequest::v1(dir.path(), "/sdcard/f");
        assert!(!request.validate().success);
    }

    #[test]
    fn compat_and_dry_run_gating() {
        let mut local = tempfile::NamedTempFile::new().unwrap();
        local.write_all(b"payload").unwrap();

        let request = PushFileRequest::compat(local.path(), "/x", &[Feature::SendRecvV2]);
        assert_eq!(request.version(), SyncVersion::V2);

        let request =
            PushFileRequest::v2(local.path(), "/x", &[Feature::SendRecvV2]).dry_run();
        assert!(!request.validate().success);

        let request = PushFileRequest::v2(
            local.path(),
            "/x",
            &[Feature::SendRecvV2, Feature::SendRecvV2DryRunSend],
        )
        .dry_run();
        assert!(request.validate().success);
    }

    #[test]
    fn mode_is_masked_to_permission_bits() {
        let request = PushFileRequest::v1("/tmp/x", "/x").with_mode(0o100644);
        assert_eq!(request.mode_value(), 0o644);
    }
}
