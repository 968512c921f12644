//! Remote directory listing, v1 (`LIST`/`DENT`) and v2 (`LIS2`/`DNT2`).

use async_trait::async_trait;
use bytes::Buf;

use crate::device::Feature;
use crate::error::{Result, TetherError};
use crate::request::{ComplexRequest, Request, ValidationResponse, encode_command};
use crate::sync::stat::{parse_v2_fields, unexpected_magic, validate_remote_path};
use crate::sync::{
    FileEntry, FileEntryV1, MAX_REMOTE_PATH_LENGTH, SyncVersion, epoch_seconds, magic,
    select_version,
};
use crate::transport::Connection;

pub struct ListFileRequest {
    remote_path: String,
    version: SyncVersion,
    supported_features: Vec<Feature>,
}

impl ListFileRequest {
    pub fn v1(remote_path: impl Into<String>) -> Self {
        Self {
            remote_path: remote_path.into(),
            version: SyncVersion::V1,
            supported_features: Vec::new(),
        }
    }

    /// Extended records; requires [`Feature::LsV2`].
    pub fn v2(remote_path: impl Into<String>, supported_features: &[Feature]) -> Self {
        Self {
            remote_path: remote_path.into(),
            version: SyncVersion::V2,
            supported_features: supported_features.to_vec(),
        }
    }

    pub fn compat(remote_path: impl Into<String>, supported_features: &[Feature]) -> Self {
        let version = select_version(supported_features, Feature::LsV2);
        Self {
            remote_path: remote_path.into(),
            version,
            supported_features: supported_features.to_vec(),
        }
    }

    pub fn version(&self) -> SyncVersion {
        self.version
    }

    /// Read one dent name, validating its declared length first.
    async fn read_name(conn: &mut Connection, length: usize) -> Result<String> {
        if length > MAX_REMOTE_PATH_LENGTH {
            return Err(TetherError::FrameTooLarge {
                size: length,
                max: MAX_REMOTE_PATH_LENGTH,
            });
        }
        let pool = conn.buffers();
        let mut buf = pool.small().await;
        conn.read_exact(&mut buf[..length]).await?;
        Ok(String::from_utf8(buf[..length].to_vec())?)
    }
}

impl Request for ListFileRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(&self.target(), "sync:")
    }

    fn validate(&self) -> ValidationResponse {
        let response = validate_remote_path(&self.remote_path);
        if !response.success {
            return response;
        }
        if self.version == SyncVersion::V2 && !self.supported_features.contains(&Feature::LsV2) {
            return ValidationResponse::missing_feature(Feature::LsV2);
        }
        ValidationResponse::success()
    }
}

#[async_trait]
impl ComplexRequest for ListFileRequest {
    type Output = Vec<FileEntry>;

    async fn read_element(&mut self, conn: &mut Connection) -> Result<Vec<FileEntry>> {
        let (list_magic, dent_magic) = match self.version {
            SyncVersion::V1 => (magic::LIST_V1, magic::DENT_V1),
            SyncVersion::V2 => (magic::LIST_V2, magic::DENT_V2),
        };
        conn.write_sync_request(list_magic, &self.remote_path).await?;

        let mut entries = Vec::new();
        loop {
            let mut frame = [0u8; 4];
            conn.read_exact(&mut frame).await?;
            if &frame == magic::DONE {
                break;
            }
            if &frame != dent_magic {
                return Err(unexpected_magic(&frame));
            }

            match self.version {
                SyncVersion::V1 => {
                    let mut record = [0u8; 16];
                    conn.read_exact(&mut record).await?;
                    let mut fields = &record[..];
                    let mode = fields.get_u32_le();
                    let size = fields.get_u32_le();
                    let mtime = epoch_seconds(fields.get_u32_le() as i64);
                    let name_length = fields.get_u32_le() as usize;
                    let name = Self::read_name(conn, name_length).await?;
                    entries.push(FileEntry::V1(FileEntryV1 {
                        name: Some(name),
                        mode,
                        size,
                        mtime,
                    }));
                }
                SyncVersion::V2 => {
                    let mut record = [0u8; 72];
                    conn.read_exact(&mut record).await?;
                    let mut entry = parse_v2_fields(&record[..68]);
                    let name_length =
                        u32::from_le_bytes(record[68..72].try_into().expect("4-byte slice"))
                            as usize;
                    entry.name = Some(Self::read_name(conn, name_length).await?);
                    entries.push(FileEntry::V2(entry));
                }
            }
        }
        Ok(entries)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compat_selects_by_feature() {
        assert_eq!(
            ListFileRequest::compat("/sdcard", &[Feature::LsV2]).version(),
            SyncVersion::V2
        );
        assert_eq!(
            ListFileRequest::compat("/sdcard", &[]).version(),
            SyncVersion::V1
        );
    }

    #[test]
    fn v2_requires_the_feature() {
        assert!(!ListFileRequest::v2("/sdcard", &[]).validate().success);
        assert!(
            ListFileRequest::v2("/sdcard", &[Feature::LsV2])
                .validate()
                .success
        );
    }
}
