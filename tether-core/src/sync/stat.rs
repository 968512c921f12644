//! Remote `stat` over the sync service, v1 (`STAT`) and v2 (`LST2`).

use async_trait::async_trait;
use bytes::Buf;

use crate::device::Feature;
use crate::error::{Result, TetherError};
use crate::request::{ComplexRequest, Request, ValidationResponse, encode_command};
use crate::sync::{
    FileEntry, FileEntryV1, FileEntryV2, MAX_REMOTE_PATH_LENGTH, SyncVersion, epoch_seconds,
    magic, select_version,
};
use crate::transport::Connection;

pub struct StatFileRequest {
    remote_path: String,
    version: SyncVersion,
    supported_features: Vec<Feature>,
}

impl StatFileRequest {
    /// Legacy 16-byte record.
    pub fn v1(remote_path: impl Into<String>) -> Self {
        Self {
            remote_path: remote_path.into(),
            version: SyncVersion::V1,
            supported_features: Vec::new(),
        }
    }

    /// Extended record; requires [`Feature::StatV2`].
    pub fn v2(remote_path: impl Into<String>, supported_features: &[Feature]) -> Self {
        Self {
            remote_path: remote_path.into(),
            version: SyncVersion::V2,
            supported_features: supported_features.to_vec(),
        }
    }

    /// Pick v2 when the device advertises it, v1 otherwise.
    pub fn compat(remote_path: impl Into<String>, supported_features: &[Feature]) -> Self {
        let version = select_version(supported_features, Feature::StatV2);
        Self {
            remote_path: remote_path.into(),
            version,
            supported_features: supported_features.to_vec(),
        }
    }

    pub fn version(&self) -> SyncVersion {
        self.version
    }

    /// Issue the stat frames on an already-handshaken sync connection.
    /// Also used by pull requests to learn a file's size.
    pub(crate) async fn stat_on(
        conn: &mut Connection,
        remote_path: &str,
        version: SyncVersion,
    ) -> Result<FileEntry> {
        match version {
            SyncVersion::V1 => {
                conn.write_sync_request(magic::LSTAT_V1, remote_path).await?;

                let mut record = [0u8; 16];
                conn.read_exact(&mut record).await?;
                if &record[0..4] != magic::LSTAT_V1 {
                    return Err(unexpected_magic(&record[0..4]));
                }
                let mut fields = &record[4..];
                Ok(FileEntry::V1(FileEntryV1 {
                    name: None,
                    mode: fields.get_u32_le(),
                    size: fields.get_u32_le(),
                    mtime: epoch_seconds(fields.get_u32_le() as i64),
                }))
            }
            SyncVersion::V2 => {
                conn.write_sync_request(magic::LSTAT_V2, remote_path).await?;

                let mut record = [0u8; 72];
                conn.read_exact(&mut record).await?;
                if &record[0..4] != magic::LSTAT_V2 {
                    return Err(unexpected_magic(&record[0..4]));
                }
                Ok(FileEntry::V2(parse_v2_fields(&record[4..])))
            }
        }
    }
}

/// Parse the 68 bytes of v2 stat fields that follow the magic.
pub(crate) fn parse_v2_fields(mut fields: &[u8]) -> FileEntryV2 {
    FileEntryV2 {
        name: None,
        error: fields.get_u32_le(),
        dev: fields.get_u64_le(),
        ino: fields.get_u64_le(),
        mode: fields.get_u32_le(),
        nlink: fields.get_u32_le(),
        uid: fields.get_u32_le(),
        gid: fields.get_u32_le(),
        size: fields.get_u64_le(),
        atime: epoch_seconds(fields.get_i64_le()),
        mtime: epoch_seconds(fields.get_i64_le()),
        ctime: epoch_seconds(fields.get_i64_le()),
    }
}

pub(crate) fn unexpected_magic(bytes: &[u8]) -> TetherError {
    TetherError::UnexpectedSyncFrame(String::from_utf8_lossy(bytes).into_owned())
}

pub(crate) fn validate_remote_path(path: &str) -> ValidationResponse {
    if path.len() > MAX_REMOTE_PATH_LENGTH {
        ValidationResponse::path_too_long()
    } else {
        ValidationResponse::success()
    }
}

impl Request for StatFileRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(&self.target(), "sync:")
    }

    fn validate(&self) -> ValidationResponse {
        let response = validate_remote_path(&self.remote_path);
        if !response.success {
            return response;
        }
        if self.version == SyncVersion::V2
            && !self.supported_features.contains(&Feature::StatV2)
        {
            return ValidationResponse::missing_feature(Feature::StatV2);
        }
        ValidationResponse::success()
    }
}

#[async_trait]
impl ComplexRequest for StatFileRequest {
    type Output = FileEntry;

    async fn read_element(&mut self, conn: &mut Connection) -> Result<FileEntry> {
        Self::stat_on(conn, &self.remote_path, self.version).await
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::file_type;

    #[test]
    fn serialize_is_the_sync_service() {
        let request = StatFileRequest::v1("/sdcard/f");
        assert_eq!(request.serialize(), b"0005sync:");
    }

    #[test]
    fn v2_requires_the_feature() {
        let request = StatFileRequest::v2("/sdcard/f", &[]);
        assert!(!request.validate().success);

        let request = StatFileRequest::v2("/sdcard/f", &[Feature::StatV2]);
        assert!(request.validate().success);
    }

    #[test]
    fn long_path_fails_validation() {
        let path = "a".repeat(MAX_REMOTE_PATH_LENGTH + 1);
        assert!(!StatFileRequest::v1(path).validate().success);
    }

    #[test]
    fn compat_selects_by_feature() {
        let request = StatFileRequest::compat("/x", &[Feature::StatV2]);
        assert_eq!(request.version(), SyncVersion::V2);
        let request = StatFileRequest::compat("/x", &[Feature::ShellV2]);
        assert_eq!(request.version(), SyncVersion::V1);
    }

    #[test]
    fn parse_v2_record_fields() {
        let mut record = Vec::new();
        record.extend_from_slice(&0u32.to_le_bytes()); // error
        record.extend_from_slice(&5u64.to_le_bytes()); // dev
        record.extend_from_slice(&9u64.to_le_bytes()); // ino
        record.extend_from_slice(&(file_type::S_IFREG | 0o644).to_le_bytes());
        record.extend_from_slice(&1u32.to_le_bytes()); // nlink
        record.extend_from_slice(&1000u32.to_le_bytes()); // uid
        record.extend_from_slice(&1000u32.to_le_bytes()); // gid
        record.extend_from_slice(&4096u64.to_le_bytes()); // size
        record.extend_from_slice(&1_700_000_000i64.to_le_bytes());
        record.extend_from_slice(&1_700_000_001i64.to_le_bytes());
        record.extend_from_slice(&1_700_000_002i64.to_le_bytes());

        let entry = parse_v2_fields(&record);
        assert_eq!(entry.dev, 5);
        assert_eq!(entry.ino, 9);
        assert_eq!(entry.size, 4096);
        assert_eq!(entry.mtime, epoch_seconds(1_700_000_001));
        assert!(FileEntry::V2(entry).is_regular_file());
    }
}
