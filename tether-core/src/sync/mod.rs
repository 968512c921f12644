//! File-sync sub-protocol: stat, list, pull and push over the `sync:`
//! service, in both wire generations.
//!
//! # Wire Protocol
//!
//! Every exchange starts with the `sync:` command envelope, then runs
//! framed requests on the same connection:
//!
//! ```text
//! request frame:   [4-byte magic][u32 LE length][length bytes]
//! v1 stat reply:   "STAT" + mode u32 + size u32 + mtime u32   (LE)
//! v2 stat reply:   "LST2" + error u32 + dev u64 + ino u64 + mode u32
//!                  + nlink u32 + uid u32 + gid u32 + size u64
//!                  + atime i64 + mtime i64 + ctime i64        (LE)
//! v1 dent:         "DENT" + stat fields + name length + name
//! v2 dent:         "DNT2" + stat fields + name length + name
//! data stream:     "DATA" + u32 LE length + payload, ... , "DONE"
//! failure:         "FAIL" + u32 LE length + error text
//! ```
//!
//! Numeric fields are binary little-endian — unlike the ASCII-hex
//! command header.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::device::Feature;

mod list;
mod pull;
mod push;
mod stat;
mod tree;

pub use list::ListFileRequest;
pub use pull::PullFileRequest;
pub use push::PushFileRequest;
pub use stat::StatFileRequest;
pub use tree::{PullRequest, PushRequest};

/// Longest remote path the daemon accepts.
pub const MAX_REMOTE_PATH_LENGTH: usize = 1024;

/// Directory entries never materialized by tree transfers.
pub const SYNC_IGNORED_FILES: [&str; 2] = [".", ".."];

/// Remote path separator; remote paths never use the host separator.
pub const REMOTE_FILE_SEPARATOR: char = '/';

// ── Frame magics ─────────────────────────────────────────────────

pub mod magic {
    pub const LSTAT_V1: &[u8; 4] = b"STAT";
    pub const LSTAT_V2: &[u8; 4] = b"LST2";
    pub const LIST_V1: &[u8; 4] = b"LIST";
    pub const LIST_V2: &[u8; 4] = b"LIS2";
    pub const DENT_V1: &[u8; 4] = b"DENT";
    pub const DENT_V2: &[u8; 4] = b"DNT2";
    pub const SEND_V1: &[u8; 4] = b"SEND";
    pub const SEND_V2: &[u8; 4] = b"SND2";
    pub const RECV_V1: &[u8; 4] = b"RECV";
    pub const RECV_V2: &[u8; 4] = b"RCV2";
    pub const DATA: &[u8; 4] = b"DATA";
    pub const DONE: &[u8; 4] = b"DONE";
    pub const FAIL: &[u8; 4] = b"FAIL";
}

// ── File type bits ───────────────────────────────────────────────

/// POSIX file-type bits carried in the `mode` field.
pub mod file_type {
    pub const S_IFMT: u32 = 0o170000;
    pub const S_IFIFO: u32 = 0o10000;
    pub const S_IFCHR: u32 = 0o20000;
    pub const S_IFDIR: u32 = 0o40000;
    pub const S_IFBLK: u32 = 0o60000;
    pub const S_IFREG: u32 = 0o100000;
    pub const S_IFLNK: u32 = 0o120000;
    pub const S_IFSOCK: u32 = 0o140000;
}

// ── Sync protocol version ────────────────────────────────────────

/// Which wire generation a sync request speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncVersion {
    V1,
    V2,
}

bitflags::bitflags! {
    /// Flag word of v2 `SND2`/`RCV2` request frames.
    ///
    /// Only `NONE` is ever emitted — no compression codec is
    /// implemented — but the other bits are named so replies and
    /// captures stay readable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SyncV2Flags: u32 {
        const NONE = 1;
        const BROTLI = 2;
        const LZ4 = 4;
        const ZSTD = 8;
        const DRY_RUN = 0x8000_0000;
    }
}

// ── FileEntry ────────────────────────────────────────────────────

/// Remote filesystem metadata, one logical shape over both record
/// generations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEntry {
    V1(FileEntryV1),
    V2(FileEntryV2),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntryV1 {
    pub name: Option<String>,
    pub mode: u32,
    pub size: u32,
    pub mtime: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntryV2 {
    pub name: Option<String>,
    pub error: u32,
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl FileEntry {
    pub fn name(&self) -> Option<&str> {
        match self {
            FileEntry::V1(e) => e.name.as_deref(),
            FileEntry::V2(e) => e.name.as_deref(),
        }
    }

    pub fn mode(&self) -> u32 {
        match self {
            FileEntry::V1(e) => e.mode,
            FileEntry::V2(e) => e.mode,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            FileEntry::V1(e) => e.size as u64,
            FileEntry::V2(e) => e.size,
        }
    }

    pub fn mtime(&self) -> SystemTime {
        match self {
            FileEntry::V1(e) => e.mtime,
            FileEntry::V2(e) => e.mtime,
        }
    }

    fn file_type(&self) -> u32 {
        self.mode() & file_type::S_IFMT
    }

    pub fn is_directory(&self) -> bool {
        self.file_type() == file_type::S_IFDIR
    }

    pub fn is_regular_file(&self) -> bool {
        self.file_type() == file_type::S_IFREG
    }

    pub fn is_block_device(&self) -> bool {
        self.file_type() == file_type::S_IFBLK
    }

    pub fn is_char_device(&self) -> bool {
        self.file_type() == file_type::S_IFCHR
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == file_type::S_IFLNK
    }
}

/// Seconds-since-epoch to `SystemTime`, the resolution the wire
/// carries.
pub(crate) fn epoch_seconds(seconds: i64) -> SystemTime {
    if seconds >= 0 {
        UNIX_EPOCH + Duration::from_secs(seconds as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(seconds.unsigned_abs())
    }
}

pub(crate) fn seconds_since_epoch(time: SystemTime) -> u32 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Compat selection: the richer wire form when the device advertises
/// it, the legacy form otherwise.
pub(crate) fn select_version(features: &[Feature], required: Feature) -> SyncVersion {
    if features.contains(&required) {
        SyncVersion::V2
    } else {
        SyncVersion::V1
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn v1_entry(mode: u32) -> FileEntry {
        FileEntry::V1(FileEntryV1 {
            name: None,
            mode,
            size: 0,
            mtime: UNIX_EPOCH,
        })
    }

    #[test]
    fn mode_classification_uses_the_type_mask() {
        assert!(v1_entry(file_type::S_IFDIR | 0o755).is_directory());
        assert!(v1_entry(file_type::S_IFREG | 0o644).is_regular_file());
        assert!(v1_entry(file_type::S_IFBLK | 0o600).is_block_device());
        assert!(v1_entry(file_type::S_IFCHR | 0o600).is_char_device());

        // A symlink shares bits with S_IFREG; the mask must not be
        // fooled.
        let link = v1_entry(file_type::S_IFLNK | 0o777);
        assert!(link.is_symlink());
        assert!(!link.is_regular_file());
        assert!(!link.is_directory());
    }

    #[test]
    fn facade_widens_v1_size() {
        let entry = FileEntry::V1(FileEntryV1 {
            name: Some("f".into()),
            mode: file_type::S_IFREG,
            size: u32::MAX,
            mtime: UNIX_EPOCH,
        });
        assert_eq!(entry.size(), u32::MAX as u64);
    }

    #[test]
    fn compat_selection() {
        let features = [Feature::LsV2, Feature::StatV2];
        assert_eq!(
            select_version(&features, Feature::LsV2),
            SyncVersion::V2
        );
        assert_eq!(
            select_version(&features, Feature::SendRecvV2),
            SyncVersion::V1
        );
    }

    #[test]
    fn epoch_round_trip() {
        let t = epoch_seconds(1_700_000_000);
        assert_eq!(seconds_since_epoch(t), 1_700_000_000);
    }
}
