//! Whole-tree transfers composed from stat/list/pull/push requests.
//!
//! Directory traversal is breadth-first and iterative: list the
//! current depth, classify entries, queue subdirectories for the next
//! depth, then transfer all queued files sequentially. Symbolic links
//! are neither followed nor materialized; `.` and `..` are skipped.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use filetime::FileTime;

use crate::client::Client;
use crate::device::Feature;
use crate::error::{Result, TetherError};
use crate::request::MultiRequest;
use crate::shell::v1::ShellCommandRequest;
use crate::sync::{
    FileEntry, ListFileRequest, PullFileRequest, PushFileRequest, REMOTE_FILE_SEPARATOR,
    StatFileRequest, SYNC_IGNORED_FILES,
};

// ── PullRequest ──────────────────────────────────────────────────

/// Pull a remote file or directory tree.
///
/// The destination does not have to exist. Pulling a directory into an
/// existing directory creates a subdirectory named after the source.
/// Remote mtimes are preserved on the local copies to one-second
/// resolution.
pub struct PullRequest {
    source: String,
    destination: PathBuf,
    supported_features: Vec<Feature>,
}

struct PendingPull {
    remote: String,
    local: PathBuf,
    size: u64,
    mtime: SystemTime,
}

impl PullRequest {
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<PathBuf>,
        supported_features: &[Feature],
    ) -> Self {
        Self {
            source: source.into().trim_end_matches(REMOTE_FILE_SEPARATOR).to_string(),
            destination: destination.into(),
            supported_features: supported_features.to_vec(),
        }
    }

    fn basename(&self) -> &str {
        self.source
            .rsplit(REMOTE_FILE_SEPARATOR)
            .next()
            .unwrap_or(&self.source)
    }

    /// Map a remote path under `source` to its local counterpart.
    fn local_for(&self, root: &Path, remote: &str) -> PathBuf {
        let relative = remote
            .strip_prefix(&self.source)
            .unwrap_or(remote)
            .trim_start_matches(REMOTE_FILE_SEPARATOR);
        if relative.is_empty() {
            root.to_path_buf()
        } else {
            root.join(relative)
        }
    }

    async fn pull_one(
        &self,
        client: &Client,
        serial: Option<&str>,
        remote: &str,
        local: &Path,
        size: u64,
    ) -> Result<bool> {
        let request = PullFileRequest::compat(remote, local, &self.supported_features)
            .with_size(size);
        let mut handle = client.execute_channel(request, None, serial)?;
        let mut progress = 0.0;
        while let Some(update) = handle.recv().await {
            progress = update;
        }
        handle.finish().await?;
        Ok(progress == 1.0)
    }

    async fn pull_file(
        &self,
        client: &Client,
        serial: Option<&str>,
        entry: &FileEntry,
    ) -> Result<bool> {
        let local = if self.destination.is_dir() {
            self.destination.join(self.basename())
        } else {
            self.destination.clone()
        };
        let complete = self
            .pull_one(client, serial, &self.source, &local, entry.size())
            .await?;
        if complete {
            filetime::set_file_mtime(&local, FileTime::from_system_time(entry.mtime()))?;
        }
        Ok(complete)
    }

    async fn pull_folder(&self, client: &Client, serial: Option<&str>) -> Result<bool> {
        if self.destination.exists() && !self.destination.is_dir() {
            return Err(TetherError::PullFailed {
                path: self.source.clone(),
                message: format!("target {} is not a directory", self.destination.display()),
            });
        }
        let root = if self.destination.exists() {
            self.destination.join(self.basename())
        } else {
            self.destination.clone()
        };

        let mut pending: Vec<PendingPull> = Vec::new();
        let mut current_depth = vec![self.source.clone()];

        while !current_depth.is_empty() {
            let mut next_depth = Vec::new();
            for dir in &current_depth {
                tokio::fs::create_dir_all(self.local_for(&root, dir)).await?;

                let listing = client
                    .execute(
                        ListFileRequest::compat(dir.clone(), &self.supported_features),
                        serial,
                    )
                    .await?;
                for entry in listing {
                    let Some(name) = entry.name() else { continue };
                    if SYNC_IGNORED_FILES.contains(&name) {
                        continue;
                    }
                    let remote = format!("{dir}{REMOTE_FILE_SEPARATOR}{name}");
                    if entry.is_directory() {
                        next_depth.push(remote);
                    } else if entry.is_regular_file() && entry.size() == 0 {
                        let local = self.local_for(&root, &remote);
                        tokio::fs::File::create(&local).await?;
                        filetime::set_file_mtime(
                            &local,
                            FileTime::from_system_time(entry.mtime()),
                        )?;
                    } else if entry.is_regular_file()
                        || entry.is_char_device()
                        || entry.is_block_device()
                    {
                        pending.push(PendingPull {
                            local: self.local_for(&root, &remote),
                            remote,
                            size: entry.size(),
                            mtime: entry.mtime(),
                        });
                    }
                }
            }
            current_depth = next_depth;
        }

        for file in pending {
            let complete = self
                .pull_one(client, serial, &file.remote, &file.local, file.size)
                .await?;
            if !complete {
                return Ok(false);
            }
            filetime::set_file_mtime(&file.local, FileTime::from_system_time(file.mtime))?;
        }
        Ok(true)
    }
}

#[async_trait]
impl MultiRequest for PullRequest {
    type Output = bool;

    async fn execute(&mut self, client: &Client, serial: Option<&str>) -> Result<bool> {
        let entry = client
            .execute(
                StatFileRequest::compat(self.source.clone(), &self.supported_features),
                serial,
            )
            .await?;
        if entry.is_directory() {
            self.pull_folder(client, serial).await
        } else if entry.is_regular_file() || entry.is_block_device() || entry.is_char_device() {
            self.pull_file(client, serial, &entry).await
        } else {
            Ok(false)
        }
    }
}

// ── PushRequest ──────────────────────────────────────────────────

/// Push a local file or directory tree.
///
/// Remote directories are created up front with one `mkdir -p`, then
/// files transfer sequentially. Local symlinks are skipped.
pub struct PushRequest {
    source: PathBuf,
    destination: String,
    mode: u32,
    supported_features: Vec<Feature>,
}

impl PushRequest {
    pub fn new(
        source: impl Into<PathBuf>,
        destination: impl Into<String>,
        supported_features: &[Feature],
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination
                .into()
                .trim_end_matches(REMOTE_FILE_SEPARATOR)
                .to_string(),
            mode: 0o777,
            supported_features: supported_features.to_vec(),
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    async fn push_one(
        &self,
        client: &Client,
        serial: Option<&str>,
        local: &Path,
        remote: &str,
    ) -> Result<bool> {
        let request = PushFileRequest::compat(local, remote, &self.supported_features)
            .with_mode(self.mode);
        let mut handle = client.execute_channel(request, None, serial)?;
        let mut progress = 0.0;
        while let Some(update) = handle.recv().await {
            progress = update;
        }
        handle.finish().await?;
        Ok(progress == 1.0)
    }
}

#[async_trait]
impl MultiRequest for PushRequest {
    type Output = bool;

    async fn execute(&mut self, client: &Client, serial: Option<&str>) -> Result<bool> {
        let metadata = tokio::fs::metadata(&self.source).await?;
        if metadata.is_file() {
            return self
                .push_one(client, serial, &self.source, &self.destination)
                .await;
        }

        // Breadth-first walk of the local tree.
        let mut remote_dirs = vec![self.destination.clone()];
        let mut files: Vec<(PathBuf, String)> = Vec::new();
        let mut current_depth = vec![(self.source.clone(), self.destination.clone())];

        while !current_depth.is_empty() {
            let mut next_depth = Vec::new();
            for (local_dir, remote_dir) in &current_depth {
                let mut entries = tokio::fs::read_dir(local_dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    let remote = format!("{remote_dir}{REMOTE_FILE_SEPARATOR}{name}");
                    let kind = entry.file_type().await?;
                    if kind.is_symlink() {
                        continue;
                    }
                    if kind.is_dir() {
                        remote_dirs.push(remote.clone());
                        next_depth.push((entry.path(), remote));
                    } else if kind.is_file() {
                        files.push((entry.path(), remote));
                    }
                }
            }
            current_depth = next_depth;
        }

        let mkdir = format!(
            "mkdir -p {}",
            remote_dirs
                .iter()
                .map(|dir| shell_quote(dir))
                .collect::<Vec<_>>()
                .join(" ")
        );
        let result = client
            .execute(ShellCommandRequest::new(mkdir), serial)
            .await?;
        if result.exit_code != 0 {
            return Ok(false);
        }

        for (local, remote) in files {
            if !self.push_one(client, serial, &local, &remote).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Single-quote a remote path for the device shell.
fn shell_quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', r"'\''"))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_mapping_strips_the_source_prefix() {
        let request = PullRequest::new("/sdcard/dir", "/tmp/out", &[]);
        let root = Path::new("/tmp/out");
        assert_eq!(
            request.local_for(root, "/sdcard/dir/a/b.txt"),
            PathBuf::from("/tmp/out/a/b.txt")
        );
        assert_eq!(request.local_for(root, "/sdcard/dir"), PathBuf::from("/tmp/out"));
    }

    #[test]
    fn basename_of_source() {
        let request = PullRequest::new("/sdcard/some/dir/", "/tmp/out", &[]);
        assert_eq!(request.basename(), "dir");
    }

    #[test]
    fn quoting_survives_awkward_paths() {
        assert_eq!(shell_quote("/a b/c"), "'/a b/c'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
