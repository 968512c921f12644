//! Package installation: streamed installs, recovery sideload, and
//! the `pm`-based management commands.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::device::Feature;
use crate::error::{Result, TetherError};
use crate::request::{
    ComplexRequest, Request, SynchronousRequest, Target, ValidationResponse, encode_command,
};
use crate::shell::ShellCommandResult;
use crate::shell::v1::{EXIT_CODE_DELIMITER, split_exit_code};
use crate::transport::Connection;

/// Sideload status trailers are doubled magics.
const DONE_DONE: &[u8; 8] = b"DONEDONE";
const FAIL_FAIL: &[u8; 8] = b"FAILFAIL";

/// Stream a whole local file onto the connection.
async fn stream_file(conn: &mut Connection, path: &std::path::Path) -> Result<()> {
    let mut file = tokio::fs::File::open(path).await?;
    let pool = conn.buffers();
    let mut buf = pool.file().await;
    loop {
        let read = file.read(&mut buf[..]).await?;
        if read == 0 {
            return Ok(());
        }
        conn.write_all(&buf[..read]).await?;
    }
}

fn package_length(path: &std::path::Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

// ── StreamingPackageInstallRequest ───────────────────────────────

/// Install a package by streaming it through `cmd package install`
/// (or `abb_exec` when the device supports the binder bridge).
///
/// Requires [`Feature::Cmd`] or [`Feature::AbbExec`]; `.apex` packages
/// additionally require [`Feature::Apex`].
pub struct StreamingPackageInstallRequest {
    pkg: PathBuf,
    supported_features: Vec<Feature>,
    reinstall: bool,
    extra_args: Vec<String>,
}

impl StreamingPackageInstallRequest {
    pub fn new(pkg: impl Into<PathBuf>, supported_features: &[Feature]) -> Self {
        Self {
            pkg: pkg.into(),
            supported_features: supported_features.to_vec(),
            reinstall: false,
            extra_args: Vec::new(),
        }
    }

    pub fn reinstall(mut self) -> Self {
        self.reinstall = true;
        self
    }

    pub fn with_extra_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.extra_args = args.into_iter().collect();
        self
    }

    fn extension(&self) -> String {
        self.pkg
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn install_args(&self) -> Vec<String> {
        let mut args = vec!["package".to_string(), "install".to_string()];
        args.extend(self.extra_args.iter().cloned());
        if self.reinstall {
            args.push("-r".to_string());
        }
        args.push("-S".to_string());
        args.push(package_length(&self.pkg).to_string());
        if self.extension() == "apex" {
            args.push("--apex".to_string());
        }
        args
    }
}

impl Request for StreamingPackageInstallRequest {
    fn serialize(&self) -> Vec<u8> {
        let args = self.install_args();
        if self.supported_features.contains(&Feature::AbbExec) {
            AbbExecRequest::new(args, &self.supported_features).serialize()
        } else {
            encode_command(
                &Target::NonSpecified,
                &format!("exec:cmd {}", args.join(" ")),
            )
        }
    }

    fn validate(&self) -> ValidationResponse {
        let extension = self.extension();
        if !self.pkg.exists() {
            ValidationResponse::failure(format!("package {} doesn't exist", self.pkg.display()))
        } else if !self.pkg.is_file() {
            ValidationResponse::failure(format!(
                "package {} is not a regular file",
                self.pkg.display()
            ))
        } else if !self.supported_features.contains(&Feature::AbbExec)
            && !self.supported_features.contains(&Feature::Cmd)
        {
            ValidationResponse::failure("supported features must include either abb_exec or cmd")
        } else if extension == "apex" && !self.supported_features.contains(&Feature::Apex) {
            ValidationResponse::missing_feature(Feature::Apex)
        } else if extension != "apk" && extension != "apex" {
            ValidationResponse::failure(format!(
                "unsupported package extension {extension:?}; should be apk or apex"
            ))
        } else {
            ValidationResponse::success()
        }
    }
}

#[async_trait]
impl ComplexRequest for StreamingPackageInstallRequest {
    type Output = bool;

    async fn read_element(&mut self, conn: &mut Connection) -> Result<bool> {
        stream_file(conn, &self.pkg).await?;
        let status = conn.read_string_to_eof().await?;
        Ok(status.trim_start().starts_with("Success"))
    }
}

// ── AbbExecRequest ───────────────────────────────────────────────

/// Android binder bridge over a raw pipe: `abb_exec:<args NUL-joined>`.
pub struct AbbExecRequest {
    args: Vec<String>,
    supported_features: Vec<Feature>,
}

impl AbbExecRequest {
    pub const DELIMITER: char = '\0';

    pub fn new(args: impl IntoIterator<Item = String>, supported_features: &[Feature]) -> Self {
        Self {
            args: args.into_iter().collect(),
            supported_features: supported_features.to_vec(),
        }
    }
}

impl Request for AbbExecRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(
            &Target::NonSpecified,
            &format!(
                "abb_exec:{}",
                self.args.join(&Self::DELIMITER.to_string())
            ),
        )
    }

    fn validate(&self) -> ValidationResponse {
        if self.supported_features.contains(&Feature::AbbExec) {
            ValidationResponse::success()
        } else {
            ValidationResponse::missing_feature(Feature::AbbExec)
        }
    }
}

#[async_trait]
impl ComplexRequest for AbbExecRequest {
    type Output = String;

    async fn read_element(&mut self, conn: &mut Connection) -> Result<String> {
        conn.read_string_to_eof().await
    }
}

// ── SideloadRequest ──────────────────────────────────────────────

/// Recovery-mode sideload: the daemon drives the transfer by asking
/// for 8-ASCII-digit block ids; any block may be requested again (or
/// out of order) and must be re-served byte-identically.
pub struct SideloadRequest {
    pkg: PathBuf,
    block_size: usize,
}

impl SideloadRequest {
    pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

    pub fn new(pkg: impl Into<PathBuf>) -> Self {
        Self {
            pkg: pkg.into(),
            block_size: Self::DEFAULT_BLOCK_SIZE,
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }
}

impl Request for SideloadRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(
            &Target::NonSpecified,
            &format!(
                "sideload-host:{}:{}",
                package_length(&self.pkg),
                self.block_size
            ),
        )
    }

    fn validate(&self) -> ValidationResponse {
        if !self.pkg.exists() {
            ValidationResponse::failure(format!("package {} doesn't exist", self.pkg.display()))
        } else if !self.pkg.is_file() {
            ValidationResponse::failure(format!(
                "package {} is not a regular file",
                self.pkg.display()
            ))
        } else {
            ValidationResponse::success()
        }
    }
}

#[async_trait]
impl ComplexRequest for SideloadRequest {
    type Output = bool;

    async fn read_element(&mut self, conn: &mut Connection) -> Result<bool> {
        let mut file = tokio::fs::File::open(&self.pkg).await?;
        let total = file.metadata().await?.len();
        let pool = conn.buffers();
        let mut buf = pool.file().await;

        loop {
            let mut token = [0u8; 8];
            conn.read_exact(&mut token).await?;
            if &token == DONE_DONE {
                return Ok(true);
            }
            if &token == FAIL_FAIL {
                return Ok(false);
            }

            let block_id: u64 = std::str::from_utf8(&token)
                .ok()
                .and_then(|text| text.parse().ok())
                .ok_or(TetherError::ProtocolViolation(
                    "sideload block id is not numeric",
                ))?;
            let offset = block_id * self.block_size as u64;
            if offset > total {
                return Err(TetherError::ProtocolViolation(
                    "sideload block id past end of package",
                ));
            }

            // Seeking makes replays and out-of-order requests serve
            // identical bytes.
            file.seek(std::io::SeekFrom::Start(offset)).await?;
            let mut remaining = (total - offset).min(self.block_size as u64) as usize;
            while remaining > 0 {
                let step = remaining.min(buf.len());
                file.read_exact(&mut buf[..step]).await?;
                conn.write_all(&buf[..step]).await?;
                remaining -= step;
            }
        }
    }
}

// ── LegacySideloadRequest ────────────────────────────────────────

/// Pre-`sideload-host` devices: one monolithic stream plus a status.
pub struct LegacySideloadRequest {
    pkg: PathBuf,
}

impl LegacySideloadRequest {
    pub fn new(pkg: impl Into<PathBuf>) -> Self {
        Self { pkg: pkg.into() }
    }
}

impl Request for LegacySideloadRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(
            &Target::NonSpecified,
            &format!("sideload:{}", package_length(&self.pkg)),
        )
    }

    fn validate(&self) -> ValidationResponse {
        if !self.pkg.exists() {
            ValidationResponse::failure(format!("package {} doesn't exist", self.pkg.display()))
        } else if !self.pkg.is_file() {
            ValidationResponse::failure(format!(
                "package {} is not a regular file",
                self.pkg.display()
            ))
        } else {
            ValidationResponse::success()
        }
    }
}

#[async_trait]
impl ComplexRequest for LegacySideloadRequest {
    type Output = bool;

    async fn read_element(&mut self, conn: &mut Connection) -> Result<bool> {
        stream_file(conn, &self.pkg).await?;
        let response = conn.read_transport_response().await?;
        Ok(response.ok)
    }
}

// ── UninstallRemotePackageRequest ────────────────────────────────

/// `pm uninstall [-k] <package>` over shell v1.
pub struct UninstallRemotePackageRequest {
    package_name: String,
    keep_data: bool,
    accumulated: Vec<u8>,
}

impl UninstallRemotePackageRequest {
    pub fn new(package_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            keep_data: false,
            accumulated: Vec::new(),
        }
    }

    pub fn keep_data(mut self) -> Self {
        self.keep_data = true;
        self
    }
}

impl Request for UninstallRemotePackageRequest {
    fn serialize(&self) -> Vec<u8> {
        let keep = if self.keep_data { "-k " } else { "" };
        encode_command(
            &Target::NonSpecified,
            &format!(
                "shell:pm uninstall {}{};echo {}$?",
                keep, self.package_name, EXIT_CODE_DELIMITER
            ),
        )
    }
}

impl SynchronousRequest for UninstallRemotePackageRequest {
    type Output = bool;

    fn accumulate(&mut self, chunk: &[u8]) -> Result<()> {
        self.accumulated.extend_from_slice(chunk);
        Ok(())
    }

    fn transform(&mut self) -> Result<bool> {
        let result: ShellCommandResult = split_exit_code(&self.accumulated)?;
        Ok(result.exit_code == 0 && result.stdout_text().trim_start().starts_with("Success"))
    }
}

// ── PmListRequest ────────────────────────────────────────────────

/// An installed package as reported by `pm list packages`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub name: String,
}

/// `pm list packages` over shell v1.
pub struct PmListRequest {
    accumulated: Vec<u8>,
}

impl PmListRequest {
    pub fn new() -> Self {
        Self {
            accumulated: Vec::new(),
        }
    }
}

impl Default for PmListRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl Request for PmListRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(
            &Target::NonSpecified,
            &format!("shell:pm list packages;echo {EXIT_CODE_DELIMITER}$?"),
        )
    }
}

impl SynchronousRequest for PmListRequest {
    type Output = Vec<Package>;

    fn accumulate(&mut self, chunk: &[u8]) -> Result<()> {
        self.accumulated.extend_from_slice(chunk);
        Ok(())
    }

    fn transform(&mut self) -> Result<Vec<Package>> {
        let result = split_exit_code(&self.accumulated)?;
        Ok(result
            .stdout_text()
            .lines()
            .filter_map(|line| line.trim().strip_prefix("package:").map(str::to_string))
            .map(|name| Package { name })
            .collect())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn apk(content: &[u8]) -> tempfile::TempPath {
        let mut file = tempfile::Builder::new().suffix(".apk").tempfile().unwrap();
        file.write_all(content).unwrap();
        file.into_temp_path()
    }

    #[test]
    fn sideload_serialize_includes_length_and_block() {
        let pkg = apk(b"0123456789");
        let request = SideloadRequest::new(pkg.to_path_buf()).with_block_size(300);
        let text = String::from_utf8(request.serialize()).unwrap();
        assert!(text.ends_with("sideload-host:10:300"));
    }

    #[test]
    fn install_requires_cmd_or_abb_exec() {
        let pkg = apk(b"bytes");
        let request = StreamingPackageInstallRequest::new(pkg.to_path_buf(), &[]);
        assert!(!request.validate().success);

        let request = StreamingPackageInstallRequest::new(pkg.to_path_buf(), &[Feature::Cmd]);
        assert!(request.validate().success);
    }

    #[test]
    fn install_serialize_selects_abb_exec() {
        let pkg = apk(b"bytes");
        let request =
            StreamingPackageInstallRequest::new(pkg.to_path_buf(), &[Feature::AbbExec]).reinstall();
        let text = String::from_utf8(request.serialize()).unwrap();
        assert!(text.contains("abb_exec:package\0install\0-r\0-S\05"));

        let request = StreamingPackageInstallRequest::new(pkg.to_path_buf(), &[Feature::Cmd]).reinstall();
        let text = String::from_utf8(request.serialize()).unwrap();
        assert!(text.contains("exec:cmd package install -r -S 5"));
    }

    #[test]
    fn apex_needs_the_feature() {
        let mut file = tempfile::Builder::new().suffix(".apex").tempfile().unwrap();
        file.write_all(b"apex bytes").unwrap();
        let path = file.into_temp_path();

        let request = StreamingPackageInstallRequest::new(path.to_path_buf(), &[Feature::Cmd]);
        assert!(!request.validate().success);

        let request =
            StreamingPackageInstallRequest::new(path.to_path_buf(), &[Feature::Cmd, Feature::Apex]);
        assert!(request.validate().success);
    }

    #[test]
    fn uninstall_serialize() {
        let request = UninstallRemotePackageRequest::new("com.example.app").keep_data();
        let text = String::from_utf8(request.serialize()).unwrap();
        assert!(text.ends_with("shell:pm uninstall -k com.example.app;echo x$?"));
    }
}
