//! Small one-shot services: reboot, daemon version, remote-device
//! connect/pair, mdns discovery, `exec:` with streamed stdin, and
//! property dumps.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Result, TetherError};
use crate::request::{
    ComplexRequest, Request, SynchronousRequest, Target, encode_command,
};
use crate::shell::v1::{EXIT_CODE_DELIMITER, split_exit_code};
use crate::transport::Connection;

// ── RebootRequest ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RebootMode {
    #[default]
    Default,
    Bootloader,
    Recovery,
    Sideload,
    SideloadAutoReboot,
}

impl RebootMode {
    fn value(&self) -> &'static str {
        match self {
            RebootMode::Default => "",
            RebootMode::Bootloader => "bootloader",
            RebootMode::Recovery => "recovery",
            RebootMode::Sideload => "sideload",
            RebootMode::SideloadAutoReboot => "sideload-auto-reboot",
        }
    }
}

/// `reboot:<mode>` — the daemon acknowledges and the device goes away.
pub struct RebootRequest {
    mode: RebootMode,
}

impl RebootRequest {
    pub fn new(mode: RebootMode) -> Self {
        Self { mode }
    }
}

impl Default for RebootRequest {
    fn default() -> Self {
        Self::new(RebootMode::Default)
    }
}

impl Request for RebootRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(
            &Target::NonSpecified,
            &format!("reboot:{}", self.mode.value()),
        )
    }
}

impl SynchronousRequest for RebootRequest {
    type Output = ();

    fn accumulate(&mut self, _chunk: &[u8]) -> Result<()> {
        Ok(())
    }

    fn transform(&mut self) -> Result<()> {
        Ok(())
    }
}

// ── GetAdbServerVersionRequest ───────────────────────────────────

/// `host:version` — the daemon's internal version as a hex payload.
pub struct GetAdbServerVersionRequest;

impl GetAdbServerVersionRequest {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GetAdbServerVersionRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl Request for GetAdbServerVersionRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(&Target::Host, "version")
    }

    fn target(&self) -> Target {
        Target::Host
    }
}

#[async_trait]
impl ComplexRequest for GetAdbServerVersionRequest {
    type Output = u32;

    async fn read_element(&mut self, conn: &mut Connection) -> Result<u32> {
        let payload = conn.read_protocol_string().await?;
        u32::from_str_radix(payload.trim(), 16)
            .map_err(|_| TetherError::Encoding(format!("version is not hex: {payload:?}")))
    }
}

// ── Connect / Disconnect ─────────────────────────────────────────

/// `host:connect:<host>:<port>` — attach a networked device.
pub struct ConnectDeviceRequest {
    host: String,
    port: u16,
}

impl ConnectDeviceRequest {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Request for ConnectDeviceRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(
            &Target::Host,
            &format!("connect:{}:{}", self.host, self.port),
        )
    }

    fn target(&self) -> Target {
        Target::Host
    }
}

#[async_trait]
impl ComplexRequest for ConnectDeviceRequest {
    type Output = String;

    async fn read_element(&mut self, conn: &mut Connection) -> Result<String> {
        conn.read_protocol_string().await
    }
}

/// `host:disconnect:<host>[:<port>]`.
pub struct DisconnectDeviceRequest {
    host: String,
    port: Option<u16>,
}

impl DisconnectDeviceRequest {
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Request for DisconnectDeviceRequest {
    fn serialize(&self) -> Vec<u8> {
        let body = match self.port {
            Some(port) => format!("disconnect:{}:{}", self.host, port),
            None => format!("disconnect:{}", self.host),
        };
        encode_command(&Target::Host, &body)
    }

    fn target(&self) -> Target {
        Target::Host
    }
}

#[async_trait]
impl ComplexRequest for DisconnectDeviceRequest {
    type Output = String;

    async fn read_element(&mut self, conn: &mut Connection) -> Result<String> {
        conn.read_protocol_string().await
    }
}

// ── PairDeviceRequest ────────────────────────────────────────────

/// `host:pair:<code>:<host[:port]>` — wireless-debugging pairing.
pub struct PairDeviceRequest {
    url: String,
    pairing_code: String,
}

impl PairDeviceRequest {
    pub fn new(url: impl Into<String>, pairing_code: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pairing_code: pairing_code.into(),
        }
    }
}

impl Request for PairDeviceRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(
            &Target::Host,
            &format!("pair:{}:{}", self.pairing_code, self.url),
        )
    }

    fn target(&self) -> Target {
        Target::Host
    }
}

#[async_trait]
impl ComplexRequest for PairDeviceRequest {
    type Output = String;

    async fn read_element(&mut self, conn: &mut Connection) -> Result<String> {
        conn.read_protocol_string().await
    }
}

// ── mdns ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdnsService {
    pub name: String,
    pub service_type: String,
    pub url: String,
}

/// `host:mdns:services` — daemon-side service discovery results.
pub struct ListMdnsServicesRequest;

impl ListMdnsServicesRequest {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ListMdnsServicesRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl Request for ListMdnsServicesRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(&Target::Host, "mdns:services")
    }

    fn target(&self) -> Target {
        Target::Host
    }
}

#[async_trait]
impl ComplexRequest for ListMdnsServicesRequest {
    type Output = Vec<MdnsService>;

    async fn read_element(&mut self, conn: &mut Connection) -> Result<Vec<MdnsService>> {
        let payload = conn.read_protocol_string().await?;
        Ok(payload
            .lines()
            .filter(|line| !line.is_empty())
            .filter_map(|line| {
                let mut split = line.split(['\t', ' ']).filter(|part| !part.is_empty());
                Some(MdnsService {
                    name: split.next()?.trim().to_string(),
                    service_type: split.next()?.trim().to_string(),
                    url: split.next()?.trim().to_string(),
                })
            })
            .collect())
    }
}

/// Daemon-side mdns state, from `host:mdns:check`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdnsStatus {
    pub available: bool,
    pub version: Option<String>,
}

pub struct MdnsCheckRequest;

impl MdnsCheckRequest {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MdnsCheckRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl Request for MdnsCheckRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(&Target::Host, "mdns:check")
    }

    fn target(&self) -> Target {
        Target::Host
    }
}

#[async_trait]
impl ComplexRequest for MdnsCheckRequest {
    type Output = MdnsStatus;

    async fn read_element(&mut self, conn: &mut Connection) -> Result<MdnsStatus> {
        let payload = conn.read_protocol_string().await?;
        let available = !payload.contains("disabled");
        let version = payload
            .rsplit_once('[')
            .and_then(|(_, tail)| tail.split_once(']'))
            .map(|(version, _)| version.to_string());
        Ok(MdnsStatus { available, version })
    }
}

// ── ExecInRequest ────────────────────────────────────────────────

/// `exec:<cmd>` with the given source streamed to the command's
/// stdin. Returns the command's status trailer.
pub struct ExecInRequest<R> {
    cmd: String,
    source: R,
}

impl<R: AsyncRead + Unpin + Send> ExecInRequest<R> {
    pub fn new(cmd: impl Into<String>, source: R) -> Self {
        Self {
            cmd: cmd.into(),
            source,
        }
    }
}

impl<R: AsyncRead + Unpin + Send> Request for ExecInRequest<R> {
    fn serialize(&self) -> Vec<u8> {
        encode_command(&Target::NonSpecified, &format!("exec:{}", self.cmd))
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ComplexRequest for ExecInRequest<R> {
    type Output = String;

    async fn read_element(&mut self, conn: &mut Connection) -> Result<String> {
        let pool = conn.buffers();
        let mut buf = pool.file().await;
        loop {
            let read = self.source.read(&mut buf[..]).await?;
            if read == 0 {
                break;
            }
            conn.write_all(&buf[..read]).await?;
        }
        conn.read_string_to_eof().await
    }
}

// ── GetPropRequest ───────────────────────────────────────────────

/// `getprop` over shell v1, parsed from `[key]: [value]` lines.
pub struct GetPropRequest {
    accumulated: Vec<u8>,
}

impl GetPropRequest {
    pub fn new() -> Self {
        Self {
            accumulated: Vec::new(),
        }
    }
}

impl Default for GetPropRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl Request for GetPropRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(
            &Target::NonSpecified,
            &format!("shell:getprop;echo {EXIT_CODE_DELIMITER}$?"),
        )
    }
}

impl SynchronousRequest for GetPropRequest {
    type Output = HashMap<String, String>;

    fn accumulate(&mut self, chunk: &[u8]) -> Result<()> {
        self.accumulated.extend_from_slice(chunk);
        Ok(())
    }

    fn transform(&mut self) -> Result<HashMap<String, String>> {
        let result = split_exit_code(&self.accumulated)?;
        let mut properties = HashMap::new();
        for line in result.stdout_text().lines() {
            if let Some((key, value)) = line.split_once("]: [") {
                let key = key.trim_start_matches('[');
                let value = value.trim_end().trim_end_matches(']');
                properties.insert(key.to_string(), value.to_string());
            }
        }
        Ok(properties)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reboot_wire_forms() {
        let text = |mode| {
            String::from_utf8(RebootRequest::new(mode).serialize()).unwrap()
        };
        assert_eq!(text(RebootMode::Default), "0007reboot:");
        assert_eq!(text(RebootMode::Bootloader), "0011reboot:bootloader");
        assert_eq!(text(RebootMode::Recovery), "000Freboot:recovery");
        assert_eq!(text(RebootMode::Sideload), "000Freboot:sideload");
        assert_eq!(
            text(RebootMode::SideloadAutoReboot),
            "001Breboot:sideload-auto-reboot"
        );
    }

    #[test]
    fn connect_wire_form() {
        let request = ConnectDeviceRequest::new("123.123.123.123", 5555);
        assert_eq!(
            String::from_utf8(request.serialize()).unwrap(),
            "0021host:connect:123.123.123.123:5555"
        );
    }

    #[test]
    fn getprop_parses_bracketed_lines() {
        let mut request = GetPropRequest::new();
        request
            .accumulate(b"[ro.product.model]: [Pixel 7]\n[ro.build.id]: [TQ3A]\nx0")
            .unwrap();
        let props = request.transform().unwrap();
        assert_eq!(props.get("ro.product.model").map(String::as_str), Some("Pixel 7"));
        assert_eq!(props.get("ro.build.id").map(String::as_str), Some("TQ3A"));
    }

    #[test]
    fn mdns_check_parses_version() {
        // Parsing logic only; the payload shape is fixed.
        let payload = "mdns daemon version [10970003]";
        let version = payload
            .rsplit_once('[')
            .and_then(|(_, tail)| tail.split_once(']'))
            .map(|(version, _)| version.to_string());
        assert_eq!(version.as_deref(), Some("10970003"));
    }
}
