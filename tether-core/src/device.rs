//! Device discovery, state tracking and capability negotiation.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::request::{
    AsyncChannelRequest, ComplexRequest, Request, Target, encode_command,
};
use crate::transport::Connection;

// ── Device ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub serial: String,
    pub state: DeviceState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Offline,
    Bootloader,
    Device,
    Host,
    Recovery,
    Rescue,
    Sideload,
    Unauthorized,
    Authorizing,
    Connecting,
    Unknown,
}

impl DeviceState {
    pub fn of(value: &str) -> Self {
        match value {
            "offline" => DeviceState::Offline,
            "bootloader" => DeviceState::Bootloader,
            "device" => DeviceState::Device,
            "host" => DeviceState::Host,
            "recovery" => DeviceState::Recovery,
            "rescue" => DeviceState::Rescue,
            "sideload" => DeviceState::Sideload,
            "unauthorized" => DeviceState::Unauthorized,
            "authorizing" => DeviceState::Authorizing,
            "connecting" => DeviceState::Connecting,
            _ => DeviceState::Unknown,
        }
    }
}

/// Parse the `devices`/`track-devices` payload: one `serial\tstate`
/// line per device.
fn parse_device_lines(payload: &str) -> Vec<Device> {
    payload
        .lines()
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let mut split = line.trim().split('\t');
            let serial = split.next()?;
            let state = split.next()?;
            Some(Device {
                serial: serial.to_string(),
                state: DeviceState::of(state),
            })
        })
        .collect()
}

// ── Feature ──────────────────────────────────────────────────────

/// A capability token advertised by a device, fetched once per serial
/// and passed explicitly into every capability-sensitive request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    ShellV2,
    Cmd,
    StatV2,
    LsV2,
    Libusb,
    PushSync,
    Apex,
    FixedPushMkdir,
    Abb,
    FixedPushSymlinkTimestamp,
    AbbExec,
    RemountShell,
    TrackApp,
    SendRecvV2,
    SendRecvV2Brotli,
    SendRecvV2Lz4,
    SendRecvV2Zstd,
    SendRecvV2DryRunSend,
}

impl Feature {
    /// Unknown tokens map to `None` and are skipped, not errors — the
    /// daemon grows new features faster than clients do.
    pub fn of(value: &str) -> Option<Self> {
        match value {
            "shell_v2" => Some(Feature::ShellV2),
            "cmd" => Some(Feature::Cmd),
            "stat_v2" => Some(Feature::StatV2),
            "ls_v2" => Some(Feature::LsV2),
            "libusb" => Some(Feature::Libusb),
            "push_sync" => Some(Feature::PushSync),
            "apex" => Some(Feature::Apex),
            "fixed_push_mkdir" => Some(Feature::FixedPushMkdir),
            "abb" => Some(Feature::Abb),
            "fixed_push_symlink_timestamp" => Some(Feature::FixedPushSymlinkTimestamp),
            "abb_exec" => Some(Feature::AbbExec),
            "remount_shell" => Some(Feature::RemountShell),
            "track_app" => Some(Feature::TrackApp),
            "sendrecv_v2" => Some(Feature::SendRecvV2),
            "sendrecv_v2_brotli" => Some(Feature::SendRecvV2Brotli),
            "sendrecv_v2_lz4" => Some(Feature::SendRecvV2Lz4),
            "sendrecv_v2_zstd" => Some(Feature::SendRecvV2Zstd),
            "sendrecv_v2_dry_run_send" => Some(Feature::SendRecvV2DryRunSend),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            Feature::ShellV2 => "shell_v2",
            Feature::Cmd => "cmd",
            Feature::StatV2 => "stat_v2",
            Feature::LsV2 => "ls_v2",
            Feature::Libusb => "libusb",
            Feature::PushSync => "push_sync",
            Feature::Apex => "apex",
            Feature::FixedPushMkdir => "fixed_push_mkdir",
            Feature::Abb => "abb",
            Feature::FixedPushSymlinkTimestamp => "fixed_push_symlink_timestamp",
            Feature::AbbExec => "abb_exec",
            Feature::RemountShell => "remount_shell",
            Feature::TrackApp => "track_app",
            Feature::SendRecvV2 => "sendrecv_v2",
            Feature::SendRecvV2Brotli => "sendrecv_v2_brotli",
            Feature::SendRecvV2Lz4 => "sendrecv_v2_lz4",
            Feature::SendRecvV2Zstd => "sendrecv_v2_zstd",
            Feature::SendRecvV2DryRunSend => "sendrecv_v2_dry_run_send",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

// ── ListDevicesRequest ───────────────────────────────────────────

/// `host:devices` — one-shot device enumeration.
pub struct ListDevicesRequest;

impl ListDevicesRequest {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ListDevicesRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl Request for ListDevicesRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(&Target::Host, "devices")
    }

    fn target(&self) -> Target {
        Target::Host
    }
}

#[async_trait]
impl ComplexRequest for ListDevicesRequest {
    type Output = Vec<Device>;

    async fn read_element(&mut self, conn: &mut Connection) -> Result<Vec<Device>> {
        let payload = conn.read_protocol_string().await?;
        Ok(parse_device_lines(&payload))
    }
}

// ── AsyncDeviceMonitorRequest ────────────────────────────────────

/// `host:track-devices` — a stream of device lists, one element per
/// connect/disconnect/state change, until the daemon goes away.
pub struct AsyncDeviceMonitorRequest;

impl AsyncDeviceMonitorRequest {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AsyncDeviceMonitorRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl Request for AsyncDeviceMonitorRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(&Target::Host, "track-devices")
    }

    fn target(&self) -> Target {
        Target::Host
    }
}

#[async_trait]
impl AsyncChannelRequest for AsyncDeviceMonitorRequest {
    type Output = Vec<Device>;
    type Input = ();

    async fn read_element(
        &mut self,
        conn: &mut Connection,
        out: &mpsc::Sender<Vec<Device>>,
    ) -> Result<bool> {
        // The daemon shutting down between frames ends the stream; an
        // EOF inside a frame is still an error.
        let Some(payload) = conn.read_optional_protocol_string().await? else {
            return Ok(true);
        };
        out.send(parse_device_lines(&payload)).await?;
        Ok(false)
    }

    async fn write_element(&mut self, _item: (), _conn: &mut Connection) -> Result<()> {
        Ok(())
    }
}

// ── FetchDeviceFeaturesRequest ───────────────────────────────────

/// `host-serial:<serial>:features` — the capability set gating wire
/// variants for this device.
pub struct FetchDeviceFeaturesRequest {
    serial: String,
}

impl FetchDeviceFeaturesRequest {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
        }
    }
}

impl Request for FetchDeviceFeaturesRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(&self.target(), "features")
    }

    fn target(&self) -> Target {
        Target::Serial(self.serial.clone())
    }
}

#[async_trait]
impl ComplexRequest for FetchDeviceFeaturesRequest {
    type Output = Vec<Feature>;

    async fn read_element(&mut self, conn: &mut Connection) -> Result<Vec<Feature>> {
        let payload = conn.read_protocol_string().await?;
        Ok(payload.split(',').filter_map(Feature::of).collect())
    }
}

// ── Tests ────────────────────────────────────────────────────────
