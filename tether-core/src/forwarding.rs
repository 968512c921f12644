//! Port forwarding between the host and an addressed device.

use async_trait::async_trait;

use crate::error::{Result, TetherError};
use crate::request::{ComplexRequest, Request, Target, encode_command};
use crate::transport::Connection;

// ── Port specs ───────────────────────────────────────────────────

/// Host side of a forwarding rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalPortSpec {
    /// `tcp:<port>`; port 0 asks the daemon to pick one.
    Tcp(u16),
    /// `local:<path>` — a unix domain socket on the host.
    UnixSocket(String),
}

impl LocalPortSpec {
    pub fn to_spec(&self) -> String {
        match self {
            LocalPortSpec::Tcp(port) => format!("tcp:{port}"),
            LocalPortSpec::UnixSocket(path) => format!("local:{path}"),
        }
    }
}

/// Device side of a forwarding rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemotePortSpec {
    Tcp(u16),
    LocalAbstract(String),
    LocalReserved(String),
    LocalFilesystem(String),
    Dev(String),
    /// A JDWP debugging session on the given pid.
    Jdwp(u32),
}

impl RemotePortSpec {
    pub fn to_spec(&self) -> String {
        match self {
            RemotePortSpec::Tcp(port) => format!("tcp:{port}"),
            RemotePortSpec::LocalAbstract(name) => format!("localabstract:{name}"),
            RemotePortSpec::LocalReserved(name) => format!("localreserved:{name}"),
            RemotePortSpec::LocalFilesystem(path) => format!("localfilesystem:{path}"),
            RemotePortSpec::Dev(path) => format!("dev:{path}"),
            RemotePortSpec::Jdwp(pid) => format!("jdwp:{pid}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortForwardingMode {
    #[default]
    Default,
    /// Fail instead of rebinding an already-forwarded local port.
    NoRebind,
}

impl PortForwardingMode {
    fn infix(&self) -> &'static str {
        match self {
            PortForwardingMode::Default => "",
            PortForwardingMode::NoRebind => ":norebind",
        }
    }
}

/// One established rule, as reported by `list-forward`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortForwardingRule {
    pub serial: String,
    pub local_spec: String,
    pub remote_spec: String,
}

// ── PortForwardRequest ───────────────────────────────────────────

/// Establish a forward. The daemon answers with a second status after
/// the routing handshake; when the local spec was `tcp:0` it also
/// reports the port it picked.
pub struct PortForwardRequest {
    local: LocalPortSpec,
    remote: RemotePortSpec,
    serial: String,
    mode: PortForwardingMode,
}

impl PortForwardRequest {
    pub fn new(
        local: LocalPortSpec,
        remote: RemotePortSpec,
        serial: impl Into<String>,
    ) -> Self {
        Self {
            local,
            remote,
            serial: serial.into(),
            mode: PortForwardingMode::Default,
        }
    }

    pub fn with_mode(mut self, mode: PortForwardingMode) -> Self {
        self.mode = mode;
        self
    }
}

impl Request for PortForwardRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(
            &self.target(),
            &format!(
                "forward{}:{};{}",
                self.mode.infix(),
                self.local.to_spec(),
                self.remote.to_spec()
            ),
        )
    }

    fn target(&self) -> Target {
        Target::Serial(self.serial.clone())
    }
}

#[async_trait]
impl ComplexRequest for PortForwardRequest {
    type Output = Option<u16>;

    async fn read_element(&mut self, conn: &mut Connection) -> Result<Option<u16>> {
        let response = conn.read_transport_response().await?;
        if !response.ok {
            return Err(TetherError::Rejected(format!(
                "can't establish port forwarding: {}",
                response.message_or_default()
            )));
        }
        let port = conn
            .read_optional_protocol_string()
            .await?
            .and_then(|payload| payload.trim().parse().ok());
        Ok(port)
    }
}

// ── ListPortForwardsRequest ──────────────────────────────────────

/// `list-forward` — all rules established through this daemon for the
/// addressed device.
pub struct ListPortForwardsRequest {
    serial: String,
}

impl ListPortForwardsRequest {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
        }
    }
}

impl Request for ListPortForwardsRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(&self.target(), "list-forward")
    }

    fn target(&self) -> Target {
        Target::Serial(self.serial.clone())
    }
}

#[async_trait]
impl ComplexRequest for ListPortForwardsRequest {
    type Output = Vec<PortForwardingRule>;

    async fn read_element(&mut self, conn: &mut Connection) -> Result<Vec<PortForwardingRule>> {
        let payload = conn.read_protocol_string().await?;
        Ok(payload
            .lines()
            .filter(|line| !line.is_empty())
            .filter_map(|line| {
                let mut split = line.trim().split(' ');
                Some(PortForwardingRule {
                    serial: split.next()?.to_string(),
                    local_spec: split.next()?.to_string(),
                    remote_spec: split.next()?.to_string(),
                })
            })
            .collect())
    }
}

// ── RemoveAllPortForwardsRequest ─────────────────────────────────

/// `killforward-all` — drop every rule for the addressed device.
pub struct RemoveAllPortForwardsRequest {
    serial: String,
}

impl RemoveAllPortForwardsRequest {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
        }
    }
}

impl Request for RemoveAllPortForwardsRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(&self.target(), "killforward-all")
    }

    fn target(&self) -> Target {
        Target::Serial(self.serial.clone())
    }
}

#[async_trait]
impl ComplexRequest for RemoveAllPortForwardsRequest {
    type Output = ();

    async fn read_element(&mut self, conn: &mut Connection) -> Result<()> {
        let response = conn.read_transport_response().await?;
        if !response.ok {
            return Err(TetherError::Rejected(response.message_or_default()));
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specs_serialize() {
        assert_eq!(LocalPortSpec::Tcp(6100).to_spec(), "tcp:6100");
        assert_eq!(
            LocalPortSpec::UnixSocket("/tmp/s".into()).to_spec(),
            "local:/tmp/s"
        );
        assert_eq!(
            RemotePortSpec::LocalAbstract("socket".into()).to_spec(),
            "localabstract:socket"
        );
        assert_eq!(RemotePortSpec::Jdwp(1234).to_spec(), "jdwp:1234");
    }

    #[test]
    fn forward_command_includes_mode_and_specs() {
        let request = PortForwardRequest::new(
            LocalPortSpec::Tcp(6100),
            RemotePortSpec::Tcp(7100),
            "serial",
        )
        .with_mode(PortForwardingMode::NoRebind);
        let text = String::from_utf8(request.serialize()).unwrap();
        assert!(text.ends_with("host-serial:serial:forward:norebind:tcp:6100;tcp:7100"));
    }
}
