//! Request envelope: target addressing, command encoding, validation.

use crate::error::{Result, TetherError};

mod traits;

pub use traits::{
    AsyncChannelRequest, ComplexRequest, MultiRequest, Request, SynchronousRequest,
};

// ── Target ───────────────────────────────────────────────────────

/// Addressing mode of a request, serialized as a prefix on the wire
/// command. Chosen at construction time; a device serial passed to the
/// client at execution time is handled separately via the
/// `host:transport:` indirection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Target {
    /// No prefix; the daemon routes to the current transport.
    #[default]
    NonSpecified,
    /// Host-wide service (`host:`).
    Host,
    /// A specific device by serial (`host-serial:<serial>:`).
    Serial(String),
    /// The single USB-attached device (`host-usb:`).
    Usb,
    /// The single emulator/local transport (`host-local:`).
    Local,
}

impl Target {
    pub fn serialize(&self) -> String {
        match self {
            Target::NonSpecified => String::new(),
            Target::Host => "host:".to_string(),
            Target::Serial(serial) => format!("host-serial:{serial}:"),
            Target::Usb => "host-usb:".to_string(),
            Target::Local => "host-local:".to_string(),
        }
    }
}

// ── Command encoding ─────────────────────────────────────────────

/// Build the full wire command: 4 uppercase hex digits carrying the
/// byte length of `<target prefix><body>`, then those bytes.
///
/// The length is computed from the concatenated byte array, not the
/// character count — a body with multi-byte characters would otherwise
/// corrupt the stream.
pub fn encode_command(target: &Target, body: &str) -> Vec<u8> {
    let full = format!("{}{}", target.serialize(), body);
    let payload = full.into_bytes();
    let mut command = format!("{:04X}", payload.len()).into_bytes();
    command.extend_from_slice(&payload);
    command
}

// ── ValidationResponse ───────────────────────────────────────────

/// Pre-I/O validation outcome. A failure is returned before any
/// socket use; it never becomes a mid-transfer error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResponse {
    pub success: bool,
    pub message: Option<String>,
}

impl ValidationResponse {
    pub fn success() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }

    pub fn missing_feature(feature: crate::device::Feature) -> Self {
        Self::failure(format!("device does not advertise feature {feature}"))
    }

    pub fn path_too_long() -> Self {
        Self::failure(format!(
            "remote path must be at most {} bytes",
            crate::sync::MAX_REMOTE_PATH_LENGTH
        ))
    }

    pub(crate) fn into_result(self) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            Err(TetherError::Validation(
                self.message.unwrap_or_else(|| "invalid request".to_string()),
            ))
        }
    }
}

// ── SetDeviceRequest ─────────────────────────────────────────────

/// The `host:transport:<serial>` indirection that pins a connection to
/// one device. The client composes this before the service handshake,
/// so serial-addressed executions handshake twice in sequence.
pub struct SetDeviceRequest {
    serial: String,
}

impl SetDeviceRequest {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
        }
    }
}

impl Request for SetDeviceRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(
            &Target::NonSpecified,
            &format!("host:transport:{}", self.serial),
        )
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_prefixes() {
        assert_eq!(Target::NonSpecified.serialize(), "");
        assert_eq!(Target::Host.serialize(), "host:");
        assert_eq!(
            Target::Serial("emulator-5554".into()).serialize(),
            "host-serial:emulator-5554:"
        );
        assert_eq!(Target::Usb.serialize(), "host-usb:");
        assert_eq!(Target::Local.serialize(), "host-local:");
    }

    #[test]
    fn command_header_is_hex_byte_length() {
        let command = encode_command(&Target::Host, "connect:123.123.123.123");
        assert_eq!(
            String::from_utf8(command).unwrap(),
            "001Chost:connect:123.123.123.123"
        );
    }

    #[test]
    fn command_header_counts_bytes_not_chars() {
        // Two 3-byte UTF-8 characters: 6 bytes, 2 chars.
        let command = encode_command(&Target::NonSpecified, "shell:echo 日本");
        let text = String::from_utf8(command).unwrap();
        let (header, rest) = text.split_at(4);
        assert_eq!(
            usize::from_str_radix(header, 16).unwrap(),
            rest.as_bytes().len()
        );
    }

    #[test]
    fn set_device_request_wire_form() {
        let request = SetDeviceRequest::new("serial");
        assert_eq!(
            String::from_utf8(request.serialize()).unwrap(),
            "0015host:transport:serial"
        );
    }

    #[test]
    fn validation_into_result() {
        assert!(ValidationResponse::success().into_result().is_ok());
        let err = ValidationResponse::failure("nope").into_result().unwrap_err();
        assert!(matches!(err, TetherError::Validation(m) if m == "nope"));
    }
}
