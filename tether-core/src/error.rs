//! Domain-specific error types for the tether protocol.
//!
//! All fallible operations return `Result<T, TetherError>`.
//! No panics on daemon input — every wire-level failure is typed.

use std::time::Duration;
use thiserror::Error;

use crate::shell::MessageType;

pub type Result<T> = std::result::Result<T, TetherError>;

/// The canonical error type for the tether client.
#[derive(Debug, Error)]
pub enum TetherError {
    // ── Validation (pre-I/O) ─────────────────────────────────────
    /// The request arguments are unusable; no socket was touched.
    #[error("request validation failed: {0}")]
    Validation(String),

    // ── Daemon rejections ────────────────────────────────────────
    /// The daemon answered `FAIL`; carries its message verbatim.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// A file pull was aborted by a `FAIL` frame mid-stream.
    #[error("failed to pull {path}: {message}")]
    PullFailed { path: String, message: String },

    /// The daemon did not acknowledge a pushed file.
    #[error("failed to push {path}: {message}")]
    PushFailed { path: String, message: String },

    // ── Protocol errors ──────────────────────────────────────────
    /// A sync-protocol frame carried an unknown magic.
    #[error("unexpected sync frame magic {0:?}")]
    UnexpectedSyncFrame(String),

    /// A declared frame length exceeds the hard cap.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A shell v2 frame type that is not valid in the current stream.
    #[error("shell frame type {0} not valid in this stream")]
    UnexpectedShellFrame(MessageType),

    /// The framebuffer header announced a version we do not speak.
    #[error("unsupported framebuffer protocol version {0}")]
    UnsupportedImageProtocol(u32),

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} value: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// A frame or field violated protocol rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    // ── I/O errors ───────────────────────────────────────────────
    /// The underlying socket reported an error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// An idle read exceeded the configured deadline.
    #[error("read timed out after {0:?}")]
    Timeout(Duration),

    /// A channel between pump and consumer closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// A spawned request task failed to join.
    #[error("request task failed: {0}")]
    Task(String),

    // ── Encoding errors ──────────────────────────────────────────
    /// UTF-8 conversion failed on a wire string.
    #[error("invalid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A text field could not be parsed as the expected number.
    #[error("encoding error: {0}")]
    Encoding(String),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for TetherError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        TetherError::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = TetherError::Rejected("device offline".into());
        assert!(e.to_string().contains("device offline"));

        let e = TetherError::FrameTooLarge {
            size: 100_000,
            max: 65536,
        };
        assert!(e.to_string().contains("100000"));
        assert!(e.to_string().contains("65536"));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: TetherError = io_err.into();
        assert!(matches!(e, TetherError::Io(_)));
    }

    #[test]
    fn pull_failure_carries_daemon_message() {
        let e = TetherError::PullFailed {
            path: "/sdcard/f".into(),
            message: "No such file or directory".into(),
        };
        assert!(e.to_string().contains("/sdcard/f"));
        assert!(e.to_string().contains("No such file"));
    }
}
