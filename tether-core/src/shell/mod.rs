//! Shell execution sub-protocols.
//!
//! v1 (`shell:`) is a raw byte stream with no exit-code channel — the
//! synchronous variant smuggles the code out via a trailing
//! `echo x$?`. v2 (`shell,v2,raw:`) is framed:
//!
//! ```text
//! frame:  [1 byte type][u32 LE length][length bytes payload]
//! EXIT:   [3][u32 LE length][1 status byte]   (length is ignored)
//! ```

use std::fmt;

pub mod v1;
pub mod v2;

// ── MessageType ──────────────────────────────────────────────────

/// Frame types of the shell v2 protocol.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Written by the client: data for the remote stdin.
    Stdin = 0,
    /// Read from the server: remote stdout bytes.
    Stdout = 1,
    /// Read from the server: remote stderr bytes.
    Stderr = 2,
    /// Read from the server: process exit; payload is one status byte.
    Exit = 3,
    /// Written by the client: close the remote stdin.
    CloseStdin = 4,
    /// Window size change (ASCII form of struct winsize).
    WindowSizeChange = 5,
    /// Any unrecognized type byte.
    Invalid,
}

impl MessageType {
    pub fn of(value: u8) -> Self {
        match value {
            0 => MessageType::Stdin,
            1 => MessageType::Stdout,
            2 => MessageType::Stderr,
            3 => MessageType::Exit,
            4 => MessageType::CloseStdin,
            5 => MessageType::WindowSizeChange,
            _ => MessageType::Invalid,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── Results ──────────────────────────────────────────────────────

/// Accumulated outcome of a shell command.
///
/// Stream fields are raw bytes — equality is content-based, and
/// output is not assumed to be valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommandResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `-1` until an EXIT frame has been observed.
    pub exit_code: i32,
}

impl ShellCommandResult {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// One incremental element of a duplex shell session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellCommandResultChunk {
    pub stdout: Option<Vec<u8>>,
    pub stderr: Option<Vec<u8>>,
    pub exit_code: Option<i32>,
}

/// One client-produced element of a duplex shell session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellCommandInputChunk {
    pub stdin: Option<Vec<u8>>,
    pub close_stdin: bool,
}

impl ShellCommandInputChunk {
    pub fn stdin(data: impl Into<Vec<u8>>) -> Self {
        Self {
            stdin: Some(data.into()),
            close_stdin: false,
        }
    }

    pub fn close() -> Self {
        Self {
            stdin: None,
            close_stdin: true,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_mapping() {
        assert_eq!(MessageType::of(0), MessageType::Stdin);
        assert_eq!(MessageType::of(1), MessageType::Stdout);
        assert_eq!(MessageType::of(2), MessageType::Stderr);
        assert_eq!(MessageType::of(3), MessageType::Exit);
        assert_eq!(MessageType::of(4), MessageType::CloseStdin);
        assert_eq!(MessageType::of(5), MessageType::WindowSizeChange);
        assert_eq!(MessageType::of(42), MessageType::Invalid);
    }

    #[test]
    fn result_equality_is_content_based() {
        let a = ShellCommandResult {
            stdout: b"foo\n".to_vec(),
            stderr: Vec::new(),
            exit_code: 0,
        };
        let b = ShellCommandResult {
            stdout: b"foo\n".to_vec(),
            stderr: Vec::new(),
            exit_code: 0,
        };
        assert_eq!(a, b);
    }
}
