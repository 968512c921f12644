//! Shell v1: raw output stream, exit code recovered from a trailing
//! `echo`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Result, TetherError};
use crate::request::{
    AsyncChannelRequest, Request, SynchronousRequest, Target, encode_command,
};
use crate::shell::ShellCommandResult;
use crate::transport::Connection;

/// Marks where command output ends and the echoed exit code begins.
pub const EXIT_CODE_DELIMITER: char = 'x';

// ── Synchronous variant ──────────────────────────────────────────

/// `shell:<cmd>;echo x$?` — accumulate everything to EOF, then split
/// the exit code off at the delimiter.
pub struct ShellCommandRequest {
    cmd: String,
    target: Target,
    io_timeout: Option<Duration>,
    accumulated: Vec<u8>,
}

impl ShellCommandRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            target: Target::NonSpecified,
            io_timeout: None,
            accumulated: Vec::new(),
        }
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }
}

impl Request for ShellCommandRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(
            &self.target,
            &format!("shell:{};echo {}$?", self.cmd, EXIT_CODE_DELIMITER),
        )
    }

    fn target(&self) -> Target {
        self.target.clone()
    }

    fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout
    }
}

impl SynchronousRequest for ShellCommandRequest {
    type Output = ShellCommandResult;

    fn accumulate(&mut self, chunk: &[u8]) -> Result<()> {
        self.accumulated.extend_from_slice(chunk);
        Ok(())
    }

    fn transform(&mut self) -> Result<ShellCommandResult> {
        split_exit_code(&self.accumulated)
    }
}

/// Split `<output>x<code>` at the last delimiter occurrence.
///
/// A missing delimiter or a non-numeric code means the response is
/// corrupted — that is an error, never a silent exit code 0.
pub(crate) fn split_exit_code(response: &[u8]) -> Result<ShellCommandResult> {
    let delimiter = EXIT_CODE_DELIMITER as u8;
    let position = response
        .iter()
        .rposition(|&b| b == delimiter)
        .ok_or_else(|| {
            TetherError::Rejected("no exit code delimiter in shell response".to_string())
        })?;

    let (stdout, code) = response.split_at(position);
    let code_text = std::str::from_utf8(&code[1..])
        .map_err(|_| TetherError::Rejected("exit code is not valid text".to_string()))?
        .trim();
    let exit_code: i32 = code_text.parse().map_err(|_| {
        TetherError::Rejected(format!("exit code is not a number: {code_text:?}"))
    })?;

    Ok(ShellCommandResult {
        stdout: stdout.to_vec(),
        stderr: Vec::new(),
        exit_code,
    })
}

// ── Channeled variant ────────────────────────────────────────────

/// `shell:<cmd>` — stream raw output chunks as they arrive. The v1
/// service has no exit-code channel; the stream simply ends.
pub struct ChanneledShellCommandRequest {
    cmd: String,
    target: Target,
}

impl ChanneledShellCommandRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            target: Target::NonSpecified,
        }
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }
}

impl Request for ChanneledShellCommandRequest {
    fn serialize(&self) -> Vec<u8> {
        encode_command(&self.target, &format!("shell:{}", self.cmd))
    }

    fn target(&self) -> Target {
        self.target.clone()
    }
}

#[async_trait]
impl AsyncChannelRequest for ChanneledShellCommandRequest {
    type Output = Vec<u8>;
    type Input = ();

    async fn read_element(
        &mut self,
        conn: &mut Connection,
        out: &mpsc::Sender<Vec<u8>>,
    ) -> Result<bool> {
        let pool = conn.buffers();
        let mut buf = pool.packet().await;
        match conn.read_available(&mut buf).await? {
            None => Ok(true),
            Some(0) => Ok(false),
            Some(n) => {
                out.send(buf[..n].to_vec()).await?;
                Ok(false)
            }
        }
    }

    async fn write_element(&mut self, _item: (), _conn: &mut Connection) -> Result<()> {
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_appends_the_exit_echo() {
        let request = ShellCommandRequest::new("echo hello");
        assert_eq!(
            String::from_utf8(request.serialize()).unwrap(),
            "0019shell:echo hello;echo x$?"
        );
    }

    #[test]
    fn splits_at_the_last_delimiter() {
        let result = split_exit_code(b"something-somethingx1").unwrap();
        assert_eq!(result.stdout, b"something-something");
        assert_eq!(result.exit_code, 1);
    }

    #[test]
    fn output_containing_the_delimiter_still_parses() {
        let result = split_exit_code(b"unix rocksx0").unwrap();
        assert_eq!(result.stdout, b"unix rocks");
        assert_eq!(result.exit_code, 0);
    }

    #[test]
    fn trailing_newline_after_code_is_tolerated() {
        let result = split_exit_code(b"outx17\n").unwrap();
        assert_eq!(result.exit_code, 17);
    }

    #[test]
    fn missing_delimiter_is_a_rejection() {
        let err = split_exit_code(b"no delimiter here").unwrap_err();
        assert!(matches!(err, TetherError::Rejected(_)));
    }

    #[test]
    fn non_numeric_code_is_a_rejection() {
        let err = split_exit_code(b"outxoops").unwrap_err();
        assert!(matches!(err, TetherError::Rejected(_)));
    }
}
