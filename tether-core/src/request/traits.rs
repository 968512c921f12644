//! The closed set of request execution strategies.
//!
//! Every command the daemon understands is one of four shapes:
//!
//! - [`SynchronousRequest`] — send, accumulate the reply to EOF,
//!   transform once (`version`, `reboot`, shell v1).
//! - [`ComplexRequest`] — send, then run a custom framed read routine
//!   that may issue sub-reads (`features`, stat-then-transfer).
//! - [`AsyncChannelRequest`] — a duplex pump interleaving server
//!   elements and client elements until a terminal condition (shell
//!   v2, file push/pull, device tracking).
//! - [`MultiRequest`] — a composite issuing several requests and
//!   branching on device features (directory pull, compat shims).

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::client::Client;
use crate::error::{Result, TetherError};
use crate::request::{Target, ValidationResponse};
use crate::transport::Connection;

// ── Request ──────────────────────────────────────────────────────

/// Data-only envelope shared by every request shape.
///
/// A request instance is used exactly once per execution: it may hold
/// mutable read state, so it is not reusable across connections.
#[async_trait]
pub trait Request: Send {
    /// The full wire command, length prefix included.
    fn serialize(&self) -> Vec<u8>;

    fn target(&self) -> Target {
        Target::NonSpecified
    }

    /// Checked before any I/O happens.
    fn validate(&self) -> ValidationResponse {
        ValidationResponse::success()
    }

    /// Per-request idle-read deadline; `None` uses the factory default.
    fn io_timeout(&self) -> Option<Duration> {
        None
    }

    /// Write the command and expect an `OKAY` status. A `FAIL` reply
    /// surfaces the daemon's message as a rejection.
    async fn handshake(&mut self, conn: &mut Connection) -> Result<()> {
        let command = self.serialize();
        conn.write_all(&command).await?;
        let response = conn.read_transport_response().await?;
        if response.ok {
            Ok(())
        } else {
            Err(TetherError::Rejected(response.message_or_default()))
        }
    }
}

// ── ComplexRequest ───────────────────────────────────────────────

/// Send one command, then run an arbitrary framed read routine.
#[async_trait]
pub trait ComplexRequest: Request {
    type Output: Send;

    /// Called after the handshake `OKAY`.
    async fn read_element(&mut self, conn: &mut Connection) -> Result<Self::Output>;

    async fn process(&mut self, conn: &mut Connection) -> Result<Self::Output> {
        self.handshake(conn).await?;
        self.read_element(conn).await
    }
}

// ── SynchronousRequest ───────────────────────────────────────────

/// Accumulate-to-EOF requests: the whole response body becomes one
/// typed result. Never yields partial results.
#[async_trait]
pub trait SynchronousRequest: Request {
    type Output: Send;

    /// Feed one received chunk to the accumulator.
    fn accumulate(&mut self, chunk: &[u8]) -> Result<()>;

    /// Turn the accumulated bytes into the final result.
    fn transform(&mut self) -> Result<Self::Output>;
}

#[async_trait]
impl<T: SynchronousRequest> ComplexRequest for T {
    type Output = <T as SynchronousRequest>::Output;

    async fn read_element(&mut self, conn: &mut Connection) -> Result<Self::Output> {
        let pool = conn.buffers();
        let mut buf = pool.packet().await;
        loop {
            if conn.is_closed_for_read() || conn.is_closed_for_write() {
                break;
            }
            match conn.read_available(&mut buf).await? {
                None => break,
                Some(0) => tokio::task::yield_now().await,
                Some(n) => self.accumulate(&buf[..n])?,
            }
        }
        self.transform()
    }
}

// ── AsyncChannelRequest ──────────────────────────────────────────

/// Bidirectional streaming over one connection.
///
/// The client pump alternates one `read_element` and one
/// `write_element` per iteration and yields between steps, so a
/// producer feeding inputs and a consumer draining outputs run
/// concurrently without starving each other. Implementations must not
/// block in `read_element` when the stream is quiet — return
/// `Ok(false)` after a cooperative check instead.
#[async_trait]
pub trait AsyncChannelRequest: Request {
    type Output: Send + 'static;
    type Input: Send + 'static;

    /// Read at most one server element, pushing zero or one values to
    /// `out`. Returns `true` when the stream reached its terminal
    /// state.
    async fn read_element(
        &mut self,
        conn: &mut Connection,
        out: &mpsc::Sender<Self::Output>,
    ) -> Result<bool>;

    /// Consume one client element and write its wire representation.
    async fn write_element(&mut self, item: Self::Input, conn: &mut Connection) -> Result<()>;

    /// Final flush after the loop ends, on success and on cancellation
    /// alike. The connection is no longer available here.
    async fn on_close(&mut self, out: &mpsc::Sender<Self::Output>) -> Result<()> {
        let _ = out;
        Ok(())
    }
}

// ── MultiRequest ─────────────────────────────────────────────────

/// A composite that issues several requests against the client,
/// each on its own connection, and aggregates the results.
#[async_trait]
pub trait MultiRequest: Send {
    type Output;

    async fn execute(&mut self, client: &Client, serial: Option<&str>) -> Result<Self::Output>;
}
