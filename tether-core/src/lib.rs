//! # tether-core
//!
//! Client library for the tether device-debugging-bridge protocol: a
//! length-prefixed, command-oriented TCP protocol spoken to a daemon
//! that routes commands to attached devices.
//!
//! This crate contains:
//! - **Transport**: the `Socket` contract, the TCP/stream
//!   implementation, the bounded `BufferPool`, and `Connection`
//! - **Requests**: the envelope (`Target`, validation, handshake) and
//!   the four execution strategies (synchronous, complex, async
//!   channel, multi)
//! - **Sub-protocols**: file sync (v1/v2), shell (v1 and framed v2),
//!   framebuffer capture, sideload
//! - **Services**: device listing/tracking, feature negotiation, port
//!   forwarding, package install, pairing and discovery
//! - **Client**: the per-request connection engine
//! - **Error**: `TetherError` — typed, `thiserror`-based hierarchy

pub mod client;
pub mod device;
pub mod error;
pub mod forwarding;
pub mod framebuffer;
pub mod misc;
pub mod pkg;
pub mod request;
pub mod shell;
pub mod sync;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use client::{Client, ChannelHandle, DEFAULT_DAEMON_PORT, SERVER_PORT_ENV_VAR};
pub use device::{Device, DeviceState, Feature};
pub use error::{Result, TetherError};
pub use request::{
    AsyncChannelRequest, ComplexRequest, MultiRequest, Request, SynchronousRequest, Target,
    ValidationResponse,
};
pub use sync::{FileEntry, MAX_REMOTE_PATH_LENGTH};
pub use transport::{
    BufferPool, Connection, MAX_FILE_PACKET_LENGTH, MAX_PACKET_LENGTH, Socket, SocketFactory,
    StreamSocket, TransportResponse,
};
