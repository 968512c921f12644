//! The request execution engine.
//!
//! One logical task per socket: every execution dials a fresh
//! connection, optionally pins it to a device via the
//! `host:transport:` indirection, performs the request handshake and
//! then drives the request's strategy. No two requests ever share a
//! connection; many run concurrently across independent connections.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, TetherError};
use crate::request::{AsyncChannelRequest, ComplexRequest, MultiRequest, Request, SetDeviceRequest};
use crate::transport::{BufferPool, Connection, SocketFactory, TcpSocketFactory};

/// Default daemon endpoint.
pub const DEFAULT_DAEMON_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
pub const DEFAULT_DAEMON_PORT: u16 = 5037;

/// Environment override for the daemon port.
pub const SERVER_PORT_ENV_VAR: &str = "TETHER_SERVER_PORT";

// ── Client ───────────────────────────────────────────────────────

/// Entry point: owns the socket factory and the buffer pool, executes
/// requests.
pub struct Client {
    factory: Arc<dyn SocketFactory>,
    buffers: Arc<BufferPool>,
}

impl Client {
    /// Connect to the default daemon endpoint, honoring
    /// [`SERVER_PORT_ENV_VAR`].
    pub fn new() -> Self {
        let port = std::env::var(SERVER_PORT_ENV_VAR)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_DAEMON_PORT);
        Self::for_address(SocketAddr::new(DEFAULT_DAEMON_HOST, port))
    }

    pub fn for_address(address: SocketAddr) -> Self {
        Self::with_factory(Arc::new(TcpSocketFactory::new(address)))
    }

    pub fn with_factory(factory: Arc<dyn SocketFactory>) -> Self {
        Self {
            factory,
            buffers: BufferPool::new(),
        }
    }

    /// Swap in a dedicated buffer pool (isolated pools for tests).
    pub fn with_buffer_pool(mut self, buffers: Arc<BufferPool>) -> Self {
        self.buffers = buffers;
        self
    }

    async fn open(
        &self,
        timeout: Option<std::time::Duration>,
        serial: Option<&str>,
    ) -> Result<Connection> {
        let socket = self.factory.connect(timeout).await?;
        let mut conn = Connection::new(socket, self.buffers.clone());
        if let Some(serial) = serial {
            SetDeviceRequest::new(serial).handshake(&mut conn).await?;
        }
        Ok(conn)
    }

    /// Execute a one-shot request and return its typed result.
    pub async fn execute<R>(&self, mut request: R, serial: Option<&str>) -> Result<R::Output>
    where
        R: ComplexRequest,
    {
        request.validate().into_result()?;
        let mut conn = self.open(request.io_timeout(), serial).await?;
        let result = request.process(&mut conn).await;
        if let Err(e) = conn.close().await {
            debug!("ignoring error during connection teardown: {e}");
        }
        result
    }

    /// Execute a duplex streaming request.
    ///
    /// Returns a handle whose receiver yields server-produced elements;
    /// `input` feeds client-produced elements (pass `None` for requests
    /// that take no input). Read and write steps strictly alternate —
    /// at most one pending element in each direction — so daemon-side
    /// flow control is respected.
    pub fn execute_channel<R>(
        &self,
        mut request: R,
        input: Option<mpsc::Receiver<R::Input>>,
        serial: Option<&str>,
    ) -> Result<ChannelHandle<R::Output>>
    where
        R: AsyncChannelRequest + 'static,
    {
        request.validate().into_result()?;

        let factory = self.factory.clone();
        let buffers = self.buffers.clone();
        let serial = serial.map(str::to_owned);
        let token = CancellationToken::new();
        let pump_token = token.clone();
        let (out_tx, out_rx) = mpsc::channel(1);

        let handle = tokio::spawn(async move {
            let socket = factory.connect(request.io_timeout()).await?;
            let mut conn = Connection::new(socket, buffers);

            let outcome = async {
                if let Some(serial) = serial.as_deref() {
                    SetDeviceRequest::new(serial).handshake(&mut conn).await?;
                }
                request.handshake(&mut conn).await?;

                let mut input = input;
                loop {
                    if pump_token.is_cancelled() || out_tx.is_closed() {
                        break;
                    }
                    if conn.is_closed_for_read() {
                        break;
                    }
                    if let Some(rx) = input.as_mut() {
                        match rx.try_recv() {
                            Ok(item) => request.write_element(item, &mut conn).await?,
                            Err(mpsc::error::TryRecvError::Empty) => {}
                            Err(mpsc::error::TryRecvError::Disconnected) => input = None,
                        }
                    }
                    if request.read_element(&mut conn, &out_tx).await? {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
                request.on_close(&out_tx).await
            }
            .await;

            if let Err(e) = conn.close().await {
                debug!("ignoring error during connection teardown: {e}");
            }
            outcome
        });

        Ok(ChannelHandle {
            receiver: out_rx,
            token,
            handle,
        })
    }

    /// Execute a composite request.
    pub async fn execute_multi<R>(&self, mut request: R, serial: Option<&str>) -> Result<R::Output>
    where
        R: MultiRequest,
    {
        request.execute(self, serial).await
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

// ── ChannelHandle ────────────────────────────────────────────────

/// Consumer side of a streaming request.
///
/// Dropping the handle (or calling [`cancel`](Self::cancel)) stops the
/// pump cooperatively: the pump still runs the request's close hook,
/// returns its pooled buffers and closes the socket exactly once.
pub struct ChannelHandle<T> {
    receiver: mpsc::Receiver<T>,
    token: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

impl<T> ChannelHandle<T> {
    /// Next server-produced element, or `None` when the pump is done.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Ask the pump to stop after its current step.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Drain nothing further and wait for the pump's final status.
    pub async fn finish(mut self) -> Result<()> {
        self.receiver.close();
        match self.handle.await {
            Ok(result) => result,
            Err(join_error) => Err(TetherError::Task(join_error.to_string())),
        }
    }
}

impl<T> Stream for ChannelHandle<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.receiver.poll_recv(cx)
    }
}
