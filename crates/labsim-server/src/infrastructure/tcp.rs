//! TCP transport: one protocol session per accepted connection.
//!
//! # Accept loop
//!
//! `serve_forever` accepts connections until `stop` flips the shutdown
//! watch.  Each accepted socket gets its own task in a [`JoinSet`], so a slow
//! or hung client never delays the others.  When the loop exits the join set
//! is shut down, which cancels every session still running; each session's
//! [`ConnectionGuard`](super::connections::ConnectionGuard) then removes it
//! from the open-connection table and the socket halves are dropped.
//!
//! No read or idle timeout is applied.  A client that never sends anything
//! keeps its task alive until it disconnects or the transport stops.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use labsim_core::{BindAddress, TransportKind};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::application::device::{Device, DeviceSettings, Peer};
use crate::application::transport::{Transport, TransportError};
use crate::infrastructure::channel::{ChannelReader, ChannelWriter};
use crate::infrastructure::connections::ConnectionRegistry;
use crate::infrastructure::protocol::MessageProtocol;

/// TCP listening endpoint for one device.
pub struct TcpTransport {
    device: Weak<dyn Device>,
    settings: DeviceSettings,
    address: BindAddress,
    listener: Mutex<Option<Arc<TcpListener>>>,
    local_addr: OnceLock<SocketAddr>,
    connections: ConnectionRegistry,
    shutdown: watch::Sender<bool>,
    serving: Mutex<()>,
    span: Span,
}

impl TcpTransport {
    pub fn new(device: &Arc<dyn Device>, settings: DeviceSettings, address: BindAddress) -> Self {
        let span = info_span!(
            "transport",
            device = %device.name(),
            kind = "tcp",
            address = %address
        );
        info!(parent: &span, "listening on {address} (baud={:?})", settings.baudrate);
        Self {
            device: Arc::downgrade(device),
            settings,
            address,
            listener: Mutex::new(None),
            local_addr: OnceLock::new(),
            connections: ConnectionRegistry::new(),
            shutdown: watch::channel(false).0,
            serving: Mutex::new(()),
            span,
        }
    }

    fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn accept_loop(&self, listener: Arc<TcpListener>) {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return;
        }

        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let session = handle_connection(
                            stream,
                            peer,
                            self.device.clone(),
                            self.settings.clone(),
                            self.connections.clone(),
                        );
                        sessions.spawn(session.instrument(self.span.clone()));
                    }
                    Err(e) => error!("accept error: {e}"),
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("connection task panicked: {e}");
                        }
                    }
                }
            }
        }

        debug!("cancelling {} connection task(s)", sessions.len());
        sessions.shutdown().await;
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn address(&self) -> String {
        self.address.to_string()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    fn connection_count(&self) -> usize {
        self.connections.len()
    }

    async fn start(&self) -> Result<(), TransportError> {
        if self.is_stopped() {
            return Err(TransportError::Stopped);
        }
        let mut listener = self.listener.lock().await;
        if listener.is_some() {
            return Ok(());
        }

        let bound = TcpListener::bind(self.address.to_string())
            .await
            .map_err(|source| TransportError::Bind {
                address: self.address.to_string(),
                source,
            })?;
        let local = bound.local_addr()?;
        let _ = self.local_addr.set(local);
        info!(parent: &self.span, "bound {local}");
        *listener = Some(Arc::new(bound));
        Ok(())
    }

    async fn serve_forever(&self) -> Result<(), TransportError> {
        if self.is_stopped() {
            return Ok(());
        }
        self.start().await?;
        let _serving = self.serving.lock().await;
        // `None` here means `stop` ran in between.
        let Some(listener) = self.listener.lock().await.clone() else {
            return Ok(());
        };

        self.accept_loop(listener)
            .instrument(self.span.clone())
            .await;
        info!(parent: &self.span, "stopped serving");
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.shutdown.send_replace(true);
        self.listener.lock().await.take();
        // Wait for the accept loop to cancel its sessions.
        let _ = self.serving.lock().await;
        Ok(())
    }

    async fn broadcast(&self, data: &[u8]) {
        self.connections.broadcast(data).await;
    }
}

// ── Per-connection handler ────────────────────────────────────────────────────

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    device: Weak<dyn Device>,
    settings: DeviceSettings,
    connections: ConnectionRegistry,
) {
    info!("new connection from {peer}");
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay failed for {peer}: {e}");
    }

    let (read_half, write_half) = stream.into_split();
    let writer = ChannelWriter::new(write_half);
    let _registration = connections.register(peer, writer.clone());

    let mut protocol = MessageProtocol::new(
        device,
        settings,
        ChannelReader::new(read_half),
        writer,
        Peer::Tcp(peer),
    );
    match protocol.run().await {
        Ok(()) => info!("client disconnected {peer}"),
        Err(e) => warn!("connection {peer} closed: {e}"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
