//! UDP transport: every datagram is one message.
//!
//! There is no per-peer channel.  Each datagram is handed to a short task
//! that dispatches it to the device and sends every reply buffer back to the
//! datagram's source address.  Nothing is buffered across datagrams, so a
//! message split over two datagrams is two messages.
//!
//! For line-framed devices one trailing terminator is stripped from the
//! datagram so the device sees the same message it would over TCP.
//!
//! Broadcast is a no-op: the transport keeps no list of peers.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use labsim_core::{BindAddress, Framing, TransportKind};
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, Instrument, Span};

use crate::application::device::{Device, DeviceSettings};
use crate::application::transport::{Transport, TransportError};
use crate::infrastructure::channel::ReplySink;
use crate::infrastructure::protocol::dispatch;

/// Largest datagram accepted.
const MAX_DATAGRAM: usize = 65_536;

/// UDP endpoint for one device.
pub struct UdpTransport {
    device: Weak<dyn Device>,
    settings: DeviceSettings,
    address: BindAddress,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    local_addr: OnceLock<SocketAddr>,
    shutdown: watch::Sender<bool>,
    serving: Mutex<()>,
    span: Span,
}

impl UdpTransport {
    pub fn new(device: &Arc<dyn Device>, settings: DeviceSettings, address: BindAddress) -> Self {
        let span = info_span!(
            "transport",
            device = %device.name(),
            kind = "udp",
            address = %address
        );
        info!(parent: &span, "listening on {address} (baud={:?})", settings.baudrate);
        Self {
            device: Arc::downgrade(device),
            settings,
            address,
            socket: Mutex::new(None),
            local_addr: OnceLock::new(),
            shutdown: watch::channel(false).0,
            serving: Mutex::new(()),
            span,
        }
    }

    fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn receive_loop(&self, socket: Arc<UdpSocket>) {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return;
        }

        let mut handlers = JoinSet::new();
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok((n, peer)) => {
                        let handler = handle_datagram(
                            socket.clone(),
                            peer,
                            buf[..n].to_vec(),
                            self.device.clone(),
                            self.settings.clone(),
                        );
                        handlers.spawn(handler.instrument(self.span.clone()));
                    }
                    // ICMP port-unreachable from an earlier reply surfaces here
                    // on some platforms; it concerns one peer only.
                    Err(e) => debug!("recv_from error: {e}"),
                },
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("datagram handler panicked: {e}");
                        }
                    }
                }
            }
        }

        handlers.shutdown().await;
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn address(&self) -> String {
        self.address.to_string()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    async fn start(&self) -> Result<(), TransportError> {
        if self.is_stopped() {
            return Err(TransportError::Stopped);
        }
        let mut socket = self.socket.lock().await;
        if socket.is_some() {
            return Ok(());
        }

        let bound = UdpSocket::bind(self.address.to_string())
            .await
            .map_err(|source| TransportError::Bind {
                address: self.address.to_string(),
                source,
            })?;
        let local = bound.local_addr()?;
        let _ = self.local_addr.set(local);
        info!(parent: &self.span, "bound {local}");
        *socket = Some(Arc::new(bound));
        Ok(())
    }

    async fn serve_forever(&self) -> Result<(), TransportError> {
        if self.is_stopped() {
            return Ok(());
        }
        self.start().await?;
        let _serving = self.serving.lock().await;
        let Some(socket) = self.socket.lock().await.clone() else {
            return Ok(());
        };

        self.receive_loop(socket).instrument(self.span.clone()).await;
        info!(parent: &self.span, "stopped serving");
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.shutdown.send_replace(true);
        self.socket.lock().await.take();
        let _ = self.serving.lock().await;
        Ok(())
    }

    async fn broadcast(&self, _data: &[u8]) {
        debug!(parent: &self.span, "broadcast ignored: udp keeps no peer list");
    }
}

// ── Per-datagram handler ──────────────────────────────────────────────────────

/// Sends replies to one datagram's source.
struct UdpReplySink {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

#[async_trait]
impl ReplySink for UdpReplySink {
    async fn send(&self, data: &[u8]) -> io::Result<()> {
        let mut sent = 0;
        while sent < data.len() {
            let n = self.socket.send_to(&data[sent..], self.peer).await?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            sent += n;
        }
        Ok(())
    }
}

/// Strips one trailing terminator for line-framed devices.
fn datagram_message(mut datagram: Vec<u8>, settings: &DeviceSettings) -> Vec<u8> {
    if settings.framing == Framing::Line && datagram.ends_with(&settings.newline) {
        datagram.truncate(datagram.len() - settings.newline.len());
    }
    datagram
}

async fn handle_datagram(
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    datagram: Vec<u8>,
    device: Weak<dyn Device>,
    settings: DeviceSettings,
) {
    let message = datagram_message(datagram, &settings);
    if message.is_empty() {
        return;
    }
    let Some(device) = device.upgrade() else {
        return;
    };

    let sink = UdpReplySink { socket, peer };
    if let Err(e) = dispatch(&device, &message, settings.baudrate, &sink).await {
        info!("error handling datagram from {peer}: {e}");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
