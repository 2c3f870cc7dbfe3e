//! In-process server for tests.
//!
//! [`ServerHandle::start`] binds every transport before it returns, so a
//! test can connect immediately without racing the listener.  The server
//! then runs in a background task until [`ServerHandle::stop`] is called or
//! the handle is dropped.
//!
//! ```no_run
//! # async fn demo() {
//! use labsim_core::{DeviceEntry, SimulatorConfig, TransportEntry};
//! use labsim_server::testing::ServerHandle;
//! use labsim_server::Registry;
//!
//! let config = SimulatorConfig::new(vec![
//!     DeviceEntry::new("Echo").with_transport(TransportEntry::tcp("127.0.0.1:0")),
//! ]);
//! let handle = ServerHandle::start(&config, &Registry::with_builtin_devices()).await;
//! let addr = handle.tcp_addr("Echo").expect("bound");
//! // ... talk to `addr` ...
//! handle.stop().await.expect("clean stop");
//! # }
//! ```

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use labsim_core::{SimulatorConfig, TransportKind};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::application::registry::Registry;
use crate::server::{DeviceInstance, Server, ServerError};

/// A server running in a background task.
pub struct ServerHandle {
    server: Arc<Server>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<(), ServerError>>>,
}

impl ServerHandle {
    /// Builds the server, binds every transport, then starts serving.
    pub async fn start(config: &SimulatorConfig, registry: &Registry) -> Self {
        let server = Arc::new(Server::from_config(config, registry));
        server.start().await;

        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn({
            let server = server.clone();
            async move {
                server
                    .serve_forever(async {
                        let _ = rx.await;
                    })
                    .await
            }
        });

        Self {
            server,
            shutdown: Some(tx),
            task: Some(task),
        }
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn device(&self, name: &str) -> Option<&Arc<DeviceInstance>> {
        self.server.device(name)
    }

    /// Connectable address of the device's first TCP transport.
    pub fn tcp_addr(&self, device: &str) -> Option<SocketAddr> {
        self.connectable(device, TransportKind::Tcp)
    }

    /// Connectable address of the device's first UDP transport.
    pub fn udp_addr(&self, device: &str) -> Option<SocketAddr> {
        self.connectable(device, TransportKind::Udp)
    }

    /// Symlink path of the device's first serial transport.
    pub fn serial_link(&self, device: &str) -> Option<PathBuf> {
        self.device(device)?
            .transports()
            .iter()
            .find(|t| t.kind() == TransportKind::Serial)
            .map(|t| PathBuf::from(t.address()))
    }

    fn connectable(&self, device: &str, kind: TransportKind) -> Option<SocketAddr> {
        let mut addr = self.device(device)?.local_addr(kind)?;
        // Wildcard binds are reached through loopback.
        if addr.ip().is_unspecified() {
            addr.set_ip(match addr {
                SocketAddr::V4(_) => Ipv4Addr::LOCALHOST.into(),
                SocketAddr::V6(_) => Ipv6Addr::LOCALHOST.into(),
            });
        }
        Some(addr)
    }

    /// Signals shutdown and waits for the server to stop.
    pub async fn stop(mut self) -> Result<(), ServerError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.take() {
            Some(task) => task.await?,
            None => Ok(()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
