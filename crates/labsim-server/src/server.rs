//! Server lifecycle: build devices from a config, serve them, stop them.
//!
//! # Device lifecycle
//!
//! ```text
//! Unconfigured ──► Constructed ──► TransportsBound ──► Serving ──► Stopped
//! ```
//!
//! A device that fails anywhere before `Constructed` → `TransportsBound`
//! (unknown class, bad options, malformed transport entry) is logged and left
//! out; the remaining devices still start.  A transport that cannot bind its
//! address is logged and dropped from its device, which keeps serving on its
//! other transports.
//!
//! # Shutdown
//!
//! [`Server::serve_forever`] returns when every transport has finished or
//! the shutdown future resolves, whichever comes first.  It then calls
//! [`Server::stop`], which runs at most once per server: every device's
//! background work is cancelled and every transport stopped, even if some
//! transports already failed.

use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use labsim_core::{ConfigError, DeviceEntry, SimulatorConfig, TransportKind};
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::application::broadcast::Broadcaster;
use crate::application::device::Device;
use crate::application::registry::{Registry, RegistryError};
use crate::application::transport::{Transport, TransportError};
use crate::infrastructure::factory::create_transport;

/// Error type for building and stopping the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("transport {address}: {source}")]
    Transport {
        address: String,
        #[source]
        source: TransportError,
    },

    /// One or more transports failed to stop cleanly.
    #[error("failed to stop {} transport(s): {}", .0.len(), join_errors(.0))]
    Stop(Vec<TransportError>),

    /// The background serving task panicked or was cancelled.
    #[error("server task failed: {0}")]
    Task(#[from] JoinError),
}

fn join_errors(errors: &[TransportError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Where a device is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// The config entry has been read; nothing is built yet.
    Unconfigured,
    /// The device object exists and its transports are created.
    Constructed,
    /// Every transport that could bind its address has done so.
    TransportsBound,
    Serving,
    Stopped,
}

/// A running device together with the transports it owns.
pub struct DeviceInstance {
    device: Arc<dyn Device>,
    transports: RwLock<Vec<Arc<dyn Transport>>>,
    state: Mutex<DeviceState>,
}

impl DeviceInstance {
    /// Constructs the device an entry describes and creates its transports.
    pub fn build(entry: &DeviceEntry, registry: &Registry) -> Result<Self, ServerError> {
        let state = Mutex::new(DeviceState::Unconfigured);
        let device = registry.create(entry)?;

        let transports = entry
            .transports
            .iter()
            .map(|transport| {
                create_transport(transport, &device).map_err(|source| ServerError::Transport {
                    address: transport.url.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        device.attach(Broadcaster::new(&transports));

        let instance = Self {
            device,
            transports: RwLock::new(transports),
            state,
        };
        instance.set_state(DeviceState::Constructed);
        Ok(instance)
    }

    pub fn name(&self) -> &str {
        self.device.name()
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    /// Snapshot of the transports still attached to the device.
    pub fn transports(&self) -> Vec<Arc<dyn Transport>> {
        self.transports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn state(&self) -> DeviceState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bound address of the first transport of `kind`.
    pub fn local_addr(&self, kind: TransportKind) -> Option<SocketAddr> {
        self.transports()
            .iter()
            .filter(|t| t.kind() == kind)
            .find_map(|t| t.local_addr())
    }

    fn set_state(&self, next: DeviceState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(device = %self.name(), "{:?} -> {next:?}", *state);
        *state = next;
    }

    /// Starts every transport; those that fail are stopped and dropped.
    async fn bind(&self) {
        if self.state() != DeviceState::Constructed {
            return;
        }
        for transport in self.transports() {
            if let Err(e) = transport.start().await {
                error!(
                    device = %self.name(),
                    "{} transport {} failed to start, skipping it: {e}",
                    transport.kind(),
                    transport.address()
                );
                if let Err(e) = transport.stop().await {
                    debug!("cleanup after failed start: {e}");
                }
                self.transports
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain(|t| !Arc::ptr_eq(t, &transport));
            }
        }
        self.set_state(DeviceState::TransportsBound);
    }
}

/// All configured devices and their transports.
pub struct Server {
    devices: Vec<Arc<DeviceInstance>>,
    stopped: AtomicBool,
    span: Span,
}

impl Server {
    /// Builds every device in `config`.  Entries that cannot be built are
    /// logged and skipped.
    pub fn from_config(config: &SimulatorConfig, registry: &Registry) -> Self {
        let span = info_span!("server");
        if config.backdoor.is_some() {
            warn!(parent: &span, "backdoor is not supported; ignoring it");
        }

        for rejected in &config.rejected {
            error!(parent: &span, "skipping device: {rejected}");
        }

        let mut names = HashSet::new();
        let mut devices = Vec::new();
        for entry in &config.devices {
            let name = entry.name();
            let built = if names.insert(name.to_string()) {
                DeviceInstance::build(entry, registry)
            } else {
                Err(ConfigError::DuplicateDevice(name.to_string()).into())
            };
            match built {
                Ok(instance) => {
                    info!(parent: &span, device = %name, "created device {name}");
                    devices.push(Arc::new(instance));
                }
                Err(e) => error!(parent: &span, device = %name, "skipping device: {e}"),
            }
        }

        Self {
            devices,
            stopped: AtomicBool::new(false),
            span,
        }
    }

    pub fn devices(&self) -> &[Arc<DeviceInstance>] {
        &self.devices
    }

    /// Looks a running device up by name.
    pub fn device(&self, name: &str) -> Option<&Arc<DeviceInstance>> {
        self.devices.iter().find(|d| d.name() == name)
    }

    /// Binds every transport of every device.  Calling it again is a no-op.
    pub async fn start(&self) {
        for instance in &self.devices {
            instance.bind().instrument(self.span.clone()).await;
        }
    }

    /// Serves every transport until they all finish or `shutdown` resolves,
    /// then stops the server.
    pub async fn serve_forever<F>(&self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        self.start().await;

        let mut tasks = JoinSet::new();
        for instance in &self.devices {
            instance.set_state(DeviceState::Serving);
            for transport in instance.transports() {
                let address = transport.address();
                tasks.spawn(
                    async move { (address, transport.serve_forever().await) }
                        .instrument(self.span.clone()),
                );
            }
        }
        info!(parent: &self.span, "serving {} transport(s)", tasks.len());

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(parent: &self.span, "shutdown requested");
                    break;
                }
                joined = tasks.join_next() => match joined {
                    None => {
                        info!(parent: &self.span, "all transports finished");
                        break;
                    }
                    Some(joined) => log_transport_exit(&self.span, joined),
                },
            }
        }

        let result = self.stop().await;
        while let Some(joined) = tasks.join_next().await {
            log_transport_exit(&self.span, joined);
        }
        result
    }

    /// Cancels device background work and stops every transport.  Only the
    /// first call does anything.
    pub async fn stop(&self) -> Result<(), ServerError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut failures = Vec::new();
        for instance in &self.devices {
            instance.device.shutdown().await;
            for transport in instance.transports() {
                if let Err(e) = transport.stop().await {
                    error!(
                        parent: &self.span,
                        device = %instance.name(),
                        "failed to stop {}: {e}",
                        transport.address()
                    );
                    failures.push(e);
                }
            }
            instance.set_state(DeviceState::Stopped);
        }
        info!(parent: &self.span, "stopped");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ServerError::Stop(failures))
        }
    }
}

fn log_transport_exit(
    span: &Span,
    joined: Result<(String, Result<(), TransportError>), JoinError>,
) {
    match joined {
        Ok((address, Ok(()))) => debug!(parent: span, "transport {address} finished"),
        Ok((address, Err(e))) => error!(parent: span, "transport {address} failed: {e}"),
        Err(e) => error!(parent: span, "transport task failed: {e}"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
