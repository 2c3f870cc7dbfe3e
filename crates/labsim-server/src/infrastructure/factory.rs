//! Builds a transport from one configuration entry.

use std::sync::Arc;

use labsim_core::{TransportEntry, TransportKind};

use crate::application::device::Device;
use crate::application::transport::{Transport, TransportError};
use crate::infrastructure::tcp::TcpTransport;
use crate::infrastructure::udp::UdpTransport;

/// Creates the transport described by `entry` for `device`.
///
/// The device's settings are copied and the entry's `baudrate` and
/// `newline` overrides applied.  Nothing is bound until `start`.
pub fn create_transport(
    entry: &TransportEntry,
    device: &Arc<dyn Device>,
) -> Result<Arc<dyn Transport>, TransportError> {
    let settings = device
        .settings()
        .overridden(entry.baudrate, entry.newline.as_deref());

    let transport: Arc<dyn Transport> = match entry.kind {
        TransportKind::Tcp => Arc::new(TcpTransport::new(
            device,
            settings,
            entry.url.bind_address()?,
        )),
        TransportKind::Udp => Arc::new(UdpTransport::new(
            device,
            settings,
            entry.url.bind_address()?,
        )),
        TransportKind::Serial => serial(entry, device, settings)?,
    };
    Ok(transport)
}

#[cfg(unix)]
fn serial(
    entry: &TransportEntry,
    device: &Arc<dyn Device>,
    settings: crate::application::device::DeviceSettings,
) -> Result<Arc<dyn Transport>, TransportError> {
    let path = entry
        .url
        .as_path()
        .ok_or_else(|| TransportError::InvalidUrl(entry.url.to_string()))?;
    Ok(Arc::new(crate::infrastructure::serial::SerialTransport::new(
        device, settings, path,
    )))
}

#[cfg(not(unix))]
fn serial(
    _entry: &TransportEntry,
    _device: &Arc<dyn Device>,
    _settings: crate::application::device::DeviceSettings,
) -> Result<Arc<dyn Transport>, TransportError> {
    Err(TransportError::Unsupported(TransportKind::Serial))
}
