//! Domain module: the declarative device list and transport addresses.

pub mod address;
pub mod config;

pub use address::{AddressError, BindAddress};
pub use config::{
    ConfigError, DeviceEntry, Options, SimulatorConfig, TransportEntry, TransportKind,
    TransportUrl,
};
