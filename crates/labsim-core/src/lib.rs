//! # labsim-core
//!
//! Shared building blocks for the labsim instrument simulator: the pieces of
//! the transport core that can be expressed without sockets, file
//! descriptors or an async runtime.
//!
//! # Architecture overview
//!
//! labsim exposes simulated laboratory instruments over TCP, UDP and
//! pseudo-terminal serial lines, speaking the same wire protocol as the real
//! hardware.  The server crate (`labsim-server`) owns all I/O; this crate
//! defines what that I/O means:
//!
//! - **`protocol`** – How bytes become messages.  The [`LineFramer`] state
//!   machine splits a byte stream on a terminator and recognises
//!   out-of-band "special messages"; [`transmission_time`] converts a byte
//!   count and a baud rate into the delay a real serial line would impose.
//!
//! - **`domain`** – The declarative device list ([`SimulatorConfig`]) that
//!   tells the server which devices to create and which transports each
//!   one listens on, plus the parsing rules for transport addresses.

pub mod domain;
pub mod protocol;

pub use domain::address::{AddressError, BindAddress};
pub use domain::config::{
    ConfigError, DeviceEntry, Options, SimulatorConfig, TransportEntry, TransportKind,
    TransportUrl,
};
pub use protocol::delay::transmission_time;
pub use protocol::framing::{Framing, LineFramer};
