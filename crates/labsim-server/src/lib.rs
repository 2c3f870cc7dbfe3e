//! labsim-server library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # Layout
//!
//! - **`application`** – Device and transport contracts, replies, registry.
//! - **`infrastructure`** – Channels, the message protocol loop, the TCP,
//!   UDP and serial transports, config file loading.
//! - **`devices`** – Built-in demo devices.
//! - **`server`** – Builds devices from a config and runs them.
//! - **`testing`** – In-process server handle for tests.

pub mod application;
pub mod devices;
pub mod infrastructure;
pub mod server;
pub mod testing;

pub use application::device::{Device, DeviceError, DeviceSettings, Peer};
pub use application::registry::Registry;
pub use application::reply::Reply;
pub use server::{DeviceInstance, DeviceState, Server, ServerError};
