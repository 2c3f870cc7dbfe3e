//! Application layer: the contracts between devices, transports and the
//! server.
//!
//! Nothing in this layer opens a socket or a file.  It defines the seams
//! (`Device`, `Transport`) as traits so the infrastructure can implement
//! them and tests can replace them with recording doubles.
//!
//! # Sub-modules
//!
//! - **`device`**    – The device trait, its settings and option helpers.
//! - **`reply`**     – Zero, one or a stream of reply buffers.
//! - **`transport`** – The transport trait and its error type.
//! - **`broadcast`** – Weak fan-out handle given to devices.
//! - **`registry`**  – Class name → constructor table.

pub mod broadcast;
pub mod device;
pub mod registry;
pub mod reply;
pub mod transport;
