//! Infrastructure layer: everything that touches sockets, pseudo-terminals,
//! timers or files.
//!
//! # Sub-modules
//!
//! - **`channel`**     – Async reader/writer wrappers around one byte channel.
//! - **`protocol`**    – Per-channel decode → dispatch → reply loop.
//! - **`connections`** – Open-connection table used for broadcast.
//! - **`delay`**       – Baud-rate emulation on the async clock.
//! - **`tcp`** / **`udp`** / **`serial`** – The three transports.
//! - **`factory`**     – Config entry → transport.
//! - **`storage`**     – Config file loading.

pub mod channel;
pub mod connections;
pub mod delay;
pub mod factory;
pub mod protocol;
#[cfg(unix)]
pub mod serial;
pub mod storage;
pub mod tcp;
pub mod udp;
