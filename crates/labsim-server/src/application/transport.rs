//! The transport contract: a listening endpoint bound to one device.
//!
//! Three implementations live in `infrastructure`: TCP (one task per
//! accepted connection), UDP (one short task per datagram) and serial (one
//! long-lived session on the master side of a pseudo-terminal).
//!
//! # Lifecycle
//!
//! ```text
//!   new ──► start ──► serve_forever ──► stop
//!            │                           ▲
//!            └───────────────────────────┘
//! ```
//!
//! `start` acquires the OS resources (listening socket, pty pair, symlink)
//! and is idempotent.  `serve_forever` runs until `stop` is called from
//! another task.  `stop` cancels every connection task, releases every OS
//! resource and is idempotent too.

use std::net::SocketAddr;
use std::path::PathBuf;

use async_trait::async_trait;
use labsim_core::{AddressError, TransportKind};
use thiserror::Error;

/// Error type for transport lifecycle operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The listening address could not be bound.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The configured address is malformed.
    #[error("invalid address: {0}")]
    Address(#[from] AddressError),

    /// The URL form does not fit the transport type.
    #[error("invalid url for this transport: {0}")]
    InvalidUrl(String),

    /// The pseudo-terminal pair could not be opened or configured.
    #[error("pseudo-terminal error: {0}")]
    Pty(#[source] std::io::Error),

    /// The stable serial link could not be created or removed.
    #[error("symlink {path}: {source}")]
    Link {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `serve_forever` was called on a transport that has been stopped.
    #[error("transport has been stopped")]
    Stopped,

    /// The transport type is not available on this platform.
    #[error("{0} transport is not supported on this platform")]
    Unsupported(TransportKind),

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A listening endpoint serving one device.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// The configured address (`host:port`) or serial link path.
    fn address(&self) -> String;

    /// The bound socket address once started (TCP/UDP only).
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// The pseudo-terminal device name once started (serial only).
    fn tty_name(&self) -> Option<PathBuf> {
        None
    }

    /// Number of currently open channels.
    fn connection_count(&self) -> usize {
        0
    }

    /// Acquires OS resources.  Calling it again is a no-op.
    async fn start(&self) -> Result<(), TransportError>;

    /// Serves until [`stop`](Self::stop) is called.  Starts first if needed.
    async fn serve_forever(&self) -> Result<(), TransportError>;

    /// Cancels connection tasks and releases OS resources.  Calling it again
    /// is a no-op.
    async fn stop(&self) -> Result<(), TransportError>;

    /// Writes `data` to every open channel.  Failures on one channel are
    /// logged and do not affect the others.
    async fn broadcast(&self, data: &[u8]);
}
