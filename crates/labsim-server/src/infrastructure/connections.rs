//! Open-connection table for stream transports.
//!
//! Every live TCP connection registers its writer here for the duration of
//! its task.  Registration returns a [`ConnectionGuard`]; dropping the guard
//! removes the entry.  Because the guard lives inside the connection task,
//! the entry disappears exactly once however the task ends: clean EOF, I/O
//! error, panic, or cancellation when the transport stops.
//!
//! Each registration gets its own id.  A guard only removes the entry it
//! created, so a stale guard for a reused address never evicts the newer
//! connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::infrastructure::channel::ChannelWriter;

struct Entry {
    id: u64,
    writer: ChannelWriter,
}

#[derive(Default)]
struct Table {
    entries: HashMap<SocketAddr, Entry>,
    next_id: u64,
}

/// Shared map of remote address → channel writer.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<Table>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        // A panic while holding the lock leaves the map itself consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a connection and returns the guard that removes it.
    pub fn register(&self, peer: SocketAddr, writer: ChannelWriter) -> ConnectionGuard {
        let mut table = self.table();
        let id = table.next_id;
        table.next_id += 1;
        if table.entries.insert(peer, Entry { id, writer }).is_some() {
            warn!("replaced stale connection entry for {peer}");
        }
        ConnectionGuard {
            registry: self.clone(),
            peer,
            id,
        }
    }

    pub fn len(&self) -> usize {
        self.table().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().entries.is_empty()
    }

    pub fn contains(&self, peer: &SocketAddr) -> bool {
        self.table().entries.contains_key(peer)
    }

    /// Writes `data` to every registered connection.  A failure on one
    /// connection is logged and the rest still receive the data.
    pub async fn broadcast(&self, data: &[u8]) {
        let targets: Vec<(SocketAddr, ChannelWriter)> = self
            .table()
            .entries
            .iter()
            .map(|(peer, entry)| (*peer, entry.writer.clone()))
            .collect();

        for (peer, writer) in targets {
            if let Err(e) = writer.write(data).await {
                warn!("broadcast to {peer} failed: {e}");
            }
        }
    }

    fn remove(&self, peer: &SocketAddr, id: u64) {
        let mut table = self.table();
        if table.entries.get(peer).is_some_and(|entry| entry.id == id) {
            table.entries.remove(peer);
            debug!("unregistered connection {peer}");
        }
    }
}

/// Removes its connection from the registry when dropped.
pub struct ConnectionGuard {
    registry: ConnectionRegistry,
    peer: SocketAddr,
    id: u64,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.peer, self.id);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
