//! Device-level broadcast handle.
//!
//! A device does not own its transports directly (the server does), so it
//! cannot reach them to push unsolicited data.  Instead the server hands it a
//! [`Broadcaster`] holding weak references to those transports.  A transport
//! that has been dropped is skipped silently.

use std::fmt;
use std::sync::{Arc, Weak};

use tracing::trace;

use super::transport::Transport;

/// Fans a message out to every channel of every transport of one device.
#[derive(Clone, Default)]
pub struct Broadcaster {
    targets: Vec<Weak<dyn Transport>>,
}

impl Broadcaster {
    pub fn new(transports: &[Arc<dyn Transport>]) -> Self {
        Self {
            targets: transports.iter().map(Arc::downgrade).collect(),
        }
    }

    /// Number of transports this handle reaches (live or not).
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Writes `data` to every open channel.
    pub async fn broadcast(&self, data: &[u8]) {
        for target in &self.targets {
            match target.upgrade() {
                Some(transport) => transport.broadcast(data).await,
                None => trace!("broadcast target dropped"),
            }
        }
    }
}

impl fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcaster")
            .field("targets", &self.targets.len())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::transport::TransportError;
    use async_trait::async_trait;
    use labsim_core::TransportKind;
    use std::sync::Mutex;

    /// Transport double recording every broadcast.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        fn kind(&self) -> TransportKind {
            TransportKind::Tcp
        }
        fn address(&self) -> String {
            "test".to_string()
        }
        async fn start(&self) -> Result<(), TransportError> {
            Ok(())
        }
        async fn serve_forever(&self) -> Result<(), TransportError> {
            Ok(())
        }
        async fn stop(&self) -> Result<(), TransportError> {
            Ok(())
        }
        async fn broadcast(&self, data: &[u8]) {
            self.sent.lock().unwrap().push(data.to_vec());
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_live_transport() {
        // Arrange
        let a = Arc::new(RecordingTransport::default());
        let b = Arc::new(RecordingTransport::default());
        let transports: Vec<Arc<dyn Transport>> = vec![a.clone(), b.clone()];
        let broadcaster = Broadcaster::new(&transports);

        // Act
        broadcaster.broadcast(b"EVT\n").await;

        // Assert
        assert_eq!(*a.sent.lock().unwrap(), vec![b"EVT\n".to_vec()]);
        assert_eq!(*b.sent.lock().unwrap(), vec![b"EVT\n".to_vec()]);
    }

    #[tokio::test]
    async fn test_broadcast_skips_dropped_transport() {
        // Arrange
        let kept = Arc::new(RecordingTransport::default());
        let dropped: Arc<dyn Transport> = Arc::new(RecordingTransport::default());
        let broadcaster = Broadcaster::new(&[kept.clone() as Arc<dyn Transport>, dropped.clone()]);
        drop(dropped);

        // Act
        broadcaster.broadcast(b"x").await;

        // Assert
        assert_eq!(broadcaster.len(), 2);
        assert_eq!(kept.sent.lock().unwrap().len(), 1);
    }
}
