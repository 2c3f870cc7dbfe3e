//! Device replies: nothing, one buffer, or a lazily produced sequence.
//!
//! # Why a stream? (for beginners)
//!
//! Most commands get exactly one answer.  Some instruments, however, keep a
//! connection open across a long operation and push partial results as they
//! become available: an acquisition might send one frame per integration
//! period and a final `DONE`.  A [`Reply::Stream`] models that as a
//! [`Stream`] of byte buffers.  The protocol loop pulls one item at a time
//! and writes it before pulling the next, so a slow producer is paced by the
//! connection and nothing is buffered up front.
//!
//! Devices build streams either with a combinator
//! ([`futures_util::stream::unfold`], [`Reply::iter`]) or by spawning a
//! producer that writes into a bounded [`Reply::channel`].

use std::fmt;

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;

use super::device::DeviceError;

/// One item of a streamed reply.
pub type ReplyItem = Result<Vec<u8>, DeviceError>;

/// Boxed stream of reply buffers.
pub type ReplyStream = BoxStream<'static, ReplyItem>;

/// What a device returns for one message.
#[derive(Default)]
pub enum Reply {
    /// Nothing is written back.
    #[default]
    None,
    /// One buffer is written back.
    Single(Vec<u8>),
    /// Every item is written back in order as it is produced.  An `Err` item
    /// ends the reply and closes the connection.
    Stream(ReplyStream),
}

impl Reply {
    /// A single-buffer reply.
    pub fn single(data: impl Into<Vec<u8>>) -> Self {
        Reply::Single(data.into())
    }

    /// A streamed reply from any `Send` stream.
    pub fn stream<S>(items: S) -> Self
    where
        S: Stream<Item = ReplyItem> + Send + 'static,
    {
        Reply::Stream(items.boxed())
    }

    /// A streamed reply from buffers that are already known.
    pub fn iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
        I::IntoIter: Send + 'static,
    {
        Reply::stream(stream::iter(items.into_iter().map(Ok)))
    }

    /// A streamed reply fed through a bounded channel.
    ///
    /// The sender blocks once `capacity` buffers are waiting, which keeps a
    /// fast producer in step with the connection.  The reply ends when every
    /// sender is dropped.
    pub fn channel(capacity: usize) -> (ReplySender, Reply) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let items = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        (ReplySender { tx }, Reply::stream(items))
    }

    /// Returns `true` for [`Reply::None`].
    pub fn is_none(&self) -> bool {
        matches!(self, Reply::None)
    }

    /// Flattens any reply into a stream of buffers.
    pub fn into_stream(self) -> ReplyStream {
        match self {
            Reply::None => stream::empty().boxed(),
            Reply::Single(data) => stream::once(async move { Ok(data) }).boxed(),
            Reply::Stream(items) => items,
        }
    }
}

impl From<Vec<u8>> for Reply {
    fn from(data: Vec<u8>) -> Self {
        Reply::Single(data)
    }
}

impl From<&[u8]> for Reply {
    fn from(data: &[u8]) -> Self {
        Reply::Single(data.to_vec())
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Reply::Single(text.as_bytes().to_vec())
    }
}

impl From<Option<Vec<u8>>> for Reply {
    fn from(data: Option<Vec<u8>>) -> Self {
        data.map_or(Reply::None, Reply::Single)
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::None => f.write_str("Reply::None"),
            Reply::Single(data) => f
                .debug_tuple("Reply::Single")
                .field(&String::from_utf8_lossy(data))
                .finish(),
            Reply::Stream(_) => f.write_str("Reply::Stream(..)"),
        }
    }
}

/// Producer half of [`Reply::channel`].
#[derive(Clone)]
pub struct ReplySender {
    tx: mpsc::Sender<ReplyItem>,
}

impl ReplySender {
    /// Queues one buffer, waiting while the channel is full.
    ///
    /// Fails with [`DeviceError::ReplyClosed`] once the connection has gone
    /// away; producers should stop at that point.
    pub async fn send(&self, data: impl Into<Vec<u8>>) -> Result<(), DeviceError> {
        self.tx
            .send(Ok(data.into()))
            .await
            .map_err(|_| DeviceError::ReplyClosed)
    }

    /// Ends the reply with an error, which closes the connection.
    pub async fn fail(&self, error: DeviceError) {
        let _ = self.tx.send(Err(error)).await;
    }

    /// Returns `true` once the consuming side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
