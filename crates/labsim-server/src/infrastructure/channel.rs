//! Channels: the byte-level read and write halves of one connection.
//!
//! A TCP socket, the master side of a pseudo-terminal and a scripted test
//! mock all look the same from here: an `AsyncRead` wrapped in a buffered
//! [`ChannelReader`] and an `AsyncWrite` wrapped in a cloneable
//! [`ChannelWriter`].  The writer is shared between the connection's own
//! protocol loop and the transport's broadcast, so writes go through a mutex
//! and never interleave mid-buffer.
//!
//! UDP has no stream to wrap; its replies go through [`ReplySink`] directly.

use std::io;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

type BoxedRead = Pin<Box<dyn AsyncRead + Send>>;
type BoxedWrite = Pin<Box<dyn AsyncWrite + Send>>;

/// Destination for reply buffers.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Writes the whole buffer.
    async fn send(&self, data: &[u8]) -> io::Result<()>;
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// Buffered read side of a channel.
pub struct ChannelReader {
    inner: BufReader<BoxedRead>,
}

impl ChannelReader {
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self {
            inner: BufReader::new(Box::pin(reader)),
        }
    }

    /// Reads exactly `n` bytes.  Returns `None` if the peer closes first; the
    /// bytes read so far are discarded.
    pub async fn read_exact(&mut self, n: usize) -> io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; n];
        match self.inner.read_exact(&mut buf).await {
            Ok(_) => Ok(Some(buf)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Returns whatever is available, up to `max` bytes, waiting for at
    /// least one.  An empty result means end of stream.
    ///
    /// Once the internal buffer is drained, bytes go straight from the
    /// source into a `max`-sized buffer: one call is at most one underlying
    /// read and nothing is held over for the next call.
    pub async fn read_available(&mut self, max: usize) -> io::Result<Vec<u8>> {
        let max = max.max(1);
        let buffered = self.inner.buffer();
        if !buffered.is_empty() {
            let take = buffered.len().min(max);
            let data = buffered[..take].to_vec();
            self.inner.consume(take);
            return Ok(data);
        }

        let mut data = vec![0u8; max];
        let n = self.inner.get_mut().read(&mut data).await?;
        data.truncate(n);
        Ok(data)
    }

    /// Reads one byte, or `None` at end of stream.
    pub async fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let available = self.inner.fill_buf().await?;
        let Some(&byte) = available.first() else {
            return Ok(None);
        };
        self.inner.consume(1);
        Ok(Some(byte))
    }

    /// Reads up to and including `terminator` and returns the line without
    /// it.  Returns `None` at end of stream; an unterminated trailing line is
    /// dropped.
    pub async fn read_line(&mut self, terminator: &[u8]) -> io::Result<Option<Vec<u8>>> {
        let Some(&last) = terminator.last() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty line terminator",
            ));
        };

        let mut line = Vec::new();
        loop {
            let n = self.inner.read_until(last, &mut line).await?;
            if n == 0 || line.last() != Some(&last) {
                return Ok(None);
            }
            if line.ends_with(terminator) {
                line.truncate(line.len() - terminator.len());
                return Ok(Some(line));
            }
        }
    }
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// Shared write side of a channel.
#[derive(Clone)]
pub struct ChannelWriter {
    inner: Arc<Mutex<BoxedWrite>>,
}

impl ChannelWriter {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Box::pin(writer))),
        }
    }

    /// Writes and flushes the whole buffer.
    pub async fn write(&self, data: &[u8]) -> io::Result<()> {
        let mut writer = self.inner.lock().await;
        writer.write_all(data).await?;
        writer.flush().await
    }

    /// Shuts the write direction down.
    pub async fn shutdown(&self) -> io::Result<()> {
        self.inner.lock().await.shutdown().await
    }
}

#[async_trait]
impl ReplySink for ChannelWriter {
    async fn send(&self, data: &[u8]) -> io::Result<()> {
        self.write(data).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
