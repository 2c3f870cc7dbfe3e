//! Message protocol: the per-channel decode → dispatch → reply loop.
//!
//! # State machine
//!
//! ```text
//!             ┌──────────────────────────────────────────┐
//!             ▼                                          │
//!   AwaitingBytes ──► HaveMessage ──► Dispatched ────────┘
//!        │
//!        └── EOF / read error / handler error ──► Closed
//! ```
//!
//! One [`MessageProtocol`] runs per channel.  Messages on a channel are
//! decoded, handled and answered strictly one after the other, so replies
//! never overtake each other.  Channels are independent of each other.
//!
//! # Dispatch
//!
//! [`dispatch`] is shared with the UDP transport, which has no persistent
//! channel.  It applies the baud-rate delay to the message, calls the
//! device, then pulls the reply stream one buffer at a time, delaying and
//! writing each before asking for the next.  If the device fails, either
//! up front or partway through a stream, nothing more is written and the
//! error is returned so the caller can close the channel.

use std::io;
use std::sync::{Arc, Weak};

use futures_util::StreamExt;
use labsim_core::{Framing, LineFramer};
use thiserror::Error;
use tracing::{debug, trace};

use crate::application::device::{Device, DeviceError, DeviceSettings, Peer};
use crate::application::reply::Reply;
use crate::infrastructure::channel::{ChannelReader, ChannelWriter, ReplySink};
use crate::infrastructure::delay::delay;

/// Error type for one protocol session.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Reading from or writing to the channel failed.
    #[error("channel I/O error: {0}")]
    Io(#[from] io::Error),

    /// The device failed to handle a message.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// The device was dropped while the channel was still open.
    #[error("device is gone")]
    DeviceGone,
}

/// Where a protocol session currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolState {
    AwaitingBytes,
    HaveMessage(Vec<u8>),
    Dispatched,
    Closed,
}

/// Decode/dispatch loop for one channel.
pub struct MessageProtocol {
    device: Weak<dyn Device>,
    settings: DeviceSettings,
    reader: ChannelReader,
    writer: ChannelWriter,
    peer: Peer,
    framer: LineFramer,
    state: ProtocolState,
}

impl MessageProtocol {
    pub fn new(
        device: Weak<dyn Device>,
        settings: DeviceSettings,
        reader: ChannelReader,
        writer: ChannelWriter,
        peer: Peer,
    ) -> Self {
        let framer = settings.framer();
        Self {
            device,
            settings,
            reader,
            writer,
            peer,
            framer,
            state: ProtocolState::AwaitingBytes,
        }
    }

    pub fn state(&self) -> &ProtocolState {
        &self.state
    }

    /// Greets the peer, then handles messages until the channel closes.
    ///
    /// Returns `Ok` on a clean end of stream.  Any error also leaves the
    /// session in [`ProtocolState::Closed`].
    pub async fn run(&mut self) -> Result<(), ProtocolError> {
        let result = self.run_inner().await;
        self.state = ProtocolState::Closed;
        if !self.framer.pending().is_empty() {
            debug!(
                peer = %self.peer,
                "dropping {} unterminated bytes",
                self.framer.pending().len()
            );
            self.framer.reset();
        }
        result
    }

    async fn run_inner(&mut self) -> Result<(), ProtocolError> {
        let device = self.device()?;
        let greeting = device.on_connection(&self.peer).await?;
        drop(device);
        send_reply(greeting, self.settings.baudrate, &self.writer).await?;

        loop {
            self.state = ProtocolState::AwaitingBytes;
            let Some(message) = self.next_message().await? else {
                return Ok(());
            };
            trace!(peer = %self.peer, "received {:?}", String::from_utf8_lossy(&message));

            self.state = ProtocolState::HaveMessage(message.clone());
            let device = self.device()?;
            dispatch(&device, &message, self.settings.baudrate, &self.writer).await?;
            self.state = ProtocolState::Dispatched;
        }
    }

    fn device(&self) -> Result<Arc<dyn Device>, ProtocolError> {
        self.device.upgrade().ok_or(ProtocolError::DeviceGone)
    }

    /// Reads the next message according to the framing discipline.  `None`
    /// means end of stream.
    async fn next_message(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        match self.settings.framing {
            Framing::Raw { chunk_size } => {
                let chunk = self.reader.read_available(chunk_size).await?;
                Ok((!chunk.is_empty()).then_some(chunk))
            }
            Framing::Line if self.framer.is_fast_path() => loop {
                match self.reader.read_line(b"\n").await? {
                    None => return Ok(None),
                    Some(line) if line.is_empty() => continue,
                    Some(line) => return Ok(Some(line)),
                }
            },
            Framing::Line => loop {
                let Some(byte) = self.reader.read_byte().await? else {
                    return Ok(None);
                };
                if let Some(message) = self.framer.push_byte(byte) {
                    return Ok(Some(message));
                }
            },
        }
    }
}

/// Delays for the message, hands it to the device and writes every reply
/// buffer to `sink` in order.
pub async fn dispatch(
    device: &Arc<dyn Device>,
    message: &[u8],
    baudrate: Option<u32>,
    sink: &dyn ReplySink,
) -> Result<(), ProtocolError> {
    delay(message.len(), baudrate).await;
    let reply = device.handle_message(message).await?;
    send_reply(reply, baudrate, sink).await
}

async fn send_reply(
    reply: Reply,
    baudrate: Option<u32>,
    sink: &dyn ReplySink,
) -> Result<(), ProtocolError> {
    if reply.is_none() {
        return Ok(());
    }
    let mut items = reply.into_stream();
    while let Some(item) = items.next().await {
        let data = item?;
        if data.is_empty() {
            continue;
        }
        delay(data.len(), baudrate).await;
        sink.send(&data).await?;
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::reply::Reply;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio_test::io::Builder;

    /// Device double: records messages and answers from a script.
    struct ScriptedDevice {
        settings: DeviceSettings,
        received: Mutex<Vec<Vec<u8>>>,
        greeting: Option<&'static str>,
    }

    impl ScriptedDevice {
        fn new(settings: DeviceSettings) -> Arc<Self> {
            Arc::new(Self {
                settings,
                received: Mutex::new(Vec::new()),
                greeting: None,
            })
        }

        fn received(&self) -> Vec<Vec<u8>> {
            self.received.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Device for ScriptedDevice {
        fn name(&self) -> &str {
            "scripted"
        }

        fn settings(&self) -> &DeviceSettings {
            &self.settings
        }

        async fn handle_message(&self, message: &[u8]) -> Result<Reply, DeviceError> {
            self.received.lock().unwrap().push(message.to_vec());
            match message {
                b"PING" => Ok(Reply::single("PONG")),
                b"MULTI" => Ok(Reply::iter(vec![b"1;".to_vec(), b"2;".to_vec()])),
                b"BROKEN" => Ok(Reply::stream(futures_util::stream::iter(vec![
                    Ok(b"partial;".to_vec()),
                    Err(DeviceError::Command("boom".into())),
                    Ok(b"never".to_vec()),
                ]))),
                b"FAIL" => Err(DeviceError::Command("fail".into())),
                _ => Ok(Reply::None),
            }
        }

        async fn on_connection(&self, _peer: &Peer) -> Result<Reply, DeviceError> {
            Ok(self.greeting.map_or(Reply::None, Reply::from))
        }
    }

    fn protocol(device: &Arc<ScriptedDevice>, mock: tokio_test::io::Mock) -> MessageProtocol {
        let (read, write) = tokio::io::split(mock);
        let weak: Weak<dyn Device> = Arc::downgrade(device) as Weak<dyn Device>;
        MessageProtocol::new(
            weak,
            device.settings.clone(),
            ChannelReader::new(read),
            ChannelWriter::new(write),
            Peer::Tcp("127.0.0.1:1".parse().unwrap()),
        )
    }

    #[tokio::test]
    async fn test_ping_gets_pong_without_terminator() {
        // Arrange
        let device = ScriptedDevice::new(DeviceSettings::default());
        let mock = Builder::new().read(b"PING\n").write(b"PONG").build();
        let mut session = protocol(&device, mock);

        // Act
        session.run().await.expect("clean close");

        // Assert
        assert_eq!(device.received(), vec![b"PING".to_vec()]);
        assert_eq!(session.state(), &ProtocolState::Closed);
    }

    #[tokio::test]
    async fn test_two_messages_in_one_read_are_handled_in_order() {
        let device = ScriptedDevice::new(DeviceSettings::default());
        let mock = Builder::new().read(b"A\nB\n").build();
        let mut session = protocol(&device, mock);

        session.run().await.expect("clean close");

        assert_eq!(device.received(), vec![b"A".to_vec(), b"B".to_vec()]);
    }

    #[tokio::test]
    async fn test_fast_path_skips_empty_lines() {
        let device = ScriptedDevice::new(DeviceSettings::default());
        let mock = Builder::new().read(b"\n\nX\n").build();
        let mut session = protocol(&device, mock);

        session.run().await.expect("clean close");

        assert_eq!(device.received(), vec![b"X".to_vec()]);
    }

    #[tokio::test]
    async fn test_special_message_with_custom_terminator() {
        // Arrange
        let settings = DeviceSettings::line("\r").with_special_message("S");
        let device = ScriptedDevice::new(settings);
        let mock = Builder::new().read(b"S").read(b"RANGE\r").build();
        let mut session = protocol(&device, mock);

        // Act
        session.run().await.expect("clean close");

        // Assert
        assert_eq!(device.received(), vec![b"S".to_vec(), b"RANGE".to_vec()]);
    }

    #[tokio::test]
    async fn test_partial_trailing_message_is_dropped() {
        let settings = DeviceSettings::line("\r");
        let device = ScriptedDevice::new(settings);
        let mock = Builder::new().read(b"ONE\rTW").build();
        let mut session = protocol(&device, mock);

        session.run().await.expect("clean close");

        assert_eq!(device.received(), vec![b"ONE".to_vec()]);
    }

    #[tokio::test]
    async fn test_raw_framing_one_message_per_read() {
        let device = ScriptedDevice::new(DeviceSettings::raw(4096));
        let mock = Builder::new().read(b"\x01\x02").read(b"\n\x03").build();
        let mut session = protocol(&device, mock);

        session.run().await.expect("clean close");

        assert_eq!(
            device.received(),
            vec![b"\x01\x02".to_vec(), b"\n\x03".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_streamed_reply_written_item_by_item() {
        let device = ScriptedDevice::new(DeviceSettings::default());
        let mock = Builder::new().read(b"MULTI\n").write(b"1;").write(b"2;").build();
        let mut session = protocol(&device, mock);

        session.run().await.expect("clean close");
    }

    #[tokio::test]
    async fn test_error_mid_stream_stops_writing_and_closes() {
        // Arrange: only the first item may reach the wire.
        let device = ScriptedDevice::new(DeviceSettings::default());
        let mock = Builder::new().read(b"BROKEN\n").write(b"partial;").build();
        let mut session = protocol(&device, mock);

        // Act
        let result = session.run().await;

        // Assert
        assert!(matches!(result, Err(ProtocolError::Device(_))));
        assert_eq!(session.state(), &ProtocolState::Closed);
    }

    #[tokio::test]
    async fn test_handler_error_closes_without_reply() {
        let device = ScriptedDevice::new(DeviceSettings::default());
        let mock = Builder::new().read(b"FAIL\nPING\n").build();
        let mut session = protocol(&device, mock);

        let result = session.run().await;

        assert!(matches!(result, Err(ProtocolError::Device(_))));
        assert_eq!(device.received(), vec![b"FAIL".to_vec()]);
    }

    #[tokio::test]
    async fn test_greeting_written_before_first_read() {
        let device = Arc::new(ScriptedDevice {
            settings: DeviceSettings::default(),
            received: Mutex::new(Vec::new()),
            greeting: Some("HELLO\n"),
        });
        let mock = Builder::new().write(b"HELLO\n").read(b"PING\n").write(b"PONG").build();
        let mut session = protocol(&device, mock);

        session.run().await.expect("clean close");
    }

    #[tokio::test]
    async fn test_dropped_device_closes_session() {
        let device = ScriptedDevice::new(DeviceSettings::default());
        let mock = Builder::new().build();
        let mut session = protocol(&device, mock);
        drop(device);

        let result = session.run().await;

        assert!(matches!(result, Err(ProtocolError::DeviceGone)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_baudrate_delays_message_and_reply() {
        // Arrange: 4 bytes in and 4 bytes out at 100 baud (10 bytes/s).
        let settings = DeviceSettings::default().with_baudrate(Some(100));
        let device = ScriptedDevice::new(settings);
        let mock = Builder::new().read(b"PING\n").write(b"PONG").build();
        let mut session = protocol(&device, mock);
        let start = tokio::time::Instant::now();

        // Act
        session.run().await.expect("clean close");

        // Assert
        let elapsed = start.elapsed();
        assert!(elapsed >= std::time::Duration::from_millis(800), "{elapsed:?}");
    }
}
