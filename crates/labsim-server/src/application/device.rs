//! The device contract: what a simulated instrument implements.
//!
//! A device is constructed from a name and a free-form option map, then
//! handed to one or more transports.  Every decoded message from any of
//! those transports ends up in [`Device::handle_message`], possibly from
//! several connections at once, so implementations keep their mutable state
//! behind a mutex (or a task they talk to over a channel).
//!
//! # Minimal device
//!
//! ```rust
//! use async_trait::async_trait;
//! use labsim_server::application::device::{Device, DeviceError, DeviceSettings};
//! use labsim_server::application::reply::Reply;
//!
//! struct Pong {
//!     name: String,
//!     settings: DeviceSettings,
//! }
//!
//! #[async_trait]
//! impl Device for Pong {
//!     fn name(&self) -> &str {
//!         &self.name
//!     }
//!
//!     fn settings(&self) -> &DeviceSettings {
//!         &self.settings
//!     }
//!
//!     async fn handle_message(&self, message: &[u8]) -> Result<Reply, DeviceError> {
//!         Ok(if message == b"PING" { Reply::single("PONG") } else { Reply::None })
//!     }
//! }
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use async_trait::async_trait;
use labsim_core::{Framing, LineFramer, Options};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use super::broadcast::Broadcaster;
use super::reply::Reply;

/// Error type for device construction and message handling.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// An option has the wrong type or an out-of-range value.
    #[error("invalid option {key:?}: {reason}")]
    InvalidOption { key: String, reason: String },

    /// The device cannot process this message.  Ends the connection.
    #[error("cannot handle message: {0}")]
    Command(String),

    /// The consumer of a streamed reply has gone away.
    #[error("reply consumer closed")]
    ReplyClosed,

    /// An I/O operation performed by the device failed.
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Framing and timing parameters of a device.
///
/// Transports copy these at construction and may override the newline and
/// baud rate per transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSettings {
    /// Message terminator for line framing.
    pub newline: Vec<u8>,
    /// Emulated line speed in bits per second; `None` disables the delay.
    pub baudrate: Option<u32>,
    /// Tokens emitted as messages the moment they are complete, without a
    /// terminator.
    pub special_messages: BTreeSet<Vec<u8>>,
    pub framing: Framing,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            newline: b"\n".to_vec(),
            baudrate: None,
            special_messages: BTreeSet::new(),
            framing: Framing::Line,
        }
    }
}

impl DeviceSettings {
    /// Line-framed settings with the given terminator.
    pub fn line(newline: impl Into<Vec<u8>>) -> Self {
        Self {
            newline: newline.into(),
            ..Self::default()
        }
    }

    /// Raw-chunk settings.
    pub fn raw(chunk_size: usize) -> Self {
        Self {
            framing: Framing::Raw { chunk_size },
            ..Self::default()
        }
    }

    pub fn with_special_message(mut self, message: impl Into<Vec<u8>>) -> Self {
        self.special_messages.insert(message.into());
        self
    }

    pub fn with_baudrate(mut self, baudrate: Option<u32>) -> Self {
        self.baudrate = baudrate;
        self
    }

    /// Removes the `newline` and `baudrate` keys from `options` and applies
    /// them.
    pub fn apply_options(&mut self, options: &mut Options) -> Result<(), DeviceError> {
        if let Some(value) = options.remove("newline") {
            let newline = take_string(&value, "newline")?;
            if newline.is_empty() {
                return Err(DeviceError::InvalidOption {
                    key: "newline".to_string(),
                    reason: "must not be empty".to_string(),
                });
            }
            self.newline = newline.into_bytes();
        }
        if let Some(value) = options.remove("baudrate") {
            self.baudrate = match value {
                Value::Null => None,
                other => Some(take_u32(&other, "baudrate")?),
            };
        }
        Ok(())
    }

    /// Applies per-transport overrides on a copy of these settings.
    pub fn overridden(&self, baudrate: Option<u32>, newline: Option<&str>) -> Self {
        let mut settings = self.clone();
        if let Some(baudrate) = baudrate {
            settings.baudrate = Some(baudrate);
        }
        if let Some(newline) = newline {
            settings.newline = newline.as_bytes().to_vec();
        }
        settings
    }

    /// A fresh framer for one connection.
    pub fn framer(&self) -> LineFramer {
        LineFramer::new(self.newline.clone(), self.special_messages.iter().cloned())
    }
}

/// Who is on the other end of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Peer {
    Tcp(SocketAddr),
    Udp(SocketAddr),
    /// The serial link path clients open.
    Serial(PathBuf),
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::Tcp(addr) => write!(f, "tcp://{addr}"),
            Peer::Udp(addr) => write!(f, "udp://{addr}"),
            Peer::Serial(path) => write!(f, "serial://{}", path.display()),
        }
    }
}

/// A simulated instrument.
///
/// Transports hold only a weak reference to the device; the server owns it.
#[async_trait]
pub trait Device: Send + Sync {
    /// Unique device name.
    fn name(&self) -> &str;

    /// Default framing and timing for this device's transports.
    fn settings(&self) -> &DeviceSettings;

    /// Handles one decoded message.  The message never includes the
    /// terminator.  An error closes the connection it came from.
    async fn handle_message(&self, message: &[u8]) -> Result<Reply, DeviceError>;

    /// Called once per new connection, before any message is read.  The
    /// reply is written to that connection only.
    async fn on_connection(&self, _peer: &Peer) -> Result<Reply, DeviceError> {
        Ok(Reply::None)
    }

    /// Receives a handle for pushing messages to every connection of every
    /// transport of this device.  Called once after the transports are
    /// bound.
    fn attach(&self, _broadcaster: Broadcaster) {}

    /// Cancels background activity.  Called once when the server stops.
    async fn shutdown(&self) {}
}

// ── Option helpers ────────────────────────────────────────────────────────────

/// Logs a warning for every option the device did not consume.
pub fn warn_unused_options(device: &str, options: &Options) {
    for key in options.keys() {
        warn!(device = %device, "ignoring unknown option {key:?}");
    }
}

/// Removes `key` and reads it as a string.
pub fn pop_string(options: &mut Options, key: &str) -> Result<Option<String>, DeviceError> {
    options
        .remove(key)
        .map(|value| take_string(&value, key))
        .transpose()
}

/// Removes `key` and reads it as a non-negative number of seconds.
pub fn pop_seconds(options: &mut Options, key: &str) -> Result<Option<f64>, DeviceError> {
    options
        .remove(key)
        .map(|value| match value.as_f64() {
            Some(secs) if secs.is_finite() && secs >= 0.0 => Ok(secs),
            _ => Err(DeviceError::InvalidOption {
                key: key.to_string(),
                reason: format!("expected a non-negative number, got {value}"),
            }),
        })
        .transpose()
}

fn take_string(value: &Value, key: &str) -> Result<String, DeviceError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| DeviceError::InvalidOption {
            key: key.to_string(),
            reason: format!("expected a string, got {value}"),
        })
}

fn take_u32(value: &Value, key: &str) -> Result<u32, DeviceError> {
    value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| DeviceError::InvalidOption {
            key: key.to_string(),
            reason: format!("expected an unsigned integer, got {value}"),
        })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(value: Value) -> Options {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_default_settings_use_newline_terminator() {
        let settings = DeviceSettings::default();
        assert_eq!(settings.newline, b"\n");
        assert_eq!(settings.baudrate, None);
        assert!(settings.framer().is_fast_path());
    }

    #[test]
    fn test_apply_options_consumes_newline_and_baudrate() {
        // Arrange
        let mut settings = DeviceSettings::default();
        let mut opts = options(json!({"newline": "\r", "baudrate": 9600, "period": 1}));

        // Act
        settings.apply_options(&mut opts).expect("valid options");

        // Assert
        assert_eq!(settings.newline, b"\r");
        assert_eq!(settings.baudrate, Some(9600));
        assert_eq!(opts.len(), 1);
        assert!(opts.contains_key("period"));
    }

    #[test]
    fn test_apply_options_rejects_negative_baudrate() {
        let mut settings = DeviceSettings::default();
        let mut opts = options(json!({"baudrate": -1}));
        let err = settings.apply_options(&mut opts).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidOption { ref key, .. } if key == "baudrate"));
    }

    #[test]
    fn test_apply_options_rejects_empty_newline() {
        let mut settings = DeviceSettings::default();
        let mut opts = options(json!({"newline": ""}));
        assert!(settings.apply_options(&mut opts).is_err());
    }

    #[test]
    fn test_overridden_replaces_only_given_fields() {
        // Arrange
        let base = DeviceSettings::line("\r").with_baudrate(Some(9600));

        // Act
        let tcp = base.overridden(None, Some("\n"));
        let serial = base.overridden(Some(115_200), None);

        // Assert
        assert_eq!(tcp.newline, b"\n");
        assert_eq!(tcp.baudrate, Some(9600));
        assert_eq!(serial.newline, b"\r");
        assert_eq!(serial.baudrate, Some(115_200));
    }

    #[test]
    fn test_framer_carries_special_messages() {
        let settings = DeviceSettings::line("\r").with_special_message("S");
        let mut framer = settings.framer();
        assert_eq!(framer.push(b"S"), vec![b"S".to_vec()]);
    }

    #[test]
    fn test_pop_seconds_validates() {
        let mut opts = options(json!({"period": 0.25, "bad": "x"}));
        assert_eq!(pop_seconds(&mut opts, "period").expect("valid"), Some(0.25));
        assert!(pop_seconds(&mut opts, "bad").is_err());
        assert_eq!(pop_seconds(&mut opts, "missing").expect("absent"), None);
    }

    #[test]
    fn test_peer_display() {
        let peer = Peer::Tcp("127.0.0.1:5000".parse().expect("valid addr"));
        assert_eq!(peer.to_string(), "tcp://127.0.0.1:5000");
    }
}
