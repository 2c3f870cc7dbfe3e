//! Declarative device list.
//!
//! The simulator is driven by a list of device entries, each naming the
//! device class to instantiate and the transports it should listen on.  The
//! same schema is accepted from TOML, JSON or YAML; loading the file is the
//! server's job, this module only defines the shape.
//!
//! ```yaml
//! devices:
//! - class: Streamer
//!   package: labsim
//!   name: ah501d
//!   period: 0.1
//!   transports:
//!   - type: serial
//!     url: /tmp/labsim/ah501d
//!     baudrate: 9600
//!   - type: tcp
//!     url: ":9001"
//! ```
//!
//! Every key of a device entry other than `class`, `name`, `module`,
//! `package` and `transports` is collected into the free-form
//! [`DeviceEntry::options`] map and handed to the device constructor.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::address::{AddressError, BindAddress};

/// Free-form device options (`period`, `greeting`, `newline`, ...).
pub type Options = serde_json::Map<String, Value>;

/// Error type for semantic validation of a device entry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A `devices` element does not match the entry schema (unknown
    /// transport type, missing `class` or `url`, out-of-range number).
    #[error("device entry {index} ({device}): {reason}")]
    MalformedEntry {
        index: usize,
        device: String,
        reason: String,
    },

    /// The `class` key is empty.
    #[error("device entry has an empty class")]
    EmptyClass,

    /// Two entries resolve to the same device name.
    #[error("duplicate device name {0:?}")]
    DuplicateDevice(String),

    /// A transport entry sets `newline` to the empty string.
    #[error("device {device:?}: transport {url} has an empty newline")]
    EmptyNewline { device: String, url: String },

    /// A TCP/UDP transport address could not be parsed.
    #[error("device {device:?}: {source}")]
    InvalidAddress {
        device: String,
        #[source]
        source: AddressError,
    },

    /// A serial transport was given a `[host, port]` pair.
    #[error("device {device:?}: serial transport needs a path, got {url}")]
    SerialNeedsPath { device: String, url: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration file contents.
///
/// Elements of `devices` are decoded one by one.  An element that does not
/// match the schema is recorded in [`rejected`](Self::rejected) and the
/// rest of the file still loads.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(from = "RawConfig")]
pub struct SimulatorConfig {
    /// Devices to create, in declaration order.
    pub devices: Vec<DeviceEntry>,
    /// Entries that failed to decode, in declaration order.
    #[serde(skip)]
    pub rejected: Vec<ConfigError>,
    /// Interactive backdoor settings.  Accepted for compatibility and
    /// otherwise ignored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backdoor: Option<Value>,
}

impl SimulatorConfig {
    pub fn new(devices: Vec<DeviceEntry>) -> Self {
        Self {
            devices,
            ..Self::default()
        }
    }
}

/// The file shape before individual device entries are decoded.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    devices: Vec<Value>,
    #[serde(default)]
    backdoor: Option<Value>,
}

impl From<RawConfig> for SimulatorConfig {
    fn from(raw: RawConfig) -> Self {
        let mut config = SimulatorConfig {
            backdoor: raw.backdoor,
            ..SimulatorConfig::default()
        };
        for (index, value) in raw.devices.into_iter().enumerate() {
            let device = entry_label(&value);
            match serde_json::from_value::<DeviceEntry>(value) {
                Ok(entry) => config.devices.push(entry),
                Err(e) => config.rejected.push(ConfigError::MalformedEntry {
                    index,
                    device,
                    reason: e.to_string(),
                }),
            }
        }
        config
    }
}

/// Best-effort name of an undecodable entry, for error messages.
fn entry_label(value: &Value) -> String {
    ["name", "class"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .unwrap_or("<unnamed>")
        .to_string()
}

/// One device to instantiate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceEntry {
    /// Device class name as registered in the plugin registry.
    pub class: String,
    /// Unique device name; defaults to `class`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Module the class lives in (narrows registry lookup).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// Package the class lives in (narrows registry lookup).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    /// Transports the device listens on.
    #[serde(default)]
    pub transports: Vec<TransportEntry>,
    /// Every other key, passed verbatim to the device constructor.
    #[serde(flatten)]
    pub options: Options,
}

impl DeviceEntry {
    /// Creates an entry for `class` with no transports and no options.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            name: None,
            module: None,
            package: None,
            transports: Vec::new(),
            options: Options::new(),
        }
    }

    /// Sets the device name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the package the class is looked up in.
    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    /// Adds a transport.
    pub fn with_transport(mut self, transport: TransportEntry) -> Self {
        self.transports.push(transport);
        self
    }

    /// Adds a free-form option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// The device name, falling back to the class name.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.class)
    }

    /// Checks everything that can be checked without the registry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.class.trim().is_empty() {
            return Err(ConfigError::EmptyClass);
        }
        for transport in &self.transports {
            transport.validate(self.name())?;
        }
        Ok(())
    }
}

/// Transport type of a [`TransportEntry`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Tcp,
    Udp,
    Serial,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Udp => "udp",
            TransportKind::Serial => "serial",
        };
        f.write_str(s)
    }
}

/// Where a transport listens: an address string, a serial path, or a
/// `[host, port]` pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum TransportUrl {
    Text(String),
    Pair(String, u16),
}

impl TransportUrl {
    /// Interprets the URL as a TCP/UDP bind address.
    pub fn bind_address(&self) -> Result<BindAddress, AddressError> {
        match self {
            TransportUrl::Text(text) => BindAddress::parse(text),
            TransportUrl::Pair(host, port) => Ok(BindAddress::new(host.clone(), *port)),
        }
    }

    /// Interprets the URL as a serial link path.
    pub fn as_path(&self) -> Option<&str> {
        match self {
            TransportUrl::Text(text) => Some(text),
            TransportUrl::Pair(..) => None,
        }
    }
}

impl std::fmt::Display for TransportUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportUrl::Text(text) => f.write_str(text),
            TransportUrl::Pair(host, port) => write!(f, "[{host:?}, {port}]"),
        }
    }
}

impl From<&str> for TransportUrl {
    fn from(text: &str) -> Self {
        TransportUrl::Text(text.to_string())
    }
}

/// One transport of a device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportEntry {
    #[serde(rename = "type", default)]
    pub kind: TransportKind,
    pub url: TransportUrl,
    /// Overrides the device baud rate on this transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baudrate: Option<u32>,
    /// Overrides the device line terminator on this transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newline: Option<String>,
}

impl TransportEntry {
    pub fn new(kind: TransportKind, url: impl Into<TransportUrl>) -> Self {
        Self {
            kind,
            url: url.into(),
            baudrate: None,
            newline: None,
        }
    }

    pub fn tcp(url: &str) -> Self {
        Self::new(TransportKind::Tcp, url)
    }

    pub fn udp(url: &str) -> Self {
        Self::new(TransportKind::Udp, url)
    }

    pub fn serial(path: &str) -> Self {
        Self::new(TransportKind::Serial, path)
    }

    pub fn with_baudrate(mut self, baudrate: u32) -> Self {
        self.baudrate = Some(baudrate);
        self
    }

    pub fn with_newline(mut self, newline: impl Into<String>) -> Self {
        self.newline = Some(newline.into());
        self
    }

    fn validate(&self, device: &str) -> Result<(), ConfigError> {
        if matches!(self.newline.as_deref(), Some("")) {
            return Err(ConfigError::EmptyNewline {
                device: device.to_string(),
                url: self.url.to_string(),
            });
        }
        match self.kind {
            TransportKind::Tcp | TransportKind::Udp => {
                self.url
                    .bind_address()
                    .map_err(|source| ConfigError::InvalidAddress {
                        device: device.to_string(),
                        source,
                    })?;
            }
            TransportKind::Serial => {
                if self.url.as_path().is_none() {
                    return Err(ConfigError::SerialNeedsPath {
                        device: device.to_string(),
                        url: self.url.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
