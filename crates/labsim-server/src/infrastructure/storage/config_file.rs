//! Device list files in TOML, JSON or YAML.
//!
//! The format follows the extension:
//!
//! | Extension        | Parser       |
//! |------------------|--------------|
//! | `.toml`          | `toml`       |
//! | `.json`          | `serde_json` |
//! | `.yml` / `.yaml` | `serde_yaml` |
//!
//! ```yaml
//! devices:
//! - class: Streamer
//!   name: scope
//!   period: 0.1
//!   transports:
//!   - type: tcp
//!     url: :5000
//!   - type: serial
//!     url: /tmp/scope
//!     baudrate: 9600
//! ```

use std::path::{Path, PathBuf};

use labsim_core::SimulatorConfig;
use thiserror::Error;

/// Error type for loading a config file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The extension is not one of the supported formats.
    #[error("unsupported config format for {0} (expected .toml, .json, .yml or .yaml)")]
    UnsupportedFormat(PathBuf),
}

/// Serialization format of a config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
    Yaml,
}

impl ConfigFormat {
    /// Picks the format from the file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self, ConfigFileError> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("toml") => Ok(Self::Toml),
            Some("json") => Ok(Self::Json),
            Some("yml" | "yaml") => Ok(Self::Yaml),
            _ => Err(ConfigFileError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    /// Parses `content` in this format.
    pub fn parse(self, content: &str) -> Result<SimulatorConfig, ConfigFileError> {
        Ok(match self {
            Self::Toml => toml::from_str(content)?,
            Self::Json => serde_json::from_str(content)?,
            Self::Yaml => serde_yaml::from_str(content)?,
        })
    }
}

/// Reads and parses the config file at `path`.
///
/// Unlike an application settings file there is no default: a missing file
/// is an error.
pub fn load_config(path: &Path) -> Result<SimulatorConfig, ConfigFileError> {
    let format = ConfigFormat::from_path(path)?;
    let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    format.parse(&content)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
