//! Device class registry.
//!
//! Maps a class name (plus the module it lives in) to a constructor.  The
//! registry is filled once at startup and only read afterwards; the server
//! consults it when creating devices and never on the message path.
//!
//! # Lookup rules
//!
//! A device entry names a `class` and optionally a `module` and/or a
//! `package`.  Every registered plugin whose class matches is a candidate;
//! `package` keeps the plugins whose module path starts with it, `module`
//! keeps those whose module path equals it or ends with `.<module>`.
//! Exactly one candidate must remain.

use std::fmt;
use std::sync::Arc;

use labsim_core::{ConfigError, DeviceEntry, Options};
use thiserror::Error;

use super::device::{Device, DeviceError};

/// Builds a device from its name and options.
pub type DeviceConstructor = fn(&str, Options) -> Result<Arc<dyn Device>, DeviceError>;

/// Error type for device lookup and creation.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The entry failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No plugin matches the class (and module/package filters).
    #[error("unknown device class {class:?}")]
    UnknownClass { class: String },

    /// Several plugins match; the entry needs a `module` or `package`.
    #[error("device class {class:?} is ambiguous: {candidates:?}")]
    Ambiguous {
        class: String,
        candidates: Vec<String>,
    },

    /// The same module path and class were registered twice.
    #[error("plugin {0} is already registered")]
    Duplicate(String),

    /// The constructor rejected the options.
    #[error("failed to construct device {name:?}: {source}")]
    Construction {
        name: String,
        #[source]
        source: DeviceError,
    },
}

/// One registered device class.
#[derive(Clone)]
pub struct PluginInfo {
    /// Dotted module path, e.g. `labsim.streamer`.
    pub module: String,
    pub class: String,
    pub description: String,
    constructor: DeviceConstructor,
}

impl PluginInfo {
    /// `module.Class`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.module, self.class)
    }

    fn in_package(&self, package: &str) -> bool {
        self.module == package
            || self
                .module
                .strip_prefix(package)
                .is_some_and(|rest| rest.starts_with('.'))
    }

    fn in_module(&self, module: &str) -> bool {
        self.module == module
            || self
                .module
                .strip_suffix(module)
                .is_some_and(|rest| rest.ends_with('.'))
    }
}

impl fmt::Debug for PluginInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInfo")
            .field("module", &self.module)
            .field("class", &self.class)
            .field("description", &self.description)
            .finish()
    }
}

/// Name → constructor table.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    plugins: Vec<PluginInfo>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in demo devices.
    pub fn with_builtin_devices() -> Self {
        let mut registry = Self::new();
        crate::devices::register_builtins(&mut registry);
        registry
    }

    /// Adds a device class.
    pub fn register(
        &mut self,
        module: &str,
        class: &str,
        description: &str,
        constructor: DeviceConstructor,
    ) -> Result<(), RegistryError> {
        if self
            .plugins
            .iter()
            .any(|p| p.module == module && p.class == class)
        {
            return Err(RegistryError::Duplicate(format!("{module}.{class}")));
        }
        self.plugins.push(PluginInfo {
            module: module.to_string(),
            class: class.to_string(),
            description: description.to_string(),
            constructor,
        });
        Ok(())
    }

    /// Registered plugins, in registration order.
    pub fn plugins(&self) -> &[PluginInfo] {
        &self.plugins
    }

    /// Finds the single plugin an entry refers to.
    pub fn resolve(
        &self,
        class: &str,
        module: Option<&str>,
        package: Option<&str>,
    ) -> Result<&PluginInfo, RegistryError> {
        let candidates: Vec<&PluginInfo> = self
            .plugins
            .iter()
            .filter(|p| p.class == class)
            .filter(|p| package.map_or(true, |pkg| p.in_package(pkg)))
            .filter(|p| module.map_or(true, |m| p.in_module(m)))
            .collect();

        match candidates.as_slice() {
            [] => Err(RegistryError::UnknownClass {
                class: class.to_string(),
            }),
            [only] => Ok(*only),
            many => Err(RegistryError::Ambiguous {
                class: class.to_string(),
                candidates: many.iter().map(|p| p.qualified_name()).collect(),
            }),
        }
    }

    /// Validates `entry`, resolves its class and constructs the device.
    pub fn create(&self, entry: &DeviceEntry) -> Result<Arc<dyn Device>, RegistryError> {
        entry.validate()?;
        let plugin = self.resolve(
            &entry.class,
            entry.module.as_deref(),
            entry.package.as_deref(),
        )?;
        let name = entry.name();
        (plugin.constructor)(name, entry.options.clone()).map_err(|source| {
            RegistryError::Construction {
                name: name.to_string(),
                source,
            }
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
