//! Configuration file structures for plugin-bridge.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`PluginEntry`]: Plugin module to preload at startup

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::RuntimeConfig;

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [runtime.engine]
/// pooling_allocator = true
/// max_instances = 16
///
/// [runtime.execution]
/// max_memory_mb = 128
/// lock_timeout_ms = 5000
///
/// [runtime.wasi]
/// inherit_stderr = true
///
/// [runtime.exports]
/// execute = "prost_execute"
///
/// [[plugins]]
/// id = "prost"
/// path = "./plugins/protoc-gen-prost.wasm"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Runtime configuration (engine, execution, WASI, ABI names).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Plugins to compile at startup.
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML, or if two
    /// plugins share an id.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })?;
        config.check_unique_ids()?;
        Ok(config)
    }

    fn check_unique_ids(&self) -> Result<(), ConfigFileError> {
        let mut seen = std::collections::HashSet::new();
        for entry in &self.plugins {
            if !seen.insert(entry.id.as_str()) {
                return Err(ConfigFileError::DuplicatePlugin {
                    id: entry.id.clone(),
                });
            }
        }
        Ok(())
    }
}

/// A plugin module to compile at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PluginEntry {
    /// Unique identifier used to look the plugin up later.
    pub id: String,

    /// Path to the module file.
    pub path: String,

    /// The file is a serialized artifact produced by this runtime version
    /// rather than a `.wasm` binary.
    #[serde(default)]
    pub precompiled: bool,
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },

    /// Two plugin entries use the same id.
    #[error("Duplicate plugin id: {id}")]
    DuplicatePlugin { id: String },
}
