//! Common types, errors, and configuration for plugin-bridge.
//!
//! This crate provides shared functionality used across the plugin-bridge workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for runtime settings
//! - TOML configuration file loading

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{EngineConfig, ExecutionConfig, ExportNames, RuntimeConfig, WasiConfig};
pub use config_file::{ConfigFile, ConfigFileError, PluginEntry};
pub use error::{BridgeError, MemoryOp};
