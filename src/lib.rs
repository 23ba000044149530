//! Host bridge for sandboxed WASI plugin modules.
//!
//! A plugin is a WebAssembly core module that takes an opaque byte payload
//! and answers with another one. The bridge compiles plugins once, binds
//! them to a fixed capability set and drives the buffer protocol across the
//! plugin's private linear memory.
//!
//! # Example
//!
//! ```ignore
//! use plugin_bridge::{PluginHost, RuntimeConfig};
//!
//! let host = PluginHost::new(&RuntimeConfig::default())?;
//! host.load_file("prost", "./plugins/protoc-gen-prost.wasm")?;
//!
//! let instance = host.instantiate("prost")?;
//! let response = instance.execute(&request_bytes)?;
//! ```
//!
//! On a tokio runtime, hand the instance to [`execute_async`] so the call
//! runs on the blocking pool.

pub mod host;
pub mod task;

pub use host::PluginHost;
pub use task::execute_async;

pub use plugin_bridge_common::{
    BridgeError, ConfigFile, ConfigFileError, EngineConfig, ExecutionConfig, ExportNames,
    MemoryOp, PluginEntry, RuntimeConfig, WasiConfig,
};
pub use plugin_bridge_core::{
    CompiledModule, ExecutionMetrics, InstanceId, LogEntry, LogLevel, PluginInstance, WasmEngine,
};
