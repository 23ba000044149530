//! Configuration structures for plugin-bridge.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings (pooling, fuel)
//! - [`ExecutionConfig`]: Per-instance call limits (fuel, memory, lock wait)
//! - [`WasiConfig`]: WASI capabilities granted to each instance
//! - [`ExportNames`]: Names of the exports making up the plugin ABI

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for plugin-bridge.
/// It can be loaded from files (TOML, JSON).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-instance execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// WASI capabilities.
    #[serde(default)]
    pub wasi: WasiConfig,

    /// Plugin ABI export names.
    #[serde(default)]
    pub exports: ExportNames,
}

/// Wasmtime engine configuration.
///
/// These settings affect the global Wasmtime engine behavior and are shared
/// by every module compiled with it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable pooling allocator for fast instance creation.
    ///
    /// When enabled, memory is reserved up front for a pool of instances.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the pool.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per instance slot in megabytes.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Enable fuel metering.
    ///
    /// When enabled, every call is given `ExecutionConfig::max_fuel` units.
    #[serde(default = "defaults::fuel_metering")]
    pub fuel_metering: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: defaults::pooling_allocator(),
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            fuel_metering: defaults::fuel_metering(),
        }
    }
}

/// Per-instance execution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Fuel granted to each call when metering is enabled.
    ///
    /// Code generation over large descriptor sets can take billions of
    /// instructions, so the default is generous.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,

    /// Maximum linear memory of one instance in megabytes.
    #[serde(default = "defaults::max_memory_mb")]
    pub max_memory_mb: u32,

    /// How long a caller waits for a busy instance before giving up.
    ///
    /// `None` waits indefinitely. The wait only bounds *starting* a call.
    #[serde(default)]
    pub lock_timeout_ms: Option<u64>,

    /// Cross-check the execute result against the output-length accessor.
    #[serde(default = "defaults::verify_output_len")]
    pub verify_output_len: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_fuel: defaults::max_fuel(),
            max_memory_mb: defaults::max_memory_mb(),
            lock_timeout_ms: None,
            verify_output_len: defaults::verify_output_len(),
        }
    }
}

impl ExecutionConfig {
    /// Get the lock timeout as a `Duration`.
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }

    /// Get the memory limit in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        (self.max_memory_mb as usize) * 1024 * 1024
    }
}

/// WASI capabilities granted to each instance.
///
/// Plugins get no filesystem and no stdin; output streams are opt-in.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WasiConfig {
    /// Forward guest stdout to the host process.
    #[serde(default)]
    pub inherit_stdout: bool,

    /// Forward guest stderr to the host process.
    #[serde(default = "defaults::inherit_stderr")]
    pub inherit_stderr: bool,

    /// Program arguments visible to the guest.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables visible to the guest.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for WasiConfig {
    fn default() -> Self {
        Self {
            inherit_stdout: false,
            inherit_stderr: defaults::inherit_stderr(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

/// Names of the exports making up the plugin ABI.
///
/// Defaults follow the protoc-gen-prost WASI build.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExportNames {
    /// `(size) -> ptr`, returns 0 on failure.
    #[serde(default = "defaults::malloc")]
    pub malloc: String,

    /// `(ptr, size) -> ()`.
    #[serde(default = "defaults::free")]
    pub free: String,

    /// `(input_ptr, input_len) -> output_len`.
    #[serde(default = "defaults::execute")]
    pub execute: String,

    /// `() -> ptr`, valid until the next execute or clear.
    #[serde(default = "defaults::output_ptr")]
    pub output_ptr: String,

    /// `() -> len`.
    #[serde(default = "defaults::output_len")]
    pub output_len: String,

    /// `() -> ()`.
    #[serde(default = "defaults::clear_output")]
    pub clear_output: String,

    /// Optional reactor startup routine.
    #[serde(default = "defaults::initialize")]
    pub initialize: String,

    /// Linear memory export.
    #[serde(default = "defaults::memory")]
    pub memory: String,
}

impl Default for ExportNames {
    fn default() -> Self {
        Self {
            malloc: defaults::malloc(),
            free: defaults::free(),
            execute: defaults::execute(),
            output_ptr: defaults::output_ptr(),
            output_len: defaults::output_len(),
            clear_output: defaults::clear_output(),
            initialize: defaults::initialize(),
            memory: defaults::memory(),
        }
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn pooling_allocator() -> bool {
        true
    }

    pub const fn max_instances() -> u32 {
        64
    }

    pub const fn instance_memory_mb() -> u32 {
        256
    }

    pub const fn fuel_metering() -> bool {
        false
    }

    pub const fn max_fuel() -> u64 {
        10_000_000_000
    }

    pub const fn max_memory_mb() -> u32 {
        256
    }

    pub const fn verify_output_len() -> bool {
        true
    }

    pub const fn inherit_stderr() -> bool {
        true
    }

    pub fn malloc() -> String {
        "prost_malloc".into()
    }

    pub fn free() -> String {
        "prost_free".into()
    }

    pub fn execute() -> String {
        "prost_execute".into()
    }

    pub fn output_ptr() -> String {
        "prost_get_output_ptr".into()
    }

    pub fn output_len() -> String {
        "prost_get_output_len".into()
    }

    pub fn clear_output() -> String {
        "prost_clear_output".into()
    }

    pub fn initialize() -> String {
        "_initialize".into()
    }

    pub fn memory() -> String {
        "memory".into()
    }
}
