//! Per-instance execution context and store management.
//!
//! This module provides:
//! - [`InstanceId`]: Identity of one plugin instance and its memory space
//! - [`BridgeContext`]: Store data accessible from host functions
//! - [`LogEntry`] and [`LogLevel`]: Structured logging from guest code
//! - [`ExecutionMetrics`]: Running call statistics for one instance

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use uuid::Uuid;
use wasmtime::{Store, StoreLimits, StoreLimitsBuilder};
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::WasmEngine;
use plugin_bridge_common::{BridgeError, ExecutionConfig, WasiConfig};

/// Number of guest log lines retained per instance.
pub const MAX_RETAINED_LOGS: usize = 256;

/// Identity of one plugin instance.
///
/// Guest offsets are only meaningful together with the instance that
/// produced them, so buffers carry this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Store data for one plugin instance.
///
/// Lives as long as the instance. Host functions reach it through
/// [`wasmtime::Caller::data_mut`].
pub struct BridgeContext {
    /// WASI preview1 context.
    wasi: WasiP1Ctx,

    /// Resource limits enforced on the instance.
    limits: StoreLimits,

    /// Instance this context belongs to.
    instance_id: InstanceId,

    /// Most recent guest log lines.
    logs: VecDeque<LogEntry>,

    /// Call statistics.
    pub metrics: ExecutionMetrics,
}

/// A single log entry from guest code.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Log level (debug, info, warn, error).
    pub level: LogLevel,

    /// Log message content.
    pub message: String,

    /// Timestamp when the log was recorded.
    pub timestamp: Instant,
}

/// Log level for guest logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug-level messages.
    Debug,
    /// Informational messages.
    Info,
    /// Warning messages.
    Warn,
    /// Error messages.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Call statistics for one instance.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    /// Calls that returned output.
    pub calls_completed: u64,

    /// Calls that returned an error after reaching the instance.
    pub calls_failed: u64,

    /// Fuel consumed by the most recent call (0 without metering).
    pub last_fuel_consumed: u64,

    /// Duration of the most recent call.
    pub last_duration: Option<Duration>,

    /// Guest memory size after the most recent call.
    pub memory_used_bytes: usize,
}

impl BridgeContext {
    /// Create a context for a new instance.
    pub fn new(instance_id: InstanceId, wasi: &WasiConfig, execution: &ExecutionConfig) -> Self {
        let mut builder = WasiCtxBuilder::new();

        if wasi.inherit_stdout {
            builder.inherit_stdout();
        }
        if wasi.inherit_stderr {
            builder.inherit_stderr();
        }
        builder.args(wasi.args.as_slice());
        for (key, value) in &wasi.env {
            builder.env(key, value);
        }

        let limits = StoreLimitsBuilder::new()
            .memory_size(execution.max_memory_bytes())
            .build();

        Self {
            wasi: builder.build_p1(),
            limits,
            instance_id,
            logs: VecDeque::new(),
            metrics: ExecutionMetrics::default(),
        }
    }

    /// Get the WASI preview1 context.
    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }

    /// Get the id of the owning instance.
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// Add a log entry, dropping the oldest one when full.
    pub fn log(&mut self, level: LogLevel, message: String) {
        if self.logs.len() == MAX_RETAINED_LOGS {
            self.logs.pop_front();
        }
        self.logs.push_back(LogEntry {
            level,
            message,
            timestamp: Instant::now(),
        });
    }

    /// Retained log entries, oldest first.
    pub fn logs(&self) -> impl Iterator<Item = &LogEntry> {
        self.logs.iter()
    }

    /// Remove and return all retained log entries.
    pub fn take_logs(&mut self) -> Vec<LogEntry> {
        self.logs.drain(..).collect()
    }
}

/// Create a new Wasmtime store for one instance.
///
/// # Errors
///
/// Returns an error if fuel cannot be set on the store.
pub fn create_store(
    engine: &WasmEngine,
    wasi: &WasiConfig,
    execution: &ExecutionConfig,
    instance_id: InstanceId,
) -> Result<Store<BridgeContext>, BridgeError> {
    let context = BridgeContext::new(instance_id, wasi, execution);
    let mut store = Store::new(engine.inner(), context);

    store.limiter(|ctx| &mut ctx.limits);

    if engine.is_fuel_enabled() {
        refuel(&mut store, execution.max_fuel)?;
    }

    Ok(store)
}

/// Reset the store's fuel to `amount`.
///
/// # Errors
///
/// Returns an error if the engine was built without fuel metering.
pub fn refuel(store: &mut Store<BridgeContext>, amount: u64) -> Result<(), BridgeError> {
    store
        .set_fuel(amount)
        .map_err(|e| BridgeError::invalid_config(format!("Failed to set fuel: {e}")))
}

/// Get remaining fuel from a store.
pub fn get_remaining_fuel(store: &Store<BridgeContext>) -> Option<u64> {
    store.get_fuel().ok()
}

/// Calculate fuel consumed.
pub fn calculate_fuel_consumed(initial_fuel: u64, store: &Store<BridgeContext>) -> u64 {
    let remaining = get_remaining_fuel(store).unwrap_or(initial_fuel);
    initial_fuel.saturating_sub(remaining)
}
