//! Core Wasmtime runtime for plugin-bridge.
//!
//! This crate loads plugins and drives the byte-buffer call protocol:
//! - [`WasmEngine`]: Configured Wasmtime engine with pooling allocator
//! - [`CompiledModule`]: Compiled plugin module wrapper
//! - [`InstanceManager`]: Instantiation and export validation
//! - [`PluginInstance`]: Serialized calls into one live instance
//! - [`MemoryBridge`]: Copies bytes across the guest memory boundary
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WasmEngine                          │
//! │  (Shared across all plugins, thread-safe)               │
//! │  - Pooling Allocator                                    │
//! │  - Fuel metering                                        │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                   CompiledModule                        │
//! │  (Cached, shared across instances)                      │
//! │  - Pre-compiled machine code                            │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │         PluginInstance (Store<BridgeContext>)           │
//! │  (Long-lived, one call at a time)                       │
//! │  - Linear memory and guest allocator                    │
//! │  - Resolved plugin exports                              │
//! │  - Logs and metrics                                     │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod call;
pub mod engine;
pub mod instance;
pub mod memory;
pub mod module;
pub mod store;

pub use call::PluginInstance;
pub use engine::WasmEngine;
pub use instance::InstanceManager;
pub use memory::{GuestBuffer, MemoryBridge};
pub use module::CompiledModule;
pub use store::{BridgeContext, ExecutionMetrics, InstanceId, LogEntry, LogLevel};
