//! Host capabilities for plugin-bridge.
//!
//! Every plugin instance is linked against the same capability set:
//!
//! - [`wasmtime_wasi::preview1`]: WASI snapshot preview1, configured per
//!   instance from [`WasiConfig`](plugin_bridge_common::WasiConfig)
//! - [`logging`]: `env::log`, structured logging from guest code
//!
//! Nothing else is importable. A plugin that asks for any other import fails
//! to instantiate.

pub mod linker;
pub mod logging;

pub use linker::{create_linker, register_all, register_logging, register_wasi};
pub use logging::LoggingHost;
