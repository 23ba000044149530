//! Host function registration for Wasmtime linkers.
//!
//! Builds the single [`Linker`] every plugin instance is instantiated
//! against. Registration happens once per engine; per-instance state lives in
//! the store's [`BridgeContext`].

use plugin_bridge_common::{BridgeError, ExportNames};
use plugin_bridge_core::WasmEngine;
use plugin_bridge_core::store::BridgeContext;
use tracing::{debug, warn};
use wasmtime::{Caller, Linker};

use crate::logging::{LoggingHost, level_from_i32};

/// Create a linker carrying the full host capability set.
///
/// `exports` supplies the memory export name `env::log` reads from.
///
/// # Errors
///
/// Returns [`BridgeError::Instantiation`] if a capability cannot be bound.
pub fn create_linker(
    engine: &WasmEngine,
    exports: &ExportNames,
) -> Result<Linker<BridgeContext>, BridgeError> {
    let mut linker = Linker::new(engine.inner());
    register_all(&mut linker, exports)?;

    debug!("Host capabilities registered");

    Ok(linker)
}

/// Register all standard host functions on a core module linker.
///
/// This registers:
/// - `wasi_snapshot_preview1::*` - WASI preview1
/// - `env::log` - Logging function for guest code
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register_all(
    linker: &mut Linker<BridgeContext>,
    exports: &ExportNames,
) -> Result<(), BridgeError> {
    register_wasi(linker)?;
    register_logging(linker, &exports.memory)?;
    Ok(())
}

/// Register WASI preview1 backed by each store's [`BridgeContext`].
///
/// # Errors
///
/// Returns an error if a WASI function is already defined on the linker.
pub fn register_wasi(linker: &mut Linker<BridgeContext>) -> Result<(), BridgeError> {
    wasmtime_wasi::preview1::add_to_linker_sync(linker, |ctx: &mut BridgeContext| {
        ctx.wasi_mut()
    })
    .map_err(|e| BridgeError::instantiation(format!("Failed to bind WASI preview1: {e}")))
}

/// Register the logging host function.
///
/// Registers `env::log(level: i32, ptr: i32, len: i32)` which allows guest
/// code to emit logs at various levels (debug, info, warn, error).
///
/// # Memory Protocol
///
/// The guest passes:
/// - `level`: Log level (0=debug, 1=info, 2=warn, 3=error)
/// - `ptr`: Offset of the message in the memory exported as `memory_export`
/// - `len`: Length of the message in bytes (UTF-8)
///
/// Malformed calls are dropped with a warning; they never trap the guest.
///
/// # Errors
///
/// Returns an error if `env::log` is already defined on the linker.
pub fn register_logging(
    linker: &mut Linker<BridgeContext>,
    memory_export: &str,
) -> Result<(), BridgeError> {
    let memory_export = memory_export.to_string();

    linker
        .func_wrap(
            "env",
            "log",
            move |mut caller: Caller<'_, BridgeContext>, level: i32, ptr: i32, len: i32| {
                let (Ok(start), Ok(len)) = (usize::try_from(ptr), usize::try_from(len)) else {
                    warn!(ptr, len, "Invalid pointer or length (negative value)");
                    return;
                };

                let Some(memory) = caller
                    .get_export(&memory_export)
                    .and_then(wasmtime::Extern::into_memory)
                else {
                    warn!(export = %memory_export, "Memory export not found in guest module");
                    return;
                };

                // Owned copy so the context can be borrowed mutably below
                let message = {
                    let data = memory.data(&caller);
                    let Some(bytes) = start
                        .checked_add(len)
                        .and_then(|end| data.get(start..end))
                    else {
                        warn!(
                            start,
                            len,
                            memory_size = data.len(),
                            "Memory access out of bounds"
                        );
                        return;
                    };

                    String::from_utf8_lossy(bytes).into_owned()
                };

                LoggingHost::log(caller.data_mut(), level_from_i32(level), &message);
            },
        )
        .map_err(|e| BridgeError::instantiation(format!("Failed to register log function: {e}")))?;

    Ok(())
}
