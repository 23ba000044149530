//! Plugin instance lifecycle management.
//!
//! This module provides [`InstanceManager`], which turns a [`CompiledModule`]
//! into a ready-to-call [`PluginInstance`] in two phases:
//!
//! 1. Instantiate the module against the host linker with a fresh store
//! 2. Run the optional `_initialize` startup routine exactly once
//! 3. Resolve and type-check every export of the plugin ABI
//!
//! Any failure drops the store, so a partially built instance never escapes.

use tracing::{debug, info, instrument};
use wasmtime::{Instance, Linker, Store, Trap, TypedFunc, WasmParams, WasmResults};

use crate::call::PluginInstance;
use crate::memory::MemoryBridge;
use crate::store::{BridgeContext, InstanceId, create_store};
use crate::{CompiledModule, WasmEngine};
use plugin_bridge_common::{BridgeError, ExportNames, RuntimeConfig};

/// Resolved exports of one plugin instance.
pub(crate) struct PluginExports {
    pub(crate) names: ExportNames,
    pub(crate) bridge: MemoryBridge,
    pub(crate) execute: TypedFunc<(u32, u32), u32>,
    pub(crate) output_ptr: TypedFunc<(), u32>,
    pub(crate) output_len: TypedFunc<(), u32>,
    pub(crate) clear_output: TypedFunc<(), ()>,
}

impl PluginExports {
    /// Resolve the plugin ABI in a fixed order: allocator, deallocator,
    /// execute, output pointer, output length, output clear, memory.
    fn resolve(
        store: &mut Store<BridgeContext>,
        instance: &Instance,
        names: &ExportNames,
        id: InstanceId,
    ) -> Result<Self, BridgeError> {
        let malloc = typed_export::<u32, u32>(store, instance, &names.malloc)?;
        let free = typed_export::<(u32, u32), ()>(store, instance, &names.free)?;
        let execute = typed_export::<(u32, u32), u32>(store, instance, &names.execute)?;
        let output_ptr = typed_export::<(), u32>(store, instance, &names.output_ptr)?;
        let output_len = typed_export::<(), u32>(store, instance, &names.output_len)?;
        let clear_output = typed_export::<(), ()>(store, instance, &names.clear_output)?;

        let memory = instance
            .get_export(&mut *store, &names.memory)
            .ok_or_else(|| BridgeError::missing_export(&names.memory))?
            .into_memory()
            .ok_or_else(|| BridgeError::signature_mismatch(&names.memory, "not a memory"))?;

        let bridge = MemoryBridge::new(
            id,
            memory,
            (names.malloc.clone(), malloc),
            (names.free.clone(), free),
        );

        Ok(Self {
            names: names.clone(),
            bridge,
            execute,
            output_ptr,
            output_len,
            clear_output,
        })
    }
}

/// Look up a function export and check its signature.
fn typed_export<P, R>(
    store: &mut Store<BridgeContext>,
    instance: &Instance,
    name: &str,
) -> Result<TypedFunc<P, R>, BridgeError>
where
    P: WasmParams,
    R: WasmResults,
{
    let func = instance
        .get_func(&mut *store, name)
        .ok_or_else(|| BridgeError::missing_export(name))?;

    func.typed::<P, R>(&*store)
        .map_err(|e| BridgeError::signature_mismatch(name, e.to_string()))
}

/// Classify a failed export invocation.
pub(crate) fn call_failed(export: &str, error: &wasmtime::Error) -> BridgeError {
    let trap = error.downcast_ref::<Trap>();

    if trap.is_some_and(|trap| *trap == Trap::OutOfFuel) {
        return BridgeError::FuelExhausted {
            export: export.to_string(),
        };
    }

    BridgeError::Call {
        export: export.to_string(),
        message: error.to_string(),
        trap_code: trap.map(|trap| format!("{trap:?}")),
    }
}

/// Instance lifecycle manager.
///
/// Holds the engine, the host linker carrying the capability set, and the
/// configuration applied to every instance it creates.
///
/// # Thread Safety
///
/// `InstanceManager` is `Send + Sync`; instances can be created from any
/// thread. Each instance gets its own [`Store`] and memory.
pub struct InstanceManager {
    engine: WasmEngine,
    linker: Linker<BridgeContext>,
    config: RuntimeConfig,
}

impl InstanceManager {
    /// Create a new instance manager.
    ///
    /// `linker` must be built on the same engine and carry every import the
    /// plugin expects.
    pub fn new(engine: WasmEngine, linker: Linker<BridgeContext>, config: RuntimeConfig) -> Self {
        Self {
            engine,
            linker,
            config,
        }
    }

    /// Get the engine.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// Get the configuration applied to new instances.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Instantiate a compiled plugin and validate its exports.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Instantiation`] if linking, instantiation, or the
    ///   startup routine fails
    /// - [`BridgeError::MissingExport`] naming the first absent export
    /// - [`BridgeError::ExportSignatureMismatch`] for a mistyped export
    #[instrument(skip(self, module), fields(content_hash = %module.content_hash()))]
    pub fn instantiate(&self, module: &CompiledModule) -> Result<PluginInstance, BridgeError> {
        let id = InstanceId::new();
        let mut store = create_store(
            &self.engine,
            &self.config.wasi,
            &self.config.execution,
            id,
        )?;

        debug!(instance_id = %id, "Instantiating plugin module");

        let instance = self
            .linker
            .instantiate(&mut store, module.inner())
            .map_err(|e| BridgeError::instantiation(format!("Instantiation failed: {e}")))?;

        self.run_startup(&mut store, &instance)?;

        let exports = PluginExports::resolve(&mut store, &instance, &self.config.exports, id)?;

        info!(
            instance_id = %id,
            memory_bytes = exports.bridge.memory_size(&store),
            "Plugin instance ready"
        );

        Ok(PluginInstance::new(
            id,
            store,
            exports,
            self.config.execution.clone(),
            self.engine.is_fuel_enabled(),
        ))
    }

    /// Call the reactor startup routine if the module exports one.
    fn run_startup(
        &self,
        store: &mut Store<BridgeContext>,
        instance: &Instance,
    ) -> Result<(), BridgeError> {
        let name = &self.config.exports.initialize;

        let Some(func) = instance.get_func(&mut *store, name) else {
            debug!(export = %name, "No startup routine exported");
            return Ok(());
        };

        let init = func.typed::<(), ()>(&*store).map_err(|e| {
            BridgeError::instantiation(format!(
                "Startup routine '{name}' has an unexpected signature: {e}"
            ))
        })?;

        init.call(&mut *store, ()).map_err(|e| {
            BridgeError::instantiation(format!("Startup routine '{name}' failed: {e}"))
        })?;

        debug!(export = %name, "Startup routine completed");

        Ok(())
    }
}

impl std::fmt::Debug for InstanceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceManager")
            .field("engine", &self.engine)
            .field("exports", &self.config.exports)
            .finish_non_exhaustive()
    }
}
