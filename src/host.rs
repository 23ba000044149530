//! Plugin host facade.
//!
//! This module provides [`PluginHost`], which holds the resources shared by
//! every plugin: the engine, the host linker and the compiled-module cache.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, instrument};

use plugin_bridge_common::{BridgeError, ConfigFile, RuntimeConfig};
use plugin_bridge_core::{CompiledModule, InstanceManager, PluginInstance, WasmEngine};
use plugin_bridge_host::create_linker;

/// Shared entry point for loading and instantiating plugins.
///
/// Cheap to clone; clones share the engine and the module cache.
#[derive(Clone)]
pub struct PluginHost {
    /// Instance manager with the engine and pre-registered host functions.
    manager: Arc<InstanceManager>,

    /// Compiled module cache (plugin id -> `CompiledModule`).
    modules: Arc<DashMap<String, Arc<CompiledModule>>>,
}

impl PluginHost {
    /// Create a host with no plugins loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if engine or linker creation fails.
    pub fn new(config: &RuntimeConfig) -> Result<Self, BridgeError> {
        let engine = WasmEngine::new(&config.engine)?;
        let linker = create_linker(&engine, &config.exports)?;
        let manager = InstanceManager::new(engine, linker, config.clone());

        Ok(Self {
            manager: Arc::new(manager),
            modules: Arc::new(DashMap::new()),
        })
    }

    /// Create a host and compile every plugin listed in `file`.
    ///
    /// # Errors
    ///
    /// Returns the first engine, I/O or compilation error.
    #[instrument(skip(file), fields(plugins = file.plugins.len()))]
    pub fn from_config_file(file: &ConfigFile) -> Result<Self, BridgeError> {
        let host = Self::new(&file.runtime)?;

        for entry in &file.plugins {
            if entry.precompiled {
                host.load_precompiled(&entry.id, &entry.path)?;
            } else {
                host.load_file(&entry.id, &entry.path)?;
            }
        }

        info!(plugins = host.module_count(), "Plugins preloaded");

        Ok(host)
    }

    /// Get the Wasmtime engine.
    pub fn engine(&self) -> &WasmEngine {
        self.manager.engine()
    }

    /// Get the runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        self.manager.config()
    }

    /// Compile and cache a plugin from Wasm bytes.
    ///
    /// Replaces any plugin previously loaded under `id`. Existing instances
    /// keep running the old module.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails.
    pub fn load(&self, id: &str, wasm_bytes: &[u8]) -> Result<Arc<CompiledModule>, BridgeError> {
        let compiled = CompiledModule::from_bytes(self.engine().inner(), wasm_bytes)?;
        Ok(self.insert(id, compiled))
    }

    /// Compile and cache a plugin from WAT text.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails.
    pub fn load_wat(&self, id: &str, wat: &str) -> Result<Arc<CompiledModule>, BridgeError> {
        let compiled = CompiledModule::from_wat(self.engine().inner(), wat)?;
        Ok(self.insert(id, compiled))
    }

    /// Read, compile and cache a `.wasm` file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or compiled.
    pub fn load_file(
        &self,
        id: &str,
        path: impl AsRef<Path>,
    ) -> Result<Arc<CompiledModule>, BridgeError> {
        let compiled = CompiledModule::from_file(self.engine().inner(), path)?;
        Ok(self.insert(id, compiled))
    }

    /// Load and cache an artifact written by [`CompiledModule::serialize`].
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact cannot be loaded.
    pub fn load_precompiled(
        &self,
        id: &str,
        path: impl AsRef<Path>,
    ) -> Result<Arc<CompiledModule>, BridgeError> {
        let compiled = CompiledModule::from_precompiled(self.engine().inner(), path)?;
        Ok(self.insert(id, compiled))
    }

    fn insert(&self, id: &str, compiled: CompiledModule) -> Arc<CompiledModule> {
        let compiled = Arc::new(compiled);
        if let Some(previous) = self.modules.insert(id.to_string(), Arc::clone(&compiled)) {
            info!(
                plugin = id,
                previous_hash = %previous.content_hash(),
                previous_age_ms = previous.compiled_at().elapsed().as_millis(),
                "Plugin replaced"
            );
        }
        compiled
    }

    /// Get a cached module.
    pub fn get_module(&self, id: &str) -> Option<Arc<CompiledModule>> {
        self.modules.get(id).map(|r| Arc::clone(r.value()))
    }

    /// Remove a module from the cache.
    pub fn remove_module(&self, id: &str) -> Option<Arc<CompiledModule>> {
        self.modules.remove(id).map(|(_, v)| v)
    }

    /// List all cached plugin ids.
    pub fn list_modules(&self) -> Vec<String> {
        self.modules.iter().map(|r| r.key().clone()).collect()
    }

    /// Number of cached modules.
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Create a new instance of the plugin loaded under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidConfig`] if no plugin is loaded under
    /// `id`, otherwise any instantiation error.
    pub fn instantiate(&self, id: &str) -> Result<PluginInstance, BridgeError> {
        let module = self
            .get_module(id)
            .ok_or_else(|| BridgeError::invalid_config(format!("Plugin '{id}' is not loaded")))?;

        self.instantiate_module(&module)
    }

    /// Create a new instance of an already compiled module.
    ///
    /// The module must come from this host's engine.
    ///
    /// # Errors
    ///
    /// Returns any instantiation or export validation error.
    pub fn instantiate_module(&self, module: &CompiledModule) -> Result<PluginInstance, BridgeError> {
        self.manager.instantiate(module)
    }
}

impl std::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHost")
            .field("manager", &self.manager)
            .field("modules", &self.module_count())
            .finish()
    }
}
