//! Plugin module compilation.
//!
//! This module provides [`CompiledModule`], a wrapper around Wasmtime's [`Module`]
//! that handles compilation, serialization, and deserialization of plugin binaries.
//!
//! # Compilation Strategies
//!
//! - **JIT**: Compile from Wasm bytes at runtime (slower cold start)
//! - **AOT**: Pre-compile and serialize to disk (fast cold start)
//!
//! Either way the result is immutable and can be instantiated any number of times.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, instrument};
use wasmtime::{Engine, Module};

use plugin_bridge_common::BridgeError;

/// Wasm binary magic number.
const WASM_MAGIC: &[u8; 4] = b"\0asm";

/// Binary version of a core module. Component binaries use a different
/// version/layer word and are rejected.
const CORE_MODULE_VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

/// A compiled plugin module.
///
/// # Thread Safety
///
/// `CompiledModule` is cheap to clone and can be shared across threads and
/// instances. The underlying Wasmtime module is reference counted.
#[derive(Clone)]
pub struct CompiledModule {
    /// The compiled Wasmtime module.
    inner: Module,

    /// Hash of the original Wasm bytes.
    content_hash: String,

    /// When this module was compiled.
    compiled_at: Instant,
}

impl CompiledModule {
    /// Compile a module from WebAssembly bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::CompilationFailed`] if the bytes are not a
    /// version-1 core module or fail validation.
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self, BridgeError> {
        let start = Instant::now();

        Self::validate_wasm_header(bytes)?;

        let module = Module::new(engine, bytes).map_err(|e| {
            BridgeError::compilation_failed(format!("Core module compilation failed: {e}"))
        })?;

        let content_hash = compute_hash(bytes);

        info!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "Plugin module compiled"
        );

        Ok(Self {
            inner: module,
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Read and compile a `.wasm` file.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`] if the file cannot be read, otherwise the
    /// same errors as [`CompiledModule::from_bytes`].
    #[instrument(skip(engine, path))]
    pub fn from_file(engine: &Engine, path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;

        debug!(path = %path.display(), bytes_len = bytes.len(), "Plugin binary read");

        Self::from_bytes(engine, &bytes)
    }

    /// Load a pre-compiled module from disk.
    ///
    /// # Safety
    ///
    /// This deserializes machine code. Only load artifacts produced by
    /// [`CompiledModule::serialize`] with the same Wasmtime version and
    /// engine settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact cannot be loaded or is incompatible.
    #[allow(unsafe_code)]
    #[instrument(skip(engine, path))]
    pub fn from_precompiled(engine: &Engine, path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let path = path.as_ref();
        let start = Instant::now();

        // SAFETY: artifacts are produced by `serialize` on a matching engine
        let module = unsafe { Module::deserialize_file(engine, path) }.map_err(|e| {
            BridgeError::compilation_failed(format!(
                "Failed to load precompiled module from {}: {e}",
                path.display()
            ))
        })?;

        // Hash follows the file naming convention: {hash}.cwasm
        let content_hash = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        debug!(
            path = %path.display(),
            content_hash = %content_hash,
            duration_us = start.elapsed().as_micros(),
            "Precompiled module loaded"
        );

        Ok(Self {
            inner: module,
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Compile a module from WAT (WebAssembly Text Format).
    ///
    /// This is primarily for testing purposes.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails.
    #[instrument(skip(engine, wat))]
    pub fn from_wat(engine: &Engine, wat: &str) -> Result<Self, BridgeError> {
        let start = Instant::now();

        let module = Module::new(engine, wat).map_err(|e| {
            BridgeError::compilation_failed(format!("WAT compilation failed: {e}"))
        })?;

        let content_hash = compute_hash(wat.as_bytes());

        info!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "WAT module compiled"
        );

        Ok(Self {
            inner: module,
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Serialize the compiled module for AOT caching.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn serialize(&self) -> Result<Vec<u8>, BridgeError> {
        self.inner.serialize().map_err(|e| {
            BridgeError::compilation_failed(format!("Module serialization failed: {e}"))
        })
    }

    /// Get the content hash of the original Wasm bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Get when this module was compiled.
    pub fn compiled_at(&self) -> Instant {
        self.compiled_at
    }

    /// Get the inner Wasmtime module.
    pub fn inner(&self) -> &Module {
        &self.inner
    }

    /// Check whether the module exports something under `name`.
    pub fn has_export(&self, name: &str) -> bool {
        self.inner.get_export(name).is_some()
    }

    /// Validate the binary header (magic number and core module version).
    fn validate_wasm_header(bytes: &[u8]) -> Result<(), BridgeError> {
        if bytes.len() < 8 {
            return Err(BridgeError::compilation_failed(
                "Invalid Wasm: file too small",
            ));
        }

        if &bytes[0..4] != WASM_MAGIC {
            return Err(BridgeError::compilation_failed(
                "Invalid Wasm: bad magic number",
            ));
        }

        if bytes[4..8] != CORE_MODULE_VERSION {
            return Err(BridgeError::compilation_failed(format!(
                "Unsupported Wasm binary version {:02x?}: expected a core module",
                &bytes[4..8]
            )));
        }

        Ok(())
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
