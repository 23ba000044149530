//! Error types for plugin-bridge.
//!
//! [`BridgeError`] covers the whole lifecycle of a plugin, from compiling the
//! binary to copying a call's output back out of guest memory. Variants fall
//! into three groups:
//! - setup failures, after which no usable instance exists
//! - call-scoped failures, after which the instance normally stays usable
//! - ambient failures (configuration, I/O, worker threads)

use std::fmt;
use std::io;

use thiserror::Error;

/// Direction of a guest memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryOp {
    /// Copying host bytes into guest memory.
    Write,
    /// Copying guest bytes out to the host.
    Read,
}

impl fmt::Display for MemoryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryOp::Write => write!(f, "write"),
            MemoryOp::Read => write!(f, "read"),
        }
    }
}

/// Errors raised by the plugin bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The plugin binary is malformed or uses an unsupported format/version.
    #[error("Compilation failed: {reason}")]
    CompilationFailed {
        /// Description of the compilation failure.
        reason: String,
    },

    /// Capability binding, instantiation, or the startup routine failed.
    #[error("Instantiation failed: {reason}")]
    Instantiation {
        /// Description of the instantiation failure.
        reason: String,
    },

    /// A required export is absent from the module.
    #[error("Missing export: {name}")]
    MissingExport {
        /// Name of the absent export.
        name: String,
    },

    /// A required export exists but has the wrong type or signature.
    #[error("Export '{name}' has an unexpected signature: {reason}")]
    ExportSignatureMismatch {
        /// Name of the offending export.
        name: String,
        /// Type checking failure reported by the runtime.
        reason: String,
    },

    /// The guest allocator returned null, or the request could not be expressed.
    #[error("Allocation of {requested} bytes failed: {reason}")]
    AllocationFailed {
        /// Number of bytes requested.
        requested: u64,
        /// Description of the failure.
        reason: String,
    },

    /// A guest memory access fell outside the instance's linear memory.
    #[error("Out-of-bounds memory {op}: offset={offset}, len={len}, memory_size={memory_size}")]
    MemoryAccess {
        /// Read or write.
        op: MemoryOp,
        /// Guest offset of the access.
        offset: u32,
        /// Number of bytes accessed.
        len: u32,
        /// Size of the guest memory at the time of the access.
        memory_size: usize,
    },

    /// Invoking an export failed at the runtime level (trap, host error).
    #[error("Call to '{export}' failed: {message}")]
    Call {
        /// Name of the export that was invoked.
        export: String,
        /// Description of the failure.
        message: String,
        /// Trap code if the failure was a Wasm trap.
        trap_code: Option<String>,
    },

    /// The call consumed its whole fuel budget.
    #[error("Fuel exhausted in '{export}': CPU limit exceeded")]
    FuelExhausted {
        /// Name of the export that was running.
        export: String,
    },

    /// The execute entry and the output-length accessor disagree.
    #[error("Output length mismatch: execute returned {returned}, accessor reported {reported}")]
    OutputLengthMismatch {
        /// Length returned by the execute entry.
        returned: u32,
        /// Length reported by the output-length accessor.
        reported: u32,
    },

    /// A buffer was handed to an instance that did not allocate it.
    #[error("Buffer belongs to instance {owner}, not {instance}")]
    ForeignBuffer {
        /// Instance that allocated the buffer.
        owner: String,
        /// Instance the buffer was presented to.
        instance: String,
    },

    /// The instance was closed; no further calls are accepted.
    #[error("Instance is closed")]
    InstanceClosed,

    /// The call could not start before its deadline.
    #[error("Deadline exceeded before the call could start")]
    DeadlineExceeded,

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A worker task running a blocking call failed.
    #[error("Worker failed: {reason}")]
    Worker {
        /// Description of the worker failure.
        reason: String,
    },
}

impl BridgeError {
    /// Create a new `CompilationFailed` error.
    pub fn compilation_failed(reason: impl Into<String>) -> Self {
        Self::CompilationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `Instantiation` error.
    pub fn instantiation(reason: impl Into<String>) -> Self {
        Self::Instantiation {
            reason: reason.into(),
        }
    }

    /// Create a new `MissingExport` error.
    pub fn missing_export(name: impl Into<String>) -> Self {
        Self::MissingExport { name: name.into() }
    }

    /// Create a new `ExportSignatureMismatch` error.
    pub fn signature_mismatch(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExportSignatureMismatch {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `AllocationFailed` error.
    pub fn allocation_failed(requested: u64, reason: impl Into<String>) -> Self {
        Self::AllocationFailed {
            requested,
            reason: reason.into(),
        }
    }

    /// Create a new `Call` error without a trap code.
    pub fn call(export: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Call {
            export: export.into(),
            message: message.into(),
            trap_code: None,
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if no usable instance was produced.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            Self::CompilationFailed { .. }
                | Self::Instantiation { .. }
                | Self::MissingExport { .. }
                | Self::ExportSignatureMismatch { .. }
        )
    }

    /// Returns `true` if the error is confined to a single call.
    pub fn is_call_scoped(&self) -> bool {
        matches!(
            self,
            Self::AllocationFailed { .. }
                | Self::MemoryAccess { .. }
                | Self::Call { .. }
                | Self::FuelExhausted { .. }
                | Self::OutputLengthMismatch { .. }
                | Self::ForeignBuffer { .. }
                | Self::InstanceClosed
                | Self::DeadlineExceeded
        )
    }

    /// Returns `true` if the error points at an ABI mismatch or corrupted
    /// guest state. Callers should discard the instance instead of retrying.
    pub fn suggests_corruption(&self) -> bool {
        matches!(
            self,
            Self::MemoryAccess { .. }
                | Self::OutputLengthMismatch { .. }
                | Self::ForeignBuffer { .. }
        )
    }
}
