//! Memory bridge for host <-> plugin data transfer.
//!
//! The host never shares an address space with the plugin. Data crosses the
//! boundary by asking the guest allocator for a region, copying bytes into
//! it, and later copying result bytes back out of the guest's own buffers.
//!
//! Offsets are scoped to one instance: a [`GuestBuffer`] remembers the
//! [`InstanceId`] that produced it and is refused anywhere else.

use tracing::{debug, warn};
use wasmtime::{Memory, Store, TypedFunc};

use crate::instance::call_failed;
use crate::store::{BridgeContext, InstanceId};
use plugin_bridge_common::{BridgeError, MemoryOp};

/// A byte range inside one instance's linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestBuffer {
    instance: InstanceId,
    ptr: u32,
    len: u32,
}

impl GuestBuffer {
    /// The null buffer of `instance`, used for empty payloads.
    pub const fn null(instance: InstanceId) -> Self {
        Self {
            instance,
            ptr: 0,
            len: 0,
        }
    }

    /// Guest offset of the first byte.
    pub const fn ptr(&self) -> u32 {
        self.ptr
    }

    /// Length in bytes.
    pub const fn len(&self) -> u32 {
        self.len
    }

    /// Returns `true` if the buffer holds no bytes.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `true` if no guest memory backs the buffer.
    pub const fn is_null(&self) -> bool {
        self.ptr == 0
    }

    /// Instance the offset belongs to.
    pub const fn instance(&self) -> InstanceId {
        self.instance
    }
}

/// Bridge for memory operations between host and plugin.
///
/// Wraps the instance's memory export and its allocator pair.
pub struct MemoryBridge {
    instance: InstanceId,
    memory: Memory,
    alloc_fn: TypedFunc<u32, u32>,
    free_fn: TypedFunc<(u32, u32), ()>,
    alloc_name: String,
    free_name: String,
}

impl MemoryBridge {
    /// Create a new memory bridge.
    pub fn new(
        instance: InstanceId,
        memory: Memory,
        alloc: (String, TypedFunc<u32, u32>),
        free: (String, TypedFunc<(u32, u32), ()>),
    ) -> Self {
        Self {
            instance,
            memory,
            alloc_fn: alloc.1,
            free_fn: free.1,
            alloc_name: alloc.0,
            free_name: free.0,
        }
    }

    /// Instance this bridge operates on.
    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Current guest memory size in bytes.
    pub fn memory_size(&self, store: &Store<BridgeContext>) -> usize {
        self.memory.data_size(store)
    }

    /// Copy `data` into a freshly allocated guest buffer.
    ///
    /// Empty input yields the null buffer without touching the allocator.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::AllocationFailed`] if the input does not fit a `u32`
    ///   length or the allocator returns 0
    /// - [`BridgeError::Call`] if the allocator traps
    /// - [`BridgeError::MemoryAccess`] if the returned region is out of bounds
    pub fn write_input(
        &self,
        store: &mut Store<BridgeContext>,
        data: &[u8],
    ) -> Result<GuestBuffer, BridgeError> {
        if data.is_empty() {
            return Ok(GuestBuffer::null(self.instance));
        }

        let len = u32::try_from(data.len()).map_err(|_| {
            BridgeError::allocation_failed(data.len() as u64, "input exceeds 32-bit length")
        })?;

        let ptr = self
            .alloc_fn
            .call(&mut *store, len)
            .map_err(|e| call_failed(&self.alloc_name, &e))?;

        if ptr == 0 {
            return Err(BridgeError::allocation_failed(
                u64::from(len),
                format!("{} returned null", self.alloc_name),
            ));
        }

        let buffer = GuestBuffer {
            instance: self.instance,
            ptr,
            len,
        };

        if self.memory.write(&mut *store, ptr as usize, data).is_err() {
            let memory_size = self.memory.data_size(&*store);
            if let Err(err) = self.free_buffer(store, buffer) {
                warn!(ptr, len, error = %err, "Failed to release rejected input buffer");
            }
            return Err(BridgeError::MemoryAccess {
                op: MemoryOp::Write,
                offset: ptr,
                len,
                memory_size,
            });
        }

        debug!(ptr, len, "Input written to guest memory");

        Ok(buffer)
    }

    /// Copy `len` bytes starting at `ptr` out of guest memory.
    ///
    /// The returned vector owns its bytes; the guest may reuse the region as
    /// soon as this returns.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MemoryAccess`] if the range is out of bounds.
    pub fn read_output(
        &self,
        store: &Store<BridgeContext>,
        ptr: u32,
        len: u32,
    ) -> Result<Vec<u8>, BridgeError> {
        if len == 0 {
            return Ok(Vec::new());
        }

        let data = self.memory.data(store);
        let start = ptr as usize;
        let bytes = start
            .checked_add(len as usize)
            .and_then(|end| data.get(start..end))
            .ok_or(BridgeError::MemoryAccess {
                op: MemoryOp::Read,
                offset: ptr,
                len,
                memory_size: data.len(),
            })?;

        Ok(bytes.to_vec())
    }

    /// Return a buffer to the guest allocator.
    ///
    /// The null buffer is a no-op.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::ForeignBuffer`] if another instance produced the buffer
    /// - [`BridgeError::Call`] if the deallocator traps
    pub fn free_buffer(
        &self,
        store: &mut Store<BridgeContext>,
        buffer: GuestBuffer,
    ) -> Result<(), BridgeError> {
        if buffer.instance != self.instance {
            return Err(BridgeError::ForeignBuffer {
                owner: buffer.instance.to_string(),
                instance: self.instance.to_string(),
            });
        }

        if buffer.is_null() {
            return Ok(());
        }

        self.free_fn
            .call(&mut *store, (buffer.ptr, buffer.len))
            .map_err(|e| call_failed(&self.free_name, &e))
    }
}

impl std::fmt::Debug for MemoryBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBridge")
            .field("instance", &self.instance)
            .field("alloc", &self.alloc_name)
            .field("free", &self.free_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::create_store;
    use crate::{CompiledModule, WasmEngine};
    use plugin_bridge_common::{EngineConfig, ExecutionConfig, WasiConfig};
    use wasmtime::Instance;

    // Bump allocator that refuses large requests and counts frees.
    const ALLOC_WAT: &str = r#"
        (module
            (memory (export "memory") 1)
            (global $top (mut i32) (i32.const 1024))
            (global $frees (mut i32) (i32.const 0))

            (func (export "malloc") (param $size i32) (result i32)
                (local $ptr i32)
                (if (i32.eqz (local.get $size)) (then unreachable))
                (if (i32.gt_u (local.get $size) (i32.const 4096))
                    (then (return (i32.const 0))))
                (local.set $ptr (global.get $top))
                (global.set $top (i32.add (local.get $ptr) (local.get $size)))
                (local.get $ptr))

            (func (export "bad_malloc") (param i32) (result i32)
                (i32.const 65530))

            (func (export "trap_malloc") (param i32) (result i32)
                unreachable)

            (func (export "free") (param i32 i32)
                (global.set $frees (i32.add (global.get $frees) (i32.const 1))))

            (func (export "frees") (result i32)
                (global.get $frees))
        )
    "#;

    fn setup(alloc_name: &str) -> (Store<BridgeContext>, Instance, MemoryBridge) {
        let engine_config = EngineConfig {
            pooling_allocator: false,
            ..Default::default()
        };
        let engine = WasmEngine::new(&engine_config).unwrap();
        let module = CompiledModule::from_wat(engine.inner(), ALLOC_WAT).unwrap();

        let id = InstanceId::new();
        let mut store = create_store(
            &engine,
            &WasiConfig::default(),
            &ExecutionConfig::default(),
            id,
        )
        .unwrap();
        let instance = Instance::new(&mut store, module.inner(), &[]).unwrap();

        let memory = instance.get_memory(&mut store, "memory").unwrap();
        let alloc = instance
            .get_typed_func::<u32, u32>(&mut store, alloc_name)
            .unwrap();
        let free = instance
            .get_typed_func::<(u32, u32), ()>(&mut store, "free")
            .unwrap();

        let bridge = MemoryBridge::new(
            id,
            memory,
            (alloc_name.to_string(), alloc),
            ("free".to_string(), free),
        );
        (store, instance, bridge)
    }

    fn frees(store: &mut Store<BridgeContext>, instance: &Instance) -> u32 {
        instance
            .get_typed_func::<(), u32>(&mut *store, "frees")
            .unwrap()
            .call(&mut *store, ())
            .unwrap()
    }

    #[test]
    fn test_null_buffer() {
        let id = InstanceId::new();
        let buffer = GuestBuffer::null(id);

        assert!(buffer.is_null());
        assert!(buffer.is_empty());
        assert_eq!(buffer.ptr(), 0);
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.instance(), id);
    }

    #[test]
    fn test_write_read_free() {
        let (mut store, instance, bridge) = setup("malloc");

        let buffer = bridge.write_input(&mut store, b"descriptor").unwrap();
        assert_eq!(buffer.ptr(), 1024);
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.instance(), bridge.instance());

        let bytes = bridge
            .read_output(&store, buffer.ptr(), buffer.len())
            .unwrap();
        assert_eq!(bytes, b"descriptor");

        bridge.free_buffer(&mut store, buffer).unwrap();
        assert_eq!(frees(&mut store, &instance), 1);
    }

    #[test]
    fn test_read_returns_independent_copy() {
        let (mut store, _instance, bridge) = setup("malloc");

        let buffer = bridge.write_input(&mut store, b"before").unwrap();
        let copy = bridge
            .read_output(&store, buffer.ptr(), buffer.len())
            .unwrap();

        bridge
            .memory
            .write(&mut store, buffer.ptr() as usize, b"after!")
            .unwrap();

        assert_eq!(copy, b"before");
    }

    #[test]
    fn test_empty_input_skips_allocator() {
        // malloc(0) traps in the fixture, so success proves it was not called
        let (mut store, instance, bridge) = setup("malloc");

        let buffer = bridge.write_input(&mut store, b"").unwrap();
        assert!(buffer.is_null());

        bridge.free_buffer(&mut store, buffer).unwrap();
        assert_eq!(frees(&mut store, &instance), 0);
    }

    #[test]
    fn test_allocator_null_is_allocation_failure() {
        let (mut store, _instance, bridge) = setup("malloc");

        let result = bridge.write_input(&mut store, &[7u8; 5000]);
        assert!(matches!(
            result,
            Err(BridgeError::AllocationFailed { requested: 5000, .. })
        ));
    }

    #[test]
    fn test_allocator_trap_is_call_error() {
        let (mut store, _instance, bridge) = setup("trap_malloc");

        let result = bridge.write_input(&mut store, b"x");
        match result {
            Err(BridgeError::Call { export, .. }) => assert_eq!(export, "trap_malloc"),
            other => panic!("expected Call error, got {other:?}"),
        }
    }

    #[test]
    fn test_out_of_bounds_write_frees_region() {
        let (mut store, instance, bridge) = setup("bad_malloc");

        let result = bridge.write_input(&mut store, &[1u8; 16]);
        assert!(matches!(
            result,
            Err(BridgeError::MemoryAccess {
                op: MemoryOp::Write,
                offset: 65530,
                len: 16,
                ..
            })
        ));
        assert_eq!(frees(&mut store, &instance), 1);
    }

    #[test]
    fn test_out_of_bounds_read() {
        let (store, _instance, bridge) = setup("malloc");

        let result = bridge.read_output(&store, 65530, 16);
        assert!(matches!(
            result,
            Err(BridgeError::MemoryAccess {
                op: MemoryOp::Read,
                memory_size: 65536,
                ..
            })
        ));

        let result = bridge.read_output(&store, u32::MAX, 2);
        assert!(matches!(result, Err(BridgeError::MemoryAccess { .. })));
    }

    #[test]
    fn test_zero_length_read_is_empty() {
        let (store, _instance, bridge) = setup("malloc");

        let bytes = bridge.read_output(&store, u32::MAX, 0).unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_foreign_buffer_rejected() {
        let (mut store, instance, bridge) = setup("malloc");

        let foreign = GuestBuffer::null(InstanceId::new());
        let result = bridge.free_buffer(&mut store, foreign);

        assert!(matches!(result, Err(BridgeError::ForeignBuffer { .. })));
        assert_eq!(frees(&mut store, &instance), 0);
    }

    #[test]
    fn test_memory_size() {
        let (store, _instance, bridge) = setup("malloc");
        assert_eq!(bridge.memory_size(&store), 65536);
    }
}
