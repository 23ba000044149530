//! Serialized request/response calls into a plugin instance.
//!
//! A call moves through a fixed sequence while holding the instance lock:
//!
//! ```text
//! write input -> execute -> [verify length] -> read output -> clear output -> free input
//! ```
//!
//! The output is copied into host memory before the guest is told to clear
//! it, and the input buffer is released on every path once it was allocated.

use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, instrument, warn};
use wasmtime::Store;

use crate::instance::{PluginExports, call_failed};
use crate::memory::GuestBuffer;
use crate::store::{
    BridgeContext, ExecutionMetrics, InstanceId, LogEntry, calculate_fuel_consumed, refuel,
};
use plugin_bridge_common::{BridgeError, ExecutionConfig};

/// Store and exports of an instance that has not been closed.
struct LiveInstance {
    store: Store<BridgeContext>,
    exports: PluginExports,
    verify_output_len: bool,
}

impl LiveInstance {
    /// Run one full call and release everything it allocated.
    fn call(&mut self, input: &[u8]) -> Result<Vec<u8>, BridgeError> {
        let buffer = self.exports.bridge.write_input(&mut self.store, input)?;

        let result = self.invoke(buffer);

        if let Err(err) = self.exports.bridge.free_buffer(&mut self.store, buffer) {
            warn!(
                ptr = buffer.ptr(),
                len = buffer.len(),
                error = %err,
                "Failed to free input buffer"
            );
        }

        result
    }

    /// Execute and collect the output, clearing it whenever execute returned.
    fn invoke(&mut self, buffer: GuestBuffer) -> Result<Vec<u8>, BridgeError> {
        let returned_len = self
            .exports
            .execute
            .call(&mut self.store, (buffer.ptr(), buffer.len()))
            .map_err(|e| call_failed(&self.exports.names.execute, &e))?;

        let output = self.collect_output(returned_len);
        self.clear_output();
        output
    }

    fn collect_output(&mut self, returned_len: u32) -> Result<Vec<u8>, BridgeError> {
        let names = &self.exports.names;

        let len = if self.verify_output_len {
            let reported = self
                .exports
                .output_len
                .call(&mut self.store, ())
                .map_err(|e| call_failed(&names.output_len, &e))?;

            if reported != returned_len {
                return Err(BridgeError::OutputLengthMismatch {
                    returned: returned_len,
                    reported,
                });
            }
            reported
        } else {
            returned_len
        };

        let ptr = self
            .exports
            .output_ptr
            .call(&mut self.store, ())
            .map_err(|e| call_failed(&names.output_ptr, &e))?;

        self.exports.bridge.read_output(&self.store, ptr, len)
    }

    /// Release the guest's output. Failures are logged and otherwise ignored.
    fn clear_output(&mut self) {
        if let Err(err) = self.exports.clear_output.call(&mut self.store, ()) {
            warn!(
                export = %self.exports.names.clear_output,
                error = %err,
                "Failed to clear plugin output"
            );
        }
    }
}

/// A ready plugin instance.
///
/// Owns one store and its linear memory. Calls are serialized by an internal
/// lock, so a `PluginInstance` can be shared between threads behind an
/// [`Arc`](std::sync::Arc) and called concurrently.
pub struct PluginInstance {
    id: InstanceId,
    state: Mutex<Option<LiveInstance>>,
    config: ExecutionConfig,
    fuel_metering: bool,
}

impl PluginInstance {
    pub(crate) fn new(
        id: InstanceId,
        mut store: Store<BridgeContext>,
        exports: PluginExports,
        config: ExecutionConfig,
        fuel_metering: bool,
    ) -> Self {
        store.data_mut().metrics.memory_used_bytes = exports.bridge.memory_size(&store);

        let live = LiveInstance {
            store,
            exports,
            verify_output_len: config.verify_output_len,
        };

        Self {
            id,
            state: Mutex::new(Some(live)),
            config,
            fuel_metering,
        }
    }

    /// Get the instance id.
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Run one call with `input` and return a copy of the plugin's output.
    ///
    /// Blocks while another call holds the instance. When
    /// [`ExecutionConfig::lock_timeout_ms`] is set, waiting is bounded by it.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::InstanceClosed`] after [`PluginInstance::close`]
    /// - [`BridgeError::DeadlineExceeded`] if the lock timeout elapses
    /// - any allocation, memory, or call error from the call sequence
    pub fn execute(&self, input: &[u8]) -> Result<Vec<u8>, BridgeError> {
        match self.config.lock_timeout() {
            Some(timeout) => self.execute_before(input, Instant::now() + timeout),
            None => {
                let mut state = self.state.lock();
                self.run(&mut state, input)
            }
        }
    }

    /// Like [`PluginInstance::execute`], but gives up waiting for the
    /// instance at `deadline`.
    ///
    /// A call that already started is not interrupted by the deadline; only
    /// fuel metering bounds guest execution.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::DeadlineExceeded`] if `deadline` has passed or
    /// the instance stays busy until then.
    pub fn execute_before(&self, input: &[u8], deadline: Instant) -> Result<Vec<u8>, BridgeError> {
        if Instant::now() >= deadline {
            return Err(BridgeError::DeadlineExceeded);
        }

        let Some(mut state) = self.state.try_lock_until(deadline) else {
            debug!(instance_id = %self.id, "Instance stayed busy past the deadline");
            return Err(BridgeError::DeadlineExceeded);
        };

        self.run(&mut state, input)
    }

    #[instrument(skip(self, state, input), fields(instance_id = %self.id, input_len = input.len()))]
    fn run(&self, state: &mut Option<LiveInstance>, input: &[u8]) -> Result<Vec<u8>, BridgeError> {
        let live = state.as_mut().ok_or(BridgeError::InstanceClosed)?;

        if self.fuel_metering {
            refuel(&mut live.store, self.config.max_fuel)?;
        }

        let start = Instant::now();
        let result = live.call(input);
        let elapsed = start.elapsed();

        let fuel_consumed = if self.fuel_metering {
            calculate_fuel_consumed(self.config.max_fuel, &live.store)
        } else {
            0
        };
        let memory_size = live.exports.bridge.memory_size(&live.store);

        let metrics = &mut live.store.data_mut().metrics;
        metrics.last_duration = Some(elapsed);
        metrics.last_fuel_consumed = fuel_consumed;
        metrics.memory_used_bytes = memory_size;

        match &result {
            Ok(output) => {
                metrics.calls_completed += 1;
                debug!(
                    output_len = output.len(),
                    fuel_consumed,
                    duration_us = elapsed.as_micros(),
                    "Plugin call completed"
                );
            }
            Err(err) => {
                metrics.calls_failed += 1;
                if err.suggests_corruption() {
                    warn!(error = %err, "Plugin call failed; instance state may be corrupt");
                } else {
                    debug!(error = %err, "Plugin call failed");
                }
            }
        }

        result
    }

    /// Release the instance's store and memory.
    ///
    /// Waits for an in-flight call to finish. Idempotent; every later call
    /// fails with [`BridgeError::InstanceClosed`].
    pub fn close(&self) {
        if self.state.lock().take().is_some() {
            debug!(instance_id = %self.id, "Plugin instance closed");
        }
    }

    /// Returns `true` once the instance has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().is_none()
    }

    /// Current guest memory size in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InstanceClosed`] after close.
    pub fn memory_size(&self) -> Result<usize, BridgeError> {
        let state = self.state.lock();
        let live = state.as_ref().ok_or(BridgeError::InstanceClosed)?;
        Ok(live.exports.bridge.memory_size(&live.store))
    }

    /// Snapshot of the call statistics.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InstanceClosed`] after close.
    pub fn metrics(&self) -> Result<ExecutionMetrics, BridgeError> {
        let state = self.state.lock();
        let live = state.as_ref().ok_or(BridgeError::InstanceClosed)?;
        Ok(live.store.data().metrics.clone())
    }

    /// Drain the log lines the plugin emitted so far.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InstanceClosed`] after close.
    pub fn take_guest_logs(&self) -> Result<Vec<LogEntry>, BridgeError> {
        let mut state = self.state.lock();
        let live = state.as_mut().ok_or(BridgeError::InstanceClosed)?;
        Ok(live.store.data_mut().take_logs())
    }
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("id", &self.id)
            .field("fuel_metering", &self.fuel_metering)
            .finish_non_exhaustive()
    }
}
