//! Running plugin calls from async code.

use std::sync::Arc;

use tracing::{Instrument, debug_span};

use plugin_bridge_common::BridgeError;
use plugin_bridge_core::PluginInstance;

/// Run [`PluginInstance::execute`] on tokio's blocking pool.
///
/// Plugin calls are synchronous and may run for a long time, so they must not
/// occupy an async worker thread.
///
/// # Errors
///
/// Returns the call's own error, or [`BridgeError::Worker`] if the blocking
/// task panicked or was cancelled.
pub async fn execute_async(
    instance: Arc<PluginInstance>,
    input: Vec<u8>,
) -> Result<Vec<u8>, BridgeError> {
    let span = debug_span!("execute_async", instance_id = %instance.id());

    tokio::task::spawn_blocking(move || instance.execute(&input))
        .instrument(span)
        .await
        .map_err(|e| BridgeError::Worker {
            reason: e.to_string(),
        })?
}
