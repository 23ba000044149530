//! Logging host function implementation.
//!
//! Guest log lines are kept in the instance's [`BridgeContext`] and forwarded
//! to `tracing`, tagged with the instance id.

use plugin_bridge_core::store::{BridgeContext, LogLevel};
use tracing::{debug, error, info, warn};

/// Host implementation for the `env::log` import.
///
/// Logs are both:
/// 1. Stored in the [`BridgeContext`] for later retrieval
/// 2. Emitted via the `tracing` crate for observability
pub struct LoggingHost;

impl LoggingHost {
    /// Log a message at the specified level.
    pub fn log(ctx: &mut BridgeContext, level: LogLevel, message: &str) {
        ctx.log(level, message.to_string());

        let instance_id = ctx.instance_id().to_string();
        match level {
            LogLevel::Debug => debug!(instance_id, guest_log = true, "{}", message),
            LogLevel::Info => info!(instance_id, guest_log = true, "{}", message),
            LogLevel::Warn => warn!(instance_id, guest_log = true, "{}", message),
            LogLevel::Error => error!(instance_id, guest_log = true, "{}", message),
        }
    }
}

/// Convert a numeric log level to [`LogLevel`].
///
/// 0=debug, 1=info, 2=warn, 3=error. Unknown values map to info.
pub fn level_from_i32(level: i32) -> LogLevel {
    match level {
        0 => LogLevel::Debug,
        2 => LogLevel::Warn,
        3 => LogLevel::Error,
        _ => LogLevel::Info,
    }
}
