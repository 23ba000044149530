//! Integration tests for plugin-bridge-core.
//!
//! These tests verify the complete call pipeline:
//! - WAT compilation to module
//! - Linking against the host capability set (WASI preview1 + `env::log`)
//! - Startup routine and export validation
//! - Serialized calls, cleanup and metrics

use std::time::{Duration, Instant};

use plugin_bridge_common::{BridgeError, EngineConfig, ExportNames, RuntimeConfig};
use plugin_bridge_core::store::LogLevel;
use plugin_bridge_core::{CompiledModule, InstanceManager, PluginInstance, WasmEngine};
use plugin_bridge_host::create_linker;

const ECHO_PLUGIN: &str = include_str!("fixtures/echo_plugin.wat");

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("plugin_bridge_core=debug,plugin_bridge_host=debug")
        .with_test_writer()
        .try_init();
}

/// Echo plugin that also uses WASI and `env::log` from its startup routine.
fn wasi_echo_plugin() -> String {
    ECHO_PLUGIN
        .replacen(
            "(module\n",
            r#"(module
  (import "wasi_snapshot_preview1" "fd_write"
    (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (import "env" "log" (func $log (param i32 i32 i32)))
"#,
            1,
        )
        .replace(
            "(data (i32.const 16) \"ok:\")",
            r#"(data (i32.const 16) "ok:")
  (data (i32.const 32) "\10\00\00\00\03\00\00\00")"#,
        )
        .replace(
            "(global.set $initialized (i32.const 1)))",
            "(global.set $initialized (i32.const 1))
    (drop (call $fd_write (i32.const 1) (i32.const 32) (i32.const 1) (i32.const 48)))
    (call $log (i32.const 1) (i32.const 16) (i32.const 3)))",
        )
}

fn engine(fuel_metering: bool) -> WasmEngine {
    let config = EngineConfig {
        pooling_allocator: false,
        fuel_metering,
        ..Default::default()
    };
    WasmEngine::new(&config).unwrap()
}

fn manager_with(engine: WasmEngine, config: RuntimeConfig) -> InstanceManager {
    let linker = create_linker(&engine, &config.exports).unwrap();
    InstanceManager::new(engine, linker, config)
}

fn manager() -> InstanceManager {
    manager_with(engine(false), RuntimeConfig::default())
}

fn instantiate(manager: &InstanceManager, wat: &str) -> Result<PluginInstance, BridgeError> {
    let module = CompiledModule::from_wat(manager.engine().inner(), wat)?;
    manager.instantiate(&module)
}

// ============================================================================
// Test: Host Capabilities
// ============================================================================

#[test]
fn test_wasi_plugin_executes() {
    init_tracing();
    let manager = manager();
    let instance = instantiate(&manager, &wasi_echo_plugin()).unwrap();

    assert_eq!(instance.execute(b"payload").unwrap(), b"ok:payload");
}

#[test]
fn test_startup_log_is_captured() {
    init_tracing();
    let manager = manager();
    let instance = instantiate(&manager, &wasi_echo_plugin()).unwrap();

    let logs = instance.take_guest_logs().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].level, LogLevel::Info);
    assert_eq!(logs[0].message, "ok:");

    assert!(instance.take_guest_logs().unwrap().is_empty());
}

#[test]
fn test_unknown_import_fails_instantiation() {
    let manager = manager();
    let wat = ECHO_PLUGIN.replacen(
        "(module\n",
        "(module\n  (import \"env\" \"fetch\" (func (param i32)))\n",
        1,
    );

    assert!(matches!(
        instantiate(&manager, &wat),
        Err(BridgeError::Instantiation { .. })
    ));
}

// ============================================================================
// Test: Module Sharing
// ============================================================================

#[test]
fn test_shared_module_has_independent_instances() {
    let manager = manager();
    let module = CompiledModule::from_wat(manager.engine().inner(), ECHO_PLUGIN).unwrap();

    let first = manager.instantiate(&module).unwrap();
    let second = manager.instantiate(&module).unwrap();
    assert_ne!(first.id(), second.id());

    // Grow only the first instance's memory
    let big = vec![b'a'; 200_000];
    first.execute(&big).unwrap();

    assert!(first.memory_size().unwrap() > second.memory_size().unwrap());
    assert_eq!(second.execute(b"b").unwrap(), b"ok:b");

    first.close();
    assert_eq!(second.execute(b"c").unwrap(), b"ok:c");
}

#[test]
fn test_pooling_allocator_instances() {
    let engine = WasmEngine::new(&EngineConfig {
        max_instances: 4,
        instance_memory_mb: 16,
        ..Default::default()
    })
    .unwrap();
    let manager = manager_with(engine, RuntimeConfig::default());
    let module = CompiledModule::from_wat(manager.engine().inner(), ECHO_PLUGIN).unwrap();

    let instances: Vec<_> = (0..4)
        .map(|_| manager.instantiate(&module).unwrap())
        .collect();

    for (i, instance) in instances.iter().enumerate() {
        let input = format!("pool-{i}");
        assert_eq!(
            instance.execute(input.as_bytes()).unwrap(),
            format!("ok:{input}").into_bytes()
        );
    }
}

// ============================================================================
// Test: Memory Hygiene
// ============================================================================

#[test]
fn test_repeated_calls_do_not_leak() {
    let manager = manager();
    let instance = instantiate(&manager, ECHO_PLUGIN).unwrap();
    let payload = vec![7u8; 100_000];

    instance.execute(&payload).unwrap();
    let baseline = instance.memory_size().unwrap();

    for _ in 0..200 {
        instance.execute(&payload).unwrap();
    }

    assert_eq!(instance.memory_size().unwrap(), baseline);
    assert_eq!(instance.metrics().unwrap().memory_used_bytes, baseline);
}

#[test]
fn test_failed_calls_do_not_leak() {
    init_tracing();
    let manager = manager();
    let instance = instantiate(&manager, ECHO_PLUGIN).unwrap();

    instance.execute(b"warm").unwrap();
    let baseline = instance.memory_size().unwrap();

    for _ in 0..50 {
        assert!(instance.execute(b"fail").is_err());
        assert!(instance.execute(b"oob!").is_err());
        assert!(instance.execute(b"lie!").is_err());
    }

    assert_eq!(instance.memory_size().unwrap(), baseline);
    assert_eq!(instance.execute(b"done").unwrap(), b"ok:done");

    let metrics = instance.metrics().unwrap();
    assert_eq!(metrics.calls_failed, 150);
    assert_eq!(metrics.calls_completed, 2);
}

/// Echo plugin whose exported deallocator and output-clear always trap.
///
/// The internal allocator keeps working, so execute still produces output.
fn trapping_cleanup_plugin() -> String {
    ECHO_PLUGIN
        .replace(
            "(func $free (export \"prost_free\")",
            "(func (export \"prost_free\") (param i32 i32) unreachable)\n  (func $free",
        )
        .replace(
            "(func $clear_output (export \"prost_clear_output\")",
            "(func (export \"prost_clear_output\") unreachable)\n  (func $clear_output",
        )
}

#[test]
fn test_cleanup_failures_do_not_replace_output() {
    init_tracing();
    let manager = manager();
    let instance = instantiate(&manager, &trapping_cleanup_plugin()).unwrap();

    assert_eq!(instance.execute(b"x").unwrap(), b"ok:x");
    assert_eq!(instance.execute(b"next").unwrap(), b"ok:next");

    let metrics = instance.metrics().unwrap();
    assert_eq!(metrics.calls_completed, 2);
    assert_eq!(metrics.calls_failed, 0);

    // A call error still wins over the cleanup failures that follow it
    assert!(matches!(
        instance.execute(b"lie!"),
        Err(BridgeError::OutputLengthMismatch { .. })
    ));
    assert_eq!(instance.execute(b"again").unwrap(), b"ok:again");
}

#[test]
fn test_empty_input_and_large_input() {
    let manager = manager();
    let instance = instantiate(&manager, ECHO_PLUGIN).unwrap();

    assert_eq!(instance.execute(b"").unwrap(), b"ok:");

    let large: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();
    let output = instance.execute(&large).unwrap();
    assert_eq!(&output[..3], b"ok:");
    assert_eq!(&output[3..], large.as_slice());
}

#[test]
fn test_memory_limit_fails_allocation_cleanly() {
    let mut config = RuntimeConfig::default();
    config.execution.max_memory_mb = 1;
    let manager = manager_with(engine(false), config);
    let instance = instantiate(&manager, ECHO_PLUGIN).unwrap();

    let result = instance.execute(&vec![0u8; 2 * 1024 * 1024]);
    assert!(matches!(
        result,
        Err(BridgeError::AllocationFailed { requested, .. }) if requested == 2 * 1024 * 1024
    ));

    assert_eq!(instance.execute(b"small").unwrap(), b"ok:small");
}

// ============================================================================
// Test: Fuel
// ============================================================================

#[test]
fn test_fuel_exhaustion_leaves_instance_usable() {
    init_tracing();
    let mut config = RuntimeConfig::default();
    config.execution.max_fuel = 1_000_000;
    let manager = manager_with(engine(true), config);
    let instance = instantiate(&manager, ECHO_PLUGIN).unwrap();

    let err = instance.execute(b"spin").unwrap_err();
    assert!(matches!(err, BridgeError::FuelExhausted { .. }));
    assert!(err.is_call_scoped());

    assert_eq!(instance.execute(b"after").unwrap(), b"ok:after");
}

// ============================================================================
// Test: Concurrency and Lifecycle
// ============================================================================

#[test]
fn test_separate_instances_run_in_parallel() {
    let manager = manager();
    let module = CompiledModule::from_wat(manager.engine().inner(), ECHO_PLUGIN).unwrap();
    let instances: Vec<_> = (0..4)
        .map(|_| manager.instantiate(&module).unwrap())
        .collect();

    std::thread::scope(|scope| {
        for (t, instance) in instances.iter().enumerate() {
            scope.spawn(move || {
                for i in 0..50 {
                    let input = format!("{t}:{i}");
                    let output = instance.execute(input.as_bytes()).unwrap();
                    assert_eq!(output, format!("ok:{input}").into_bytes());
                }
            });
        }
    });

    for instance in &instances {
        assert_eq!(instance.metrics().unwrap().calls_completed, 50);
    }
}

#[test]
fn test_close_waits_and_rejects_later_calls() {
    let manager = manager();
    let instance = instantiate(&manager, ECHO_PLUGIN).unwrap();

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for _ in 0..20 {
                match instance.execute(b"race") {
                    Ok(output) => assert_eq!(output, b"ok:race"),
                    Err(BridgeError::InstanceClosed) => break,
                    Err(other) => panic!("unexpected error: {other:?}"),
                }
            }
        });
        scope.spawn(|| instance.close());
    });

    assert!(instance.is_closed());
    assert!(matches!(
        instance.execute(b"x"),
        Err(BridgeError::InstanceClosed)
    ));
    assert!(matches!(
        instance.take_guest_logs(),
        Err(BridgeError::InstanceClosed)
    ));
}

#[test]
fn test_expired_deadline_never_touches_instance() {
    let manager = manager();
    let instance = instantiate(&manager, ECHO_PLUGIN).unwrap();

    let start = Instant::now();
    std::thread::sleep(Duration::from_millis(2));
    assert!(matches!(
        instance.execute_before(b"x", start),
        Err(BridgeError::DeadlineExceeded)
    ));

    let metrics = instance.metrics().unwrap();
    assert_eq!(metrics.calls_completed + metrics.calls_failed, 0);
}

#[test]
fn test_custom_export_names() {
    let wat = ECHO_PLUGIN
        .replace("\"prost_malloc\"", "\"alloc\"")
        .replace("\"prost_execute\"", "\"run\"");
    let mut config = RuntimeConfig::default();
    config.exports = ExportNames {
        malloc: "alloc".into(),
        execute: "run".into(),
        ..Default::default()
    };
    let renamed = manager_with(engine(false), config);

    let instance = instantiate(&renamed, &wat).unwrap();
    assert_eq!(instance.execute(b"renamed").unwrap(), b"ok:renamed");

    // The default names no longer resolve
    let default_manager = manager();
    assert!(matches!(
        instantiate(&default_manager, &wat),
        Err(BridgeError::MissingExport { name }) if name == "prost_malloc"
    ));
}
