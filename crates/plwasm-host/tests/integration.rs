//! Integration tests for plwasm-host.
//!
//! These tests run real routines against the guest ABI with WASI contexts
//! built from each trust tier.

use std::sync::Arc;

use plwasm_common::{HostValue, LogBridge, MemorySink, RoutineOutcome, RuntimeConfig};
use plwasm_core::{CallSetup, CompiledModule, WasmEngine, create_store};
use plwasm_host::{TracingSink, TrustPolicy, TrustSwitch, TrustTier, create_instance_runner};

/// Reports "1" if the routine can see any environment variable, else "0".
const ENV_PROBE_WAT: &str = r#"
    (module
        (import "wasi_snapshot_preview1" "environ_sizes_get"
            (func $sizes (param i32 i32) (result i32)))
        (import "env" "set_result" (func $set_result (param i32 i32)))
        (memory (export "memory") 1)
        (data (i32.const 100) "01")
        (func (export "env_probe")
            (drop (call $sizes (i32.const 0) (i32.const 4)))
            (call $set_result
                (select (i32.const 101) (i32.const 100) (i32.load (i32.const 0)))
                (i32.const 1))
        )
    )
"#;

/// Reports "1" if a preopened directory is visible, else "0".
const PREOPEN_PROBE_WAT: &str = r#"
    (module
        (import "wasi_snapshot_preview1" "fd_prestat_get"
            (func $prestat (param i32 i32) (result i32)))
        (import "env" "set_result" (func $set_result (param i32 i32)))
        (memory (export "memory") 1)
        (data (i32.const 100) "01")
        (func (export "preopen_probe")
            (call $set_result
                (select
                    (i32.const 101)
                    (i32.const 100)
                    (i32.eqz (call $prestat (i32.const 3) (i32.const 0))))
                (i32.const 1))
        )
    )
"#;

fn policy(tier: TrustTier) -> TrustPolicy {
    let mut switch = TrustSwitch::new();
    switch.set_posture(tier);
    switch.seal()
}

fn run_probe(tier: TrustTier, wat: &str, export: &str) -> RoutineOutcome {
    let config = RuntimeConfig::default();
    let engine = WasmEngine::new(&config).unwrap();
    let runner = create_instance_runner(engine.inner()).unwrap();
    let module = CompiledModule::from_wat(engine.inner(), wat).unwrap();

    let setup = CallSetup {
        call_id: format!("probe-{tier}"),
        args: Vec::new(),
        wasi: policy(tier).wasi_context().unwrap(),
        log: Arc::new(LogBridge::new(Arc::new(TracingSink::new())).unwrap()),
    };
    let mut store = create_store(&engine, &config.execution, setup).unwrap();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(runner.execute_routine(&module, &mut store, export))
}

// ============================================================================
// Test: Trusted Tier Is Sandboxed
// ============================================================================

#[test]
fn test_trusted_hides_environment() {
    let outcome = run_probe(TrustTier::Trusted, ENV_PROBE_WAT, "env_probe");
    assert_eq!(outcome, RoutineOutcome::Success(HostValue::Text("0".into())));
}

#[test]
fn test_trusted_has_no_preopens() {
    let outcome = run_probe(TrustTier::Trusted, PREOPEN_PROBE_WAT, "preopen_probe");
    assert_eq!(outcome, RoutineOutcome::Success(HostValue::Text("0".into())));
}

// ============================================================================
// Test: Untrusted Tier Has Host Access
// ============================================================================

#[test]
fn test_untrusted_sees_environment() {
    // The test harness always runs with a non-empty environment.
    let outcome = run_probe(TrustTier::Untrusted, ENV_PROBE_WAT, "env_probe");
    assert_eq!(outcome, RoutineOutcome::Success(HostValue::Text("1".into())));
}

#[test]
fn test_untrusted_preopens_host_root() {
    let outcome = run_probe(TrustTier::Untrusted, PREOPEN_PROBE_WAT, "preopen_probe");
    assert_eq!(outcome, RoutineOutcome::Success(HostValue::Text("1".into())));
}

// ============================================================================
// Test: Log Routing Through The Host Sink
// ============================================================================

#[test]
fn test_routine_logs_reach_memory_sink() {
    let wat = r#"
        (module
            (import "env" "log" (func $log (param i32 i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 0) "fatal thing")
            (func (export "shout")
                (call $log (i32.const 9) (i32.const 0) (i32.const 11))
            )
        )
    "#;

    let config = RuntimeConfig::default();
    let engine = WasmEngine::new(&config).unwrap();
    let runner = create_instance_runner(engine.inner()).unwrap();
    let module = CompiledModule::from_wat(engine.inner(), wat).unwrap();

    let sink = Arc::new(MemorySink::new());
    let setup = CallSetup {
        call_id: "log-test".into(),
        args: Vec::new(),
        wasi: policy(TrustTier::Trusted).wasi_context().unwrap(),
        log: Arc::new(LogBridge::new(sink.clone()).unwrap()),
    };
    let mut store = create_store(&engine, &config.execution, setup).unwrap();

    let outcome = tokio_test::block_on(runner.execute_routine(&module, &mut store, "shout"));

    assert!(outcome.is_success());
    // Codes above 5 round to fatal.
    assert_eq!(
        sink.entries(),
        vec![(plwasm_common::HostLevel::Fatal, "fatal thing".to_string())]
    );
}
