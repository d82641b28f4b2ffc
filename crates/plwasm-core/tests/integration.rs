//! Integration tests for plwasm-core.
//!
//! These tests verify the complete execution pipeline:
//! - WAT compilation to module
//! - Store creation with fuel, epoch deadline and memory limits
//! - Guest ABI registration
//! - Routine execution and outcome classification
//! - Log routing and metrics collection

use std::sync::Arc;
use std::time::Duration;

use plwasm_common::{
    HostLevel, HostValue, LogBridge, ManagedErrorKind, ManagedLevel, MemorySink, RoutineOutcome,
    RuntimeConfig,
};
use plwasm_core::{CallSetup, CompiledModule, InstanceRunner, RoutineContext, WasmEngine, create_store};
use plwasm_host::linker::create_instance_runner;
use wasmtime::Store;
use wasmtime_wasi::WasiCtxBuilder;

const ECHO_WAT: &str = r#"
    (module
        (import "env" "arg_len" (func $arg_len (param i32) (result i32)))
        (import "env" "arg_read" (func $arg_read (param i32 i32)))
        (import "env" "set_result" (func $set_result (param i32 i32)))
        (memory (export "memory") 1)

        (func (export "echo")
            (local $len i32)
            (local.set $len (call $arg_len (i32.const 0)))
            (if (i32.lt_s (local.get $len) (i32.const 0))
                (then (return)))
            (call $arg_read (i32.const 0) (i32.const 0))
            (call $set_result (i32.const 0) (local.get $len))
        )
    )
"#;

struct Harness {
    engine: WasmEngine,
    runner: InstanceRunner,
    config: RuntimeConfig,
    sink: Arc<MemorySink>,
    log: Arc<LogBridge>,
}

impl Harness {
    fn new(config: RuntimeConfig) -> Self {
        let engine = WasmEngine::new(&config).unwrap();
        let runner = create_instance_runner(engine.inner()).unwrap();
        let sink = Arc::new(MemorySink::new());
        let log = Arc::new(LogBridge::new(sink.clone()).unwrap());
        Self {
            engine,
            runner,
            config,
            sink,
            log,
        }
    }

    fn standard() -> Self {
        Self::new(RuntimeConfig::default())
    }

    fn compile(&self, wat: &str) -> CompiledModule {
        CompiledModule::from_wat(self.engine.inner(), wat).unwrap()
    }

    fn store(&self, args: Vec<Option<Vec<u8>>>) -> Store<RoutineContext> {
        let setup = CallSetup {
            call_id: "test-call".into(),
            args,
            wasi: WasiCtxBuilder::new().build_p1(),
            log: self.log.clone(),
        };
        create_store(&self.engine, &self.config.execution, setup).unwrap()
    }

    async fn run(&self, wat: &str, export: &str, args: Vec<Option<Vec<u8>>>) -> RoutineOutcome {
        let module = self.compile(wat);
        let mut store = self.store(args);
        self.runner.execute_routine(&module, &mut store, export).await
    }
}

fn managed_kind(outcome: &RoutineOutcome) -> Option<ManagedErrorKind> {
    match outcome {
        RoutineOutcome::RecoverableError(err) => Some(err.kind),
        _ => None,
    }
}

// ============================================================================
// Test: Basic Execution
// ============================================================================

#[tokio::test]
async fn test_basic_execution_returns_null() {
    let wat = r#"(module (func (export "noop")))"#;

    let outcome = Harness::standard().run(wat, "noop", Vec::new()).await;

    assert_eq!(outcome, RoutineOutcome::Success(HostValue::Null));
}

#[tokio::test]
async fn test_echo_round_trips_argument() {
    let outcome = Harness::standard()
        .run(ECHO_WAT, "echo", vec![Some(b"hi".to_vec())])
        .await;

    assert_eq!(outcome, RoutineOutcome::Success(HostValue::Text("hi".into())));
}

#[tokio::test]
async fn test_echo_null_argument() {
    let outcome = Harness::standard().run(ECHO_WAT, "echo", vec![None]).await;

    assert_eq!(outcome, RoutineOutcome::Success(HostValue::Null));
}

#[tokio::test]
async fn test_binary_result_is_bytes() {
    let outcome = Harness::standard()
        .run(ECHO_WAT, "echo", vec![Some(vec![0xff, 0xfe])])
        .await;

    assert_eq!(
        outcome,
        RoutineOutcome::Success(HostValue::Bytes(vec![0xff, 0xfe]))
    );
}

// ============================================================================
// Test: Fuel
// ============================================================================

#[tokio::test]
async fn test_fuel_consumption() {
    let wat = r#"
        (module
            (func (export "count")
                (local $i i32)
                (loop $continue
                    (local.set $i (i32.add (local.get $i) (i32.const 1)))
                    (br_if $continue (i32.lt_u (local.get $i) (i32.const 100)))
                )
            )
        )
    "#;

    let harness = Harness::standard();
    let module = harness.compile(wat);
    let mut store = harness.store(Vec::new());

    let outcome = harness.runner.execute_routine(&module, &mut store, "count").await;

    assert!(outcome.is_success());
    assert!(
        store.data().metrics.fuel_consumed > 0,
        "Expected fuel to be consumed, got 0"
    );
    assert!(store.data().metrics.duration.is_some());
}

#[tokio::test]
async fn test_fuel_exhaustion() {
    let wat = r#"
        (module
            (func (export "spin")
                (loop $forever
                    (br $forever)
                )
            )
        )
    "#;

    let mut config = RuntimeConfig::default();
    config.execution.max_fuel = 1000;

    let outcome = Harness::new(config).run(wat, "spin", Vec::new()).await;

    assert_eq!(managed_kind(&outcome), Some(ManagedErrorKind::FuelExhausted));
}

// ============================================================================
// Test: Wall-clock Timeout
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_epoch_timeout() {
    let wat = r#"
        (module
            (func (export "spin")
                (loop $forever
                    (br $forever)
                )
            )
        )
    "#;

    let mut config = RuntimeConfig::default();
    config.execution.fuel_metering = false;
    config.execution.timeout_ms = 50;

    let harness = Harness::new(config);
    let ticker = harness
        .engine
        .start_epoch_ticker(&tokio::runtime::Handle::current())
        .unwrap();

    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        harness.run(wat, "spin", Vec::new()),
    )
    .await
    .expect("routine should be interrupted by the epoch deadline");
    ticker.abort();

    assert_eq!(managed_kind(&outcome), Some(ManagedErrorKind::Timeout));
}

// ============================================================================
// Test: Guest Raise and Traps
// ============================================================================

#[tokio::test]
async fn test_raise_preserves_message() {
    let wat = r#"
        (module
            (import "env" "raise" (func $raise (param i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 0) "division by zero")
            (func (export "fail")
                (call $raise (i32.const 0) (i32.const 16))
                unreachable
            )
        )
    "#;

    let outcome = Harness::standard().run(wat, "fail", Vec::new()).await;

    match outcome {
        RoutineOutcome::RecoverableError(err) => {
            assert_eq!(err.kind, ManagedErrorKind::Raised);
            assert_eq!(err.message, "division by zero");
        }
        other => panic!("expected raise, got {other:?}"),
    }
}

#[tokio::test]
async fn test_trap_unreachable() {
    let wat = r#"
        (module
            (func (export "boom")
                unreachable
            )
        )
    "#;

    let outcome = Harness::standard().run(wat, "boom", Vec::new()).await;

    match outcome {
        RoutineOutcome::RecoverableError(err) => {
            assert_eq!(err.kind, ManagedErrorKind::Trap);
            assert_eq!(err.code.as_deref(), Some("UnreachableCodeReached"));
        }
        other => panic!("expected trap, got {other:?}"),
    }
}

#[tokio::test]
async fn test_trap_in_start_function() {
    let wat = r#"
        (module
            (func $init unreachable)
            (start $init)
            (func (export "never"))
        )
    "#;

    let outcome = Harness::standard().run(wat, "never", Vec::new()).await;

    assert_eq!(managed_kind(&outcome), Some(ManagedErrorKind::Trap));
}

// ============================================================================
// Test: Export and ABI Contract
// ============================================================================

#[tokio::test]
async fn test_missing_export() {
    let outcome = Harness::standard().run(ECHO_WAT, "nope", Vec::new()).await;

    match outcome {
        RoutineOutcome::RecoverableError(err) => {
            assert_eq!(err.kind, ManagedErrorKind::MissingExport);
            assert!(err.message.contains("nope"));
        }
        other => panic!("expected missing export, got {other:?}"),
    }
}

#[tokio::test]
async fn test_wrong_signature_is_missing_export() {
    let wat = r#"(module (func (export "add") (param i32 i32) (result i32) (i32.const 0)))"#;

    let outcome = Harness::standard().run(wat, "add", Vec::new()).await;

    match outcome {
        RoutineOutcome::RecoverableError(err) => {
            assert_eq!(err.kind, ManagedErrorKind::MissingExport);
            assert!(err.message.contains("signature"));
        }
        other => panic!("expected missing export, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_import_is_abi_violation() {
    let wat = r#"
        (module
            (import "env" "launch_missiles" (func))
            (func (export "go"))
        )
    "#;

    let outcome = Harness::standard().run(wat, "go", Vec::new()).await;

    assert_eq!(managed_kind(&outcome), Some(ManagedErrorKind::AbiViolation));
}

#[tokio::test]
async fn test_out_of_bounds_pointer_is_abi_violation() {
    let wat = r#"
        (module
            (import "env" "set_result" (func $set_result (param i32 i32)))
            (memory (export "memory") 1)
            (func (export "bad")
                (call $set_result (i32.const 65530) (i32.const 100))
            )
        )
    "#;

    let outcome = Harness::standard().run(wat, "bad", Vec::new()).await;

    assert_eq!(managed_kind(&outcome), Some(ManagedErrorKind::AbiViolation));
}

#[tokio::test]
async fn test_argument_index_out_of_range() {
    let outcome = Harness::standard().run(ECHO_WAT, "echo", Vec::new()).await;

    assert_eq!(managed_kind(&outcome), Some(ManagedErrorKind::AbiViolation));
}

#[tokio::test]
async fn test_missing_memory_export() {
    let wat = r#"
        (module
            (import "env" "set_result" (func $set_result (param i32 i32)))
            (func (export "nomem")
                (call $set_result (i32.const 0) (i32.const 0))
            )
        )
    "#;

    let outcome = Harness::standard().run(wat, "nomem", Vec::new()).await;

    assert_eq!(managed_kind(&outcome), Some(ManagedErrorKind::AbiViolation));
}

// ============================================================================
// Test: Memory Limit
// ============================================================================

#[tokio::test]
async fn test_memory_growth_beyond_limit_fails_in_guest() {
    // memory.grow returns -1 when the limiter refuses; the routine reports it.
    let wat = r#"
        (module
            (import "env" "set_result" (func $set_result (param i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 0) "01")
            (func (export "grow")
                (call $set_result
                    (select
                        (i32.const 0)
                        (i32.const 1)
                        (i32.eq (memory.grow (i32.const 64)) (i32.const -1)))
                    (i32.const 1))
            )
        )
    "#;

    let mut config = RuntimeConfig::default();
    config.execution.max_memory_mb = 1;

    let outcome = Harness::new(config).run(wat, "grow", Vec::new()).await;

    assert_eq!(outcome, RoutineOutcome::Success(HostValue::Text("0".into())));
}

// ============================================================================
// Test: Log Routing
// ============================================================================

#[tokio::test]
async fn test_logs_are_filtered_and_translated() {
    let wat = r#"
        (module
            (import "env" "log" (func $log (param i32 i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 0) "First message")
            (data (i32.const 20) "Second message")
            (data (i32.const 40) "Error message")

            (func (export "chatty")
                ;; info
                (call $log (i32.const 2) (i32.const 0) (i32.const 13))
                ;; warn
                (call $log (i32.const 3) (i32.const 20) (i32.const 14))
                ;; error
                (call $log (i32.const 4) (i32.const 40) (i32.const 13))
            )
        )
    "#;

    let harness = Harness::standard();
    let module = harness.compile(wat);
    let mut store = harness.store(Vec::new());

    let outcome = harness.runner.execute_routine(&module, &mut store, "chatty").await;
    assert!(outcome.is_success());

    let logs = &store.data().logs;
    assert_eq!(logs.len(), 3);
    assert_eq!(logs[0].level, ManagedLevel::Info);
    assert!(!logs[0].forwarded);
    assert_eq!(logs[1].level, ManagedLevel::Warn);
    assert!(logs[1].forwarded);

    // The default threshold is warning.
    assert_eq!(
        harness.sink.entries(),
        vec![
            (HostLevel::Warning, "Second message".to_string()),
            (HostLevel::Error, "Error message".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_log_enabled_reports_threshold() {
    let wat = r#"
        (module
            (import "env" "log_enabled" (func $enabled (param i32) (result i32)))
            (import "env" "set_result" (func $set_result (param i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 0) "01")
            (func (export "probe")
                (call $set_result (call $enabled (i32.const 1)) (i32.const 1))
            )
        )
    "#;

    let harness = Harness::standard();
    let outcome = harness.run(wat, "probe", Vec::new()).await;
    assert_eq!(outcome, RoutineOutcome::Success(HostValue::Text("0".into())));

    harness.log.set_active_level(plwasm_common::Severity::Debug);
    let outcome = harness.run(wat, "probe", Vec::new()).await;
    assert_eq!(outcome, RoutineOutcome::Success(HostValue::Text("1".into())));
}

#[tokio::test]
async fn test_invalid_utf8_log_is_abi_violation() {
    let wat = r#"
        (module
            (import "env" "log" (func $log (param i32 i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 0) "\ff\fe")
            (func (export "garbled")
                (call $log (i32.const 4) (i32.const 0) (i32.const 2))
            )
        )
    "#;

    let outcome = Harness::standard().run(wat, "garbled", Vec::new()).await;

    assert_eq!(managed_kind(&outcome), Some(ManagedErrorKind::AbiViolation));
}
