//! Per-call execution context and store management.
//!
//! This module provides:
//! - [`RoutineContext`]: Per-call state accessible from host functions
//! - [`LogEntry`]: A message the routine logged during the call
//! - [`ExecutionMetrics`]: Performance metrics for each call

use std::sync::Arc;
use std::time::{Duration, Instant};

use wasmtime::{Store, StoreLimits, StoreLimitsBuilder};
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::WasmEngine;
use crate::abi::AbiViolation;
use plwasm_common::{ExecutionConfig, LogBridge, ManagedLevel, RuntimeError};

/// Per-call execution context.
///
/// Holds everything specific to one routine invocation: the call
/// arguments, the result slot, the WASI context chosen by the trust
/// policy and the log bridge. It is created for each call and dropped
/// when the call completes.
///
/// Host functions reach it through [`wasmtime::Caller::data_mut`].
pub struct RoutineContext {
    /// WASI preview1 context for system interface calls.
    wasi: WasiP1Ctx,

    /// Memory limits for this store.
    limits: StoreLimits,

    /// Unique call identifier for tracing.
    pub call_id: String,

    /// Argument payloads; `None` is SQL NULL.
    args: Vec<Option<Vec<u8>>>,

    /// Result payload set by the routine.
    result: Option<Vec<u8>>,

    /// Messages logged by the routine.
    pub logs: Vec<LogEntry>,

    log: Arc<LogBridge>,

    /// Execution metrics.
    pub metrics: ExecutionMetrics,

    /// Execution start time.
    start_time: Instant,
}

/// A single log entry from a routine.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Level the routine asked for.
    pub level: ManagedLevel,

    /// Log message content.
    pub message: String,

    /// Whether the message passed the threshold and reached the host.
    pub forwarded: bool,

    /// Timestamp when the log was recorded.
    pub timestamp: Instant,
}

/// Execution performance metrics.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    /// Fuel consumed during execution.
    pub fuel_consumed: u64,

    /// Total execution duration.
    pub duration: Option<Duration>,
}

impl RoutineContext {
    /// Create a new context for one call.
    pub fn new(
        call_id: String,
        args: Vec<Option<Vec<u8>>>,
        wasi: WasiP1Ctx,
        log: Arc<LogBridge>,
        limits: StoreLimits,
    ) -> Self {
        Self {
            wasi,
            limits,
            call_id,
            args,
            result: None,
            logs: Vec::new(),
            log,
            metrics: ExecutionMetrics::default(),
            start_time: Instant::now(),
        }
    }

    /// The WASI context, for the preview1 linker glue.
    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }

    /// Number of call arguments.
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Argument `index`; the inner `None` is SQL NULL.
    ///
    /// # Errors
    ///
    /// Returns an [`AbiViolation`] if `index` is out of range.
    pub fn arg(&self, index: usize) -> Result<Option<&[u8]>, AbiViolation> {
        self.args
            .get(index)
            .map(Option::as_deref)
            .ok_or_else(|| {
                AbiViolation::new(format!(
                    "argument index {index} out of range ({} arguments)",
                    self.args.len()
                ))
            })
    }

    /// Store the routine's result. A later call replaces an earlier one.
    pub fn set_result(&mut self, bytes: Vec<u8>) {
        self.result = Some(bytes);
    }

    /// Take the routine's result; `None` if it never set one.
    pub fn take_result(&mut self) -> Option<Vec<u8>> {
        self.result.take()
    }

    /// The bridge routine messages are sent through.
    pub fn log_bridge(&self) -> &LogBridge {
        &self.log
    }

    /// Record a routine message and forward it to the host if enabled.
    ///
    /// Returns `true` if the message reached the host.
    pub fn log(&mut self, level: ManagedLevel, message: String) -> bool {
        let forwarded = self.log.emit_managed(level, &message);
        self.logs.push(LogEntry {
            level,
            message,
            forwarded,
            timestamp: Instant::now(),
        });
        forwarded
    }

    /// Finalize metrics after execution.
    pub fn finalize_metrics(&mut self) {
        self.metrics.duration = Some(self.start_time.elapsed());
    }
}

impl std::fmt::Debug for RoutineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutineContext")
            .field("call_id", &self.call_id)
            .field("args", &self.args.len())
            .field("logs", &self.logs.len())
            .finish_non_exhaustive()
    }
}

/// Everything needed to build the store for one call.
pub struct CallSetup {
    /// Unique call identifier.
    pub call_id: String,
    /// Argument payloads; `None` is SQL NULL.
    pub args: Vec<Option<Vec<u8>>>,
    /// WASI context granted by the trust policy.
    pub wasi: WasiP1Ctx,
    /// Log bridge for routine messages.
    pub log: Arc<LogBridge>,
}

/// Create a new Wasmtime store for one routine call.
///
/// Sets the fuel budget when metering is on, the epoch deadline when epoch
/// interruption is on, and the memory limiter.
///
/// # Errors
///
/// Returns an error if fuel cannot be set on the store.
pub fn create_store(
    engine: &WasmEngine,
    config: &ExecutionConfig,
    setup: CallSetup,
) -> Result<Store<RoutineContext>, RuntimeError> {
    let limits = StoreLimitsBuilder::new()
        .memory_size(config.max_memory_bytes())
        .build();
    let context = RoutineContext::new(setup.call_id, setup.args, setup.wasi, setup.log, limits);

    let mut store = Store::new(engine.inner(), context);
    store.limiter(|ctx| &mut ctx.limits);

    if engine.is_fuel_metered() {
        store
            .set_fuel(config.max_fuel)
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to set fuel: {e}")))?;
    }

    if engine.config().epoch_interruption {
        store.set_epoch_deadline(deadline_ticks(config.timeout_ms, engine.config().epoch_tick_ms));
    }

    Ok(store)
}

/// Number of epoch ticks covering `timeout_ms`, rounded up.
fn deadline_ticks(timeout_ms: u64, tick_ms: u64) -> u64 {
    timeout_ms.div_ceil(tick_ms.max(1)).max(1)
}

/// Get remaining fuel from a store.
pub fn get_remaining_fuel(store: &Store<RoutineContext>) -> Option<u64> {
    store.get_fuel().ok()
}

/// Calculate fuel consumed.
pub fn calculate_fuel_consumed(initial_fuel: u64, store: &Store<RoutineContext>) -> u64 {
    let remaining = get_remaining_fuel(store).unwrap_or(0);
    initial_fuel.saturating_sub(remaining)
}
