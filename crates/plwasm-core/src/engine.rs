//! Wasmtime engine configuration and creation.
//!
//! The [`WasmEngine`] is the foundation of the embedded runtime. It is:
//! - Created once per process, when the runtime starts
//! - Shared by every routine call, holding no per-call state
//! - Set up with fuel metering and epoch interruption for resource limiting

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use wasmtime::{Config, Engine, InstanceAllocationStrategy, PoolingAllocationConfig};

use plwasm_common::{EngineConfig, RuntimeConfig, RuntimeError};

/// Thread-safe WebAssembly engine wrapper.
///
/// # Configuration
///
/// The engine is configured with:
/// - **Fuel Metering**: Deterministic CPU limiting, when enabled for calls
/// - **Epoch Interruption**: Wall-clock limiting driven by a ticker task
/// - **Async Support**: Calls run as futures on the runtime's executor
/// - **Pooling Allocator**: Optional pre-allocated instance slots
///
/// # Example
///
/// ```ignore
/// use plwasm_common::RuntimeConfig;
/// use plwasm_core::WasmEngine;
///
/// let engine = WasmEngine::new(&RuntimeConfig::default())?;
/// ```
#[derive(Clone)]
pub struct WasmEngine {
    engine: Arc<Engine>,
    config: EngineConfig,
    fuel_metering: bool,
}

impl WasmEngine {
    /// Create a new WebAssembly engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The Wasmtime configuration is invalid
    /// - The pooling allocator cannot be initialized
    pub fn new(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        let engine_config = &config.engine;
        let mut wasmtime_config = Config::new();

        wasmtime_config.async_support(true);

        // Fuel must be enabled on the engine for stores to be given fuel.
        wasmtime_config.consume_fuel(config.execution.fuel_metering);

        if engine_config.epoch_interruption {
            wasmtime_config.epoch_interruption(true);
        }

        wasmtime_config.cranelift_opt_level(wasmtime::OptLevel::Speed);

        if engine_config.pooling_allocator {
            let pooling_config = Self::create_pooling_config(engine_config);

            wasmtime_config
                .allocation_strategy(InstanceAllocationStrategy::Pooling(pooling_config));

            info!(
                max_instances = engine_config.max_instances,
                instance_memory_mb = engine_config.instance_memory_mb,
                "Pooling allocator enabled"
            );
        }

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            RuntimeError::invalid_config(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!(
            fuel_metering = config.execution.fuel_metering,
            epoch_interruption = engine_config.epoch_interruption,
            "Wasmtime engine initialized"
        );

        Ok(Self {
            engine: Arc::new(engine),
            config: engine_config.clone(),
            fuel_metering: config.execution.fuel_metering,
        })
    }

    /// Create pooling allocation configuration.
    fn create_pooling_config(config: &EngineConfig) -> PoolingAllocationConfig {
        let mut pooling = PoolingAllocationConfig::default();

        pooling.total_core_instances(config.max_instances);
        pooling.total_memories(config.max_instances);
        pooling.total_tables(config.max_instances);

        let max_memory_bytes = (config.instance_memory_mb as usize) * 1024 * 1024;
        pooling.max_memory_size(max_memory_bytes);

        pooling
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns `true` if stores must be given fuel before running.
    pub fn is_fuel_metered(&self) -> bool {
        self.fuel_metering
    }

    /// Spawn the task that advances the epoch once per tick.
    ///
    /// Returns `None` when epoch interruption is disabled. The task runs
    /// until it is aborted or its runtime shuts down.
    pub fn start_epoch_ticker(&self, handle: &Handle) -> Option<JoinHandle<()>> {
        if !self.config.epoch_interruption {
            return None;
        }

        let engine = Arc::clone(&self.engine);
        let tick = self.config.epoch_tick();
        debug!(tick_ms = tick.as_millis(), "Starting epoch ticker");

        Some(handle.spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                engine.increment_epoch();
            }
        }))
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("pooling_allocator", &self.config.pooling_allocator)
            .field("epoch_interruption", &self.config.epoch_interruption)
            .field("fuel_metering", &self.fuel_metering)
            .finish_non_exhaustive()
    }
}
