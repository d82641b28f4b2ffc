//! Configuration structures for the embedded runtime.
//!
//! This module defines configuration options for the runtime:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings (pooling, epoch interruption)
//! - [`ExecutionConfig`]: Per-call execution limits (fuel, memory, timeout)
//!
//! Values come from the host configuration store through
//! [`RuntimeConfig::from_bridge`]; anything the host does not set keeps the
//! defaults below.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StartupError;
use crate::host_config::{ConfigBridge, ConfigValue, keys};

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-call execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,
}

impl RuntimeConfig {
    /// Read every runtime setting from the host configuration.
    ///
    /// Absent keys keep their defaults; present but malformed keys fail.
    pub fn from_bridge(config: &ConfigBridge) -> Result<Self, StartupError> {
        let engine = EngineConfig {
            pooling_allocator: config.read_or(
                keys::POOLING_ALLOCATOR,
                defaults::pooling_allocator(),
                ConfigValue::as_bool,
            )?,
            max_instances: config.read_or(
                keys::MAX_INSTANCES,
                defaults::max_instances(),
                ConfigValue::as_u32,
            )?,
            instance_memory_mb: defaults::instance_memory_mb(),
            epoch_interruption: config.read_or(
                keys::EPOCH_INTERRUPTION,
                defaults::epoch_interruption(),
                ConfigValue::as_bool,
            )?,
            epoch_tick_ms: defaults::epoch_tick_ms(),
        };

        let execution = ExecutionConfig {
            max_fuel: config.read_or(keys::MAX_FUEL, defaults::max_fuel(), ConfigValue::as_u64)?,
            timeout_ms: config.read_or(
                keys::TIMEOUT_MS,
                defaults::timeout_ms(),
                ConfigValue::as_u64,
            )?,
            max_memory_mb: config.read_or(
                keys::MAX_MEMORY_MB,
                defaults::max_memory_mb(),
                ConfigValue::as_u32,
            )?,
            fuel_metering: config.read_or(
                keys::FUEL_METERING,
                defaults::fuel_metering(),
                ConfigValue::as_bool,
            )?,
        };

        let config = Self { engine, execution };
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the engine cannot honour.
    pub fn validate(&self) -> Result<(), StartupError> {
        if self.execution.fuel_metering && self.execution.max_fuel == 0 {
            return Err(StartupError::config_invalid(
                keys::MAX_FUEL,
                "must be positive when fuel metering is enabled",
            ));
        }
        if self.engine.epoch_interruption && self.execution.timeout_ms == 0 {
            return Err(StartupError::config_invalid(
                keys::TIMEOUT_MS,
                "must be positive when epoch interruption is enabled",
            ));
        }
        if self.engine.pooling_allocator && self.engine.max_instances == 0 {
            return Err(StartupError::config_invalid(
                keys::MAX_INSTANCES,
                "must be positive when the pooling allocator is enabled",
            ));
        }
        if self.execution.max_memory_mb == 0 {
            return Err(StartupError::config_invalid(
                keys::MAX_MEMORY_MB,
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Wasmtime engine configuration.
///
/// These settings affect the engine shared by every call in the process.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable pooling allocator for fast instance creation.
    ///
    /// The pool reserves address space for every slot at engine creation.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the pool.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per instance slot in megabytes.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Enable epoch-based interruption.
    ///
    /// A ticker thread advances the epoch so a routine that never returns
    /// can be stopped at its deadline.
    #[serde(default = "defaults::epoch_interruption")]
    pub epoch_interruption: bool,

    /// Interval between epoch ticks in milliseconds.
    #[serde(default = "defaults::epoch_tick_ms")]
    pub epoch_tick_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: defaults::pooling_allocator(),
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            epoch_interruption: defaults::epoch_interruption(),
            epoch_tick_ms: defaults::epoch_tick_ms(),
        }
    }
}

impl EngineConfig {
    /// Get the epoch tick as a `Duration`.
    pub fn epoch_tick(&self) -> Duration {
        Duration::from_millis(self.epoch_tick_ms.max(1))
    }
}

/// Per-call execution configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Maximum fuel (CPU instructions) per call.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,

    /// Execution timeout in milliseconds.
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum linear memory in megabytes.
    #[serde(default = "defaults::max_memory_mb")]
    pub max_memory_mb: u32,

    /// Enable fuel metering.
    #[serde(default = "defaults::fuel_metering")]
    pub fuel_metering: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_fuel: defaults::max_fuel(),
            timeout_ms: defaults::timeout_ms(),
            max_memory_mb: defaults::max_memory_mb(),
            fuel_metering: defaults::fuel_metering(),
        }
    }
}

impl ExecutionConfig {
    /// Get the timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Memory limit in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        (self.max_memory_mb as usize) * 1024 * 1024
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn pooling_allocator() -> bool {
        false
    }

    pub const fn max_instances() -> u32 {
        16
    }

    pub const fn instance_memory_mb() -> u32 {
        128
    }

    pub const fn epoch_interruption() -> bool {
        true
    }

    pub const fn epoch_tick_ms() -> u64 {
        1
    }

    pub const fn max_fuel() -> u64 {
        10_000_000
    }

    pub const fn timeout_ms() -> u64 {
        1000
    }

    pub const fn max_memory_mb() -> u32 {
        128
    }

    pub const fn fuel_metering() -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::host_config::MapConfig;

    fn bridge(config: MapConfig) -> ConfigBridge {
        ConfigBridge::new(Arc::new(config))
    }

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();

        assert!(!config.engine.pooling_allocator);
        assert_eq!(config.engine.max_instances, 16);
        assert!(config.engine.epoch_interruption);

        assert_eq!(config.execution.max_fuel, 10_000_000);
        assert_eq!(config.execution.timeout_ms, 1000);
        assert_eq!(config.execution.max_memory_mb, 128);
        assert!(config.execution.fuel_metering);
    }

    #[test]
    fn test_from_empty_bridge_is_default() {
        let config = RuntimeConfig::from_bridge(&bridge(MapConfig::new())).unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn test_from_bridge_overrides() {
        let host = MapConfig::new()
            .with(keys::MAX_FUEL, "5000")
            .with(keys::TIMEOUT_MS, "50")
            .with(keys::POOLING_ALLOCATOR, "on")
            .with(keys::MAX_INSTANCES, "4")
            .with(keys::FUEL_METERING, "off");

        let config = RuntimeConfig::from_bridge(&bridge(host)).unwrap();

        assert_eq!(config.execution.max_fuel, 5000);
        assert_eq!(config.execution.timeout_ms, 50);
        assert!(!config.execution.fuel_metering);
        assert!(config.engine.pooling_allocator);
        assert_eq!(config.engine.max_instances, 4);
    }

    #[test]
    fn test_from_bridge_rejects_malformed() {
        let host = MapConfig::new().with(keys::MAX_FUEL, "lots");
        let err = RuntimeConfig::from_bridge(&bridge(host)).unwrap_err();
        assert!(matches!(err, StartupError::ConfigInvalid { ref key, .. } if key == keys::MAX_FUEL));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let host = MapConfig::new().with(keys::TIMEOUT_MS, "0");
        let err = RuntimeConfig::from_bridge(&bridge(host)).unwrap_err();
        assert!(matches!(err, StartupError::ConfigInvalid { ref key, .. } if key == keys::TIMEOUT_MS));

        let host = MapConfig::new()
            .with(keys::TIMEOUT_MS, "0")
            .with(keys::EPOCH_INTERRUPTION, "off");
        assert!(RuntimeConfig::from_bridge(&bridge(host)).is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"engine": {"max_instances": 500}}"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();

        // Explicitly set value
        assert_eq!(config.engine.max_instances, 500);
        // Default values for unspecified fields
        assert!(!config.engine.pooling_allocator);
        assert_eq!(config.execution.max_fuel, 10_000_000);
    }

    #[test]
    fn test_durations() {
        let execution = ExecutionConfig {
            timeout_ms: 500,
            ..Default::default()
        };
        assert_eq!(execution.timeout(), Duration::from_millis(500));
        assert_eq!(execution.max_memory_bytes(), 128 * 1024 * 1024);

        let engine = EngineConfig {
            epoch_tick_ms: 0,
            ..Default::default()
        };
        assert_eq!(engine.epoch_tick(), Duration::from_millis(1));
    }
}
