//! Common types, errors, configuration and log-level bridging for plwasm.
//!
//! This crate provides shared functionality used across the plwasm workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - The config bridge over the host's configuration store
//! - The level translator between host, common and routine severities
//! - Host-side values and routine outcomes

pub mod config;
pub mod config_file;
pub mod error;
pub mod host_config;
pub mod levels;
pub mod log;
pub mod value;

pub use config::{EngineConfig, ExecutionConfig, RuntimeConfig};
pub use config_file::{ConfigFile, ConfigFileError};
pub use error::{
    ManagedError, ManagedErrorKind, MisuseError, NativeFault, RuntimeError, StartupError,
};
pub use host_config::{
    ConfigBridge, ConfigNotFound, ConfigValue, EnvConfig, HostConfig, LayeredConfig, MapConfig,
    keys,
};
pub use levels::{HostLevel, Level, LevelMap, LevelMapError, ManagedLevel, Severity};
pub use log::{HostLogSink, LogBridge, MemorySink};
pub use value::{HostValue, RoutineOutcome};
