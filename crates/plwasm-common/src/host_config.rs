//! Read-only access to the host's configuration store.
//!
//! The host owns its configuration; the bridge only looks values up by name.
//! An absent key is [`ConfigNotFound`], never a panic, and callers decide
//! whether absence is fatal.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::error::StartupError;
use crate::levels::HostLevel;

/// Configuration keys recognised by the bridge.
pub mod keys {
    /// Directories searched for routine modules. Required.
    pub const MODULE_PATH: &str = "plwasm.module_path";
    /// Initial log threshold, as a host level name.
    pub const LOG_MIN_MESSAGES: &str = "plwasm.log_min_messages";
    /// Fuel available to one call.
    pub const MAX_FUEL: &str = "plwasm.max_fuel";
    /// Enable fuel metering.
    pub const FUEL_METERING: &str = "plwasm.fuel_metering";
    /// Wall-clock limit for one call.
    pub const TIMEOUT_MS: &str = "plwasm.timeout_ms";
    /// Linear memory limit for one call.
    pub const MAX_MEMORY_MB: &str = "plwasm.max_memory_mb";
    /// Enable the pooling allocator.
    pub const POOLING_ALLOCATOR: &str = "plwasm.pooling_allocator";
    /// Pool size when pooling is enabled.
    pub const MAX_INSTANCES: &str = "plwasm.max_instances";
    /// Enable epoch-based interruption.
    pub const EPOCH_INTERRUPTION: &str = "plwasm.epoch_interruption";
}

/// The host's configuration store.
pub trait HostConfig: Send + Sync {
    /// Look up a raw value.
    fn get(&self, key: &str) -> Option<String>;
}

/// In-memory configuration store.
#[derive(Debug, Clone, Default)]
pub struct MapConfig {
    values: HashMap<String, String>,
}

impl MapConfig {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a value.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Add or replace a value in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl HostConfig for MapConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Configuration read from process environment variables.
///
/// `plwasm.max_fuel` is read from `PLWASM_MAX_FUEL`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvConfig;

impl EnvConfig {
    /// Environment variable name for a configuration key.
    pub fn var_name(key: &str) -> String {
        key.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl HostConfig for EnvConfig {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(Self::var_name(key)).ok()
    }
}

/// Several stores consulted in order; the first hit wins.
#[derive(Default)]
pub struct LayeredConfig {
    layers: Vec<Arc<dyn HostConfig>>,
}

impl LayeredConfig {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a lower-priority layer.
    #[must_use]
    pub fn layer(mut self, config: Arc<dyn HostConfig>) -> Self {
        self.layers.push(config);
        self
    }
}

impl HostConfig for LayeredConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.layers.iter().find_map(|layer| layer.get(key))
    }
}

impl std::fmt::Debug for LayeredConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredConfig")
            .field("layers", &self.layers.len())
            .finish()
    }
}

/// A key was not present in the host configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Configuration key not found: {key}")]
pub struct ConfigNotFound {
    /// The key that was looked up.
    pub key: String,
}

/// A configuration value together with the key it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValue {
    key: String,
    raw: String,
}

impl ConfigValue {
    /// Wrap a raw value.
    pub fn new(key: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            raw: raw.into(),
        }
    }

    /// The key this value was read from.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The raw text.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Interpret as a boolean, the way the host does.
    pub fn as_bool(&self) -> Result<bool, StartupError> {
        match self.raw.trim().to_ascii_lowercase().as_str() {
            "on" | "true" | "yes" | "1" => Ok(true),
            "off" | "false" | "no" | "0" => Ok(false),
            other => Err(self.invalid(format!("expected a boolean, got '{other}'"))),
        }
    }

    /// Interpret as an unsigned integer. Underscores are accepted as separators.
    pub fn as_u64(&self) -> Result<u64, StartupError> {
        self.raw
            .trim()
            .replace('_', "")
            .parse()
            .map_err(|e| self.invalid(format!("expected an unsigned integer: {e}")))
    }

    pub fn as_u32(&self) -> Result<u32, StartupError> {
        let value = self.as_u64()?;
        u32::try_from(value).map_err(|_| self.invalid(format!("{value} is out of range")))
    }

    /// Interpret as a list of paths in the platform's path-list syntax.
    pub fn as_paths(&self) -> Result<Vec<PathBuf>, StartupError> {
        let paths: Vec<PathBuf> = std::env::split_paths(self.raw.trim())
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        if paths.is_empty() {
            return Err(self.invalid("path list is empty"));
        }
        Ok(paths)
    }

    /// Interpret as a host level name.
    pub fn as_host_level(&self) -> Result<HostLevel, StartupError> {
        self.raw.parse().map_err(|e| self.invalid(format!("{e}")))
    }

    fn invalid(&self, reason: impl Into<String>) -> StartupError {
        StartupError::config_invalid(&self.key, reason)
    }
}

/// Typed, read-only view over the host configuration store.
#[derive(Clone)]
pub struct ConfigBridge {
    store: Arc<dyn HostConfig>,
}

impl ConfigBridge {
    /// Wrap a host store.
    pub fn new(store: Arc<dyn HostConfig>) -> Self {
        Self { store }
    }

    /// Look up a key.
    pub fn read(&self, key: &str) -> Result<ConfigValue, ConfigNotFound> {
        self.store
            .get(key)
            .map(|raw| ConfigValue::new(key, raw))
            .ok_or_else(|| ConfigNotFound {
                key: key.to_string(),
            })
    }

    /// Look up a key whose absence prevents startup.
    pub fn require(&self, key: &str) -> Result<ConfigValue, StartupError> {
        self.read(key)
            .map_err(|missing| StartupError::config_missing(missing.key))
    }

    /// Look up an optional key and parse it, falling back to `default`.
    pub fn read_or<T>(
        &self,
        key: &str,
        default: T,
        parse: impl FnOnce(&ConfigValue) -> Result<T, StartupError>,
    ) -> Result<T, StartupError> {
        match self.read(key) {
            Ok(value) => parse(&value),
            Err(ConfigNotFound { .. }) => {
                debug!(key, "Configuration key not set, using default");
                Ok(default)
            }
        }
    }
}

impl std::fmt::Debug for ConfigBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigBridge").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge(config: MapConfig) -> ConfigBridge {
        ConfigBridge::new(Arc::new(config))
    }

    #[test]
    fn test_read_present_and_absent() {
        let bridge = bridge(MapConfig::new().with(keys::MAX_FUEL, "500"));

        let value = bridge.read(keys::MAX_FUEL).unwrap();
        assert_eq!(value.key(), keys::MAX_FUEL);
        assert_eq!(value.as_u64().unwrap(), 500);

        let missing = bridge.read("plwasm.nope").unwrap_err();
        assert_eq!(missing.key, "plwasm.nope");
    }

    #[test]
    fn test_require_missing_is_config_missing() {
        let bridge = bridge(MapConfig::new());
        assert_eq!(
            bridge.require(keys::MODULE_PATH).unwrap_err(),
            StartupError::config_missing(keys::MODULE_PATH)
        );
    }

    #[test]
    fn test_bool_parsing() {
        for raw in ["on", "TRUE", "yes", "1"] {
            assert!(ConfigValue::new("k", raw).as_bool().unwrap());
        }
        for raw in ["off", "False", "no", "0"] {
            assert!(!ConfigValue::new("k", raw).as_bool().unwrap());
        }
        let err = ConfigValue::new("k", "maybe").as_bool().unwrap_err();
        assert!(matches!(err, StartupError::ConfigInvalid { ref key, .. } if key == "k"));
    }

    #[test]
    fn test_integer_parsing() {
        assert_eq!(ConfigValue::new("k", "10_000").as_u64().unwrap(), 10_000);
        assert!(ConfigValue::new("k", "-1").as_u64().is_err());
        assert!(ConfigValue::new("k", "5000000000").as_u32().is_err());
    }

    #[test]
    fn test_paths_parsing() {
        let joined = std::env::join_paths(["/a", "/b"]).unwrap();
        let value = ConfigValue::new("k", joined.to_string_lossy());
        assert_eq!(
            value.as_paths().unwrap(),
            vec![PathBuf::from("/a"), PathBuf::from("/b")]
        );
        assert!(ConfigValue::new("k", "").as_paths().is_err());
    }

    #[test]
    fn test_host_level_parsing() {
        let value = ConfigValue::new(keys::LOG_MIN_MESSAGES, "notice");
        assert_eq!(value.as_host_level().unwrap(), HostLevel::Notice);
        assert!(ConfigValue::new("k", "chatty").as_host_level().is_err());
    }

    #[test]
    fn test_read_or_default() {
        let bridge = bridge(MapConfig::new().with(keys::TIMEOUT_MS, "250"));
        assert_eq!(
            bridge.read_or(keys::TIMEOUT_MS, 1000, ConfigValue::as_u64).unwrap(),
            250
        );
        assert_eq!(
            bridge.read_or(keys::MAX_FUEL, 7, ConfigValue::as_u64).unwrap(),
            7
        );
    }

    #[test]
    fn test_layered_first_hit_wins() {
        let top = MapConfig::new().with("a", "top");
        let bottom = MapConfig::new().with("a", "bottom").with("b", "bottom");
        let layered = LayeredConfig::new()
            .layer(Arc::new(top))
            .layer(Arc::new(bottom));

        assert_eq!(layered.get("a").as_deref(), Some("top"));
        assert_eq!(layered.get("b").as_deref(), Some("bottom"));
        assert_eq!(layered.get("c"), None);
    }

    #[test]
    fn test_env_var_name() {
        assert_eq!(EnvConfig::var_name(keys::MAX_FUEL), "PLWASM_MAX_FUEL");
        assert_eq!(EnvConfig::var_name("a.b-c"), "A_B_C");
    }

    #[test]
    fn test_map_config_from_iter() {
        let config: MapConfig = [("a", "1"), ("b", "2")].into_iter().collect();
        assert_eq!(config.len(), 2);
        assert_eq!(config.get("b").as_deref(), Some("2"));
    }
}
