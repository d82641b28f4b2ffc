//! Host configuration file.
//!
//! The `plwasm` binary stands in for a host server process. Its TOML file
//! carries the host's own flags and the configuration store the bridge reads:
//!
//! ```toml
//! [host]
//! trusted = false
//! log_format = "text"
//!
//! [settings.plwasm]
//! module_path = "./routines"
//! log_min_messages = "info"
//! max_fuel = 5_000_000
//! ```
//!
//! Nested tables under `[settings]` are flattened into dotted keys, so the
//! example above sets `plwasm.module_path`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::host_config::MapConfig;

/// Top-level configuration file structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Host process flags.
    #[serde(default)]
    pub host: HostSection,

    /// Host configuration store contents.
    #[serde(default)]
    pub settings: toml::Table,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }

    /// Flatten `[settings]` into dotted key/value pairs.
    pub fn flattened_settings(&self) -> Result<BTreeMap<String, String>, ConfigFileError> {
        let mut out = BTreeMap::new();
        flatten("", &self.settings, &mut out)?;
        Ok(out)
    }

    /// Build the in-memory configuration store from `[settings]`.
    pub fn host_config(&self) -> Result<MapConfig, ConfigFileError> {
        Ok(self.flattened_settings()?.into_iter().collect())
    }
}

/// Flags the host process itself reads.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostSection {
    /// Run routines in the trusted (sandboxed) tier.
    #[serde(default = "defaults::trusted")]
    pub trusted: bool,

    /// Log output format: `text` or `json`.
    #[serde(default = "defaults::log_format")]
    pub log_format: String,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            trusted: defaults::trusted(),
            log_format: defaults::log_format(),
        }
    }
}

fn flatten(
    prefix: &str,
    table: &toml::Table,
    out: &mut BTreeMap<String, String>,
) -> Result<(), ConfigFileError> {
    for (name, value) in table {
        let key = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };

        let text = match value {
            toml::Value::Table(nested) => {
                flatten(&key, nested, out)?;
                continue;
            }
            toml::Value::String(s) => s.clone(),
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Float(f) => f.to_string(),
            toml::Value::Boolean(b) => (if *b { "on" } else { "off" }).to_string(),
            toml::Value::Array(items) => join_path_list(&key, items)?,
            toml::Value::Datetime(d) => d.to_string(),
        };
        out.insert(key, text);
    }
    Ok(())
}

/// Arrays of strings become a platform path list.
fn join_path_list(key: &str, items: &[toml::Value]) -> Result<String, ConfigFileError> {
    let parts = items
        .iter()
        .map(|item| {
            item.as_str().ok_or_else(|| ConfigFileError::Parse {
                message: format!("setting '{key}' must be an array of strings"),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    std::env::join_paths(parts)
        .map(|joined| joined.to_string_lossy().into_owned())
        .map_err(|e| ConfigFileError::Parse {
            message: format!("setting '{key}': {e}"),
        })
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

/// Default value functions for serde.
mod defaults {
    pub const fn trusted() -> bool {
        true
    }

    pub fn log_format() -> String {
        "text".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::host_config::{HostConfig, keys};

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();

        assert!(config.host.trusted);
        assert_eq!(config.host.log_format, "text");
        assert!(config.settings.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [host]
            trusted = false
            log_format = "json"

            [settings.plwasm]
            module_path = "./routines"
            log_min_messages = "info"
            max_fuel = 5_000_000
            fuel_metering = true
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();
        assert!(!config.host.trusted);
        assert_eq!(config.host.log_format, "json");

        let settings = config.flattened_settings().unwrap();
        assert_eq!(settings[keys::MODULE_PATH], "./routines");
        assert_eq!(settings[keys::LOG_MIN_MESSAGES], "info");
        assert_eq!(settings[keys::MAX_FUEL], "5000000");
        assert_eq!(settings[keys::FUEL_METERING], "on");
    }

    #[test]
    fn test_quoted_dotted_keys() {
        let toml = r#"
            [settings]
            "plwasm.timeout_ms" = 20
        "#;
        let store = ConfigFile::from_toml(toml).unwrap().host_config().unwrap();
        assert_eq!(store.get(keys::TIMEOUT_MS).as_deref(), Some("20"));
    }

    #[test]
    fn test_array_becomes_path_list() {
        let toml = r#"
            [settings.plwasm]
            module_path = ["/srv/a", "/srv/b"]
        "#;
        let settings = ConfigFile::from_toml(toml)
            .unwrap()
            .flattened_settings()
            .unwrap();
        let paths: Vec<_> = std::env::split_paths(&settings[keys::MODULE_PATH]).collect();
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn test_array_of_non_strings_rejected() {
        let toml = r#"
            [settings.plwasm]
            module_path = [1, 2]
        "#;
        let config = ConfigFile::from_toml(toml).unwrap();
        assert!(config.flattened_settings().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[settings.plwasm]\nmodule_path = \"/tmp\"").unwrap();

        let config = ConfigFile::from_file(file.path()).unwrap();
        let store = config.host_config().unwrap();
        assert_eq!(store.get(keys::MODULE_PATH).as_deref(), Some("/tmp"));
    }

    #[test]
    fn test_parse_invalid_toml() {
        let invalid = "this is not valid toml [";
        let result = ConfigFile::from_toml(invalid);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigFile::from_file("/nonexistent/plwasm.toml").unwrap_err();
        assert!(matches!(err, ConfigFileError::Io { .. }));
    }
}
