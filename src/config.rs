//! Bridge configuration, read from the environment (and `.env` when present).

use crate::error::{BridgeError, Result};
use std::path::PathBuf;

/// Settings for the managed-catalog engine.
#[derive(Debug, Clone)]
pub struct ManagedEngineConfig {
    /// Coordinator URL (e.g., "http://localhost:8080")
    pub coordinator_url: String,
    pub catalog: String,
    pub user: String,
    /// Used when neither the request nor the statement names a database
    pub default_database: String,
    pub default_workgroup: String,
    pub timeout_ms: u64,
    /// JSON catalog snapshot used for DESCRIBE and column metadata
    pub catalog_file: Option<PathBuf>,
}

impl Default for ManagedEngineConfig {
    fn default() -> Self {
        Self {
            coordinator_url: "http://localhost:8080".to_string(),
            catalog: "awsdatacatalog".to_string(),
            user: "query-bridge".to_string(),
            default_database: "default".to_string(),
            default_workgroup: "primary".to_string(),
            timeout_ms: 300_000,
            catalog_file: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Directory whose parquet/csv files back the embedded engine
    pub data_dir: PathBuf,
    /// Reject statements that are not read-only
    pub read_only: bool,
    pub managed: ManagedEngineConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            read_only: true,
            managed: ManagedEngineConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ManagedEngineConfig::default();

        let read_only = match lookup("BRIDGE_READ_ONLY") {
            Some(value) => parse_bool("BRIDGE_READ_ONLY", &value)?,
            None => true,
        };

        let timeout_ms = match lookup("MANAGED_TIMEOUT_MS") {
            Some(value) => value.trim().parse::<u64>().map_err(|_| {
                BridgeError::InvalidInput(format!(
                    "MANAGED_TIMEOUT_MS must be an integer, got '{}'",
                    value
                ))
            })?,
            None => defaults.timeout_ms,
        };

        Ok(Self {
            data_dir: lookup("BRIDGE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            read_only,
            managed: ManagedEngineConfig {
                coordinator_url: lookup("MANAGED_COORDINATOR_URL")
                    .unwrap_or(defaults.coordinator_url),
                catalog: lookup("MANAGED_CATALOG").unwrap_or(defaults.catalog),
                user: lookup("MANAGED_USER").unwrap_or(defaults.user),
                default_database: lookup("MANAGED_DATABASE").unwrap_or(defaults.default_database),
                default_workgroup: lookup("MANAGED_WORKGROUP")
                    .unwrap_or(defaults.default_workgroup),
                timeout_ms,
                catalog_file: lookup("MANAGED_CATALOG_FILE").map(PathBuf::from),
            },
        })
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(BridgeError::InvalidInput(format!(
            "{} must be a boolean, got '{}'",
            key, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_when_unset() {
        let config = BridgeConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert!(config.read_only);
        assert_eq!(config.managed.default_database, "default");
        assert_eq!(config.managed.default_workgroup, "primary");
        assert!(config.managed.catalog_file.is_none());
    }

    #[test]
    fn test_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("BRIDGE_DATA_DIR", "/srv/data"),
            ("BRIDGE_READ_ONLY", "off"),
            ("MANAGED_DATABASE", "sales"),
            ("MANAGED_TIMEOUT_MS", "1500"),
        ]
        .into_iter()
        .collect();

        let config = BridgeConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/data"));
        assert!(!config.read_only);
        assert_eq!(config.managed.default_database, "sales");
        assert_eq!(config.managed.timeout_ms, 1500);
    }

    #[test]
    fn test_rejects_malformed_values() {
        let err = BridgeConfig::from_lookup(|k| {
            (k == "MANAGED_TIMEOUT_MS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidInput(_)));
    }
}
