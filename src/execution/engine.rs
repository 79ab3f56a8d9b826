//! Execution Engine Trait - Core contract for all execution engines
//!
//! Requests arrive as loosely typed payloads and are parsed once into a
//! `QueryRequest` whose engine is a closed `EngineKind`. Engines only ever
//! see well-formed requests.

use crate::error::{BridgeError, Result};
use crate::execution::result::RowSet;
use crate::table::store::TABLE_SUFFIX;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const DATABASE_OPTION: &str = "database";
pub const WORKGROUP_OPTION: &str = "workgroup";
pub const TABLE_PATH_OPTION: &str = "tablePath";

/// The three interchangeable backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// In-process analytical engine
    Embedded,
    /// Managed cloud query service behind a metadata catalog
    ManagedCatalog,
    /// Versioned columnar table queried through the embedded engine
    VersionedTable,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Embedded => "embedded",
            EngineKind::ManagedCatalog => "managed_catalog",
            EngineKind::VersionedTable => "versioned_table",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = BridgeError;

    fn from_str(tag: &str) -> Result<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "embedded" | "duckdb" | "polars" => Ok(EngineKind::Embedded),
            "managed_catalog" | "managed" | "athena" => Ok(EngineKind::ManagedCatalog),
            "versioned_table" | "versioned" | "lance" => Ok(EngineKind::VersionedTable),
            _ => Err(BridgeError::InvalidInput(format!(
                "Invalid queryEngine: {}. Must be 'duckdb', 'athena', or 'lance'",
                tag
            ))),
        }
    }
}

/// Engine-specific string options (database, workgroup, table path)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions(BTreeMap<String, String>);

impl EngineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Blank values count as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn database(&self) -> Option<&str> {
        self.get(DATABASE_OPTION)
    }

    pub fn workgroup(&self) -> Option<&str> {
        self.get(WORKGROUP_OPTION)
    }

    pub fn table_path(&self) -> Option<&str> {
        self.get(TABLE_PATH_OPTION)
    }
}

/// Request body as received from the HTTP layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPayload {
    pub query: Option<String>,
    pub query_engine: Option<String>,
    pub database: Option<String>,
    pub workgroup: Option<String>,
    pub table_path: Option<String>,
}

/// A validated request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub statement: String,
    pub engine: EngineKind,
    pub options: EngineOptions,
}

impl QueryRequest {
    pub fn new(statement: impl Into<String>, engine: EngineKind) -> Self {
        Self {
            statement: statement.into(),
            engine,
            options: EngineOptions::new(),
        }
    }

    pub fn with_option(mut self, key: &str, value: impl Into<String>) -> Self {
        self.options = self.options.with(key, value);
        self
    }

    /// Structural checks that need no engine.
    pub fn validate(&self) -> Result<()> {
        if self.statement.trim().is_empty() {
            return Err(BridgeError::InvalidInput("query is required".to_string()));
        }

        if self.engine == EngineKind::VersionedTable {
            let path = self.options.table_path().ok_or_else(|| {
                BridgeError::InvalidInput("tablePath is required for the versioned table engine".to_string())
            })?;
            if !path.trim_end_matches('/').ends_with(TABLE_SUFFIX) {
                return Err(BridgeError::InvalidInput(format!(
                    "Table path must end with '{}': {}",
                    TABLE_SUFFIX, path
                )));
            }
        }

        Ok(())
    }
}

impl TryFrom<QueryPayload> for QueryRequest {
    type Error = BridgeError;

    fn try_from(payload: QueryPayload) -> Result<Self> {
        let engine = match payload.query_engine.as_deref() {
            Some(tag) => tag.parse()?,
            None => EngineKind::Embedded,
        };

        let mut options = EngineOptions::new();
        for (key, value) in [
            (DATABASE_OPTION, payload.database),
            (WORKGROUP_OPTION, payload.workgroup),
            (TABLE_PATH_OPTION, payload.table_path),
        ] {
            if let Some(value) = value {
                options = options.with(key, value);
            }
        }

        let request = QueryRequest {
            statement: payload.query.unwrap_or_default().trim().to_string(),
            engine,
            options,
        };
        request.validate()?;
        Ok(request)
    }
}

/// Execution engine trait - all engines must implement this
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Which engine kind this serves
    fn kind(&self) -> EngineKind;

    /// Execute one SQL statement
    async fn execute(&self, statement: &str, options: &EngineOptions) -> Result<RowSet>;

    /// Check if engine is available/healthy
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
