use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Summary of one table under a store root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    /// `None` when the table could not be introspected
    pub cnt_rows: Option<u64>,
    pub cnt_columns: Option<u64>,
    pub cnt_versions: Option<u64>,
}

impl TableInfo {
    pub fn unknown(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cnt_rows: None,
            cnt_columns: None,
            cnt_versions: None,
        }
    }
}

/// Raw version entry as reported by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: u64,
    /// Unix timestamp (epoch seconds)
    pub timestamp: i64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Version entry enriched with deltas against the previous version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: u64,
    pub timestamp: i64,
    pub metadata: BTreeMap<String, String>,
    pub total_rows: i64,
    pub rows_add: i64,
    pub rows_remove: i64,
    pub columns_add: Vec<String>,
    pub columns_remove: Vec<String>,
}

/// Column as listed to callers (name plus store-native type name)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub index_type: String,
    pub columns: Vec<String>,
    pub num_unindexed_rows: Option<u64>,
}
