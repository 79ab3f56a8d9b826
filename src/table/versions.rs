//! Version history diffing
//!
//! Turns the raw version list of a versioned table into per-version row and
//! column deltas. Row deltas come straight from the store's metadata
//! counters and are reported unclamped: a negative value means the counters
//! disagree between versions.

use crate::error::Result;
use crate::table::models::{VersionInfo, VersionRecord};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

pub const TOTAL_DATA_ROWS_KEY: &str = "total_data_file_rows";
pub const TOTAL_DELETION_ROWS_KEY: &str = "total_deletion_file_rows";

pub struct VersionDiffEngine;

impl VersionDiffEngine {
    /// Compute deltas for `versions`, sorted ascending by version number.
    ///
    /// `columns_at` returns the column names of the table as of a version.
    /// A failed lookup counts as an empty column set.
    pub fn diff<F>(mut versions: Vec<VersionRecord>, mut columns_at: F) -> Vec<VersionInfo>
    where
        F: FnMut(u64) -> Result<Vec<String>>,
    {
        versions.sort_by_key(|v| v.version);

        let mut history = Vec::with_capacity(versions.len());
        let mut prev_data_rows = 0i64;
        let mut prev_deletion_rows = 0i64;
        let mut prev_columns: Option<BTreeSet<String>> = None;

        for record in versions {
            let total_data_rows = metadata_int(&record.metadata, TOTAL_DATA_ROWS_KEY);
            let total_deletion_rows = metadata_int(&record.metadata, TOTAL_DELETION_ROWS_KEY);

            let current_columns: BTreeSet<String> = match columns_at(record.version) {
                Ok(columns) => columns.into_iter().collect(),
                Err(e) => {
                    warn!("Failed to get schema for version {}: {}", record.version, e);
                    BTreeSet::new()
                }
            };

            let (columns_add, columns_remove) = match &prev_columns {
                Some(prev) => (
                    current_columns.difference(prev).cloned().collect(),
                    prev.difference(&current_columns).cloned().collect(),
                ),
                None => (Vec::new(), Vec::new()),
            };

            history.push(VersionInfo {
                version: record.version,
                timestamp: record.timestamp,
                metadata: record.metadata,
                total_rows: total_data_rows,
                rows_add: total_data_rows - prev_data_rows,
                rows_remove: total_deletion_rows - prev_deletion_rows,
                columns_add,
                columns_remove,
            });

            prev_data_rows = total_data_rows;
            prev_deletion_rows = total_deletion_rows;
            prev_columns = Some(current_columns);
        }

        history
    }
}

/// Missing or non-numeric counters read as 0.
fn metadata_int(metadata: &BTreeMap<String, String>, key: &str) -> i64 {
    metadata
        .get(key)
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(0)
}
