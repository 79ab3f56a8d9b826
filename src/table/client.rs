//! Table introspection client
//!
//! Wraps one versioned table: version history with deltas, column and index
//! listings, SQL over a filtered snapshot, and vector search over the same
//! snapshot.
//!
//! The snapshot holds only the columns the embedded engine can represent. It
//! is built on the first query, under a mutex, and then reused for the life
//! of the client. Writes made to the table afterwards are not visible through
//! an existing client.

use crate::embedding::Embedder;
use crate::error::{BridgeError, Result};
use crate::execution::embedded::EmbeddedConnection;
use crate::execution::result::{QueryResult, RowSet};
use crate::table::compat::TypeCompatibilityFilter;
use crate::table::models::{ColumnInfo, IndexInfo, VersionInfo};
use crate::table::store::{LocalTableStore, VersionedTable, TABLE_SUFFIX};
use crate::table::versions::VersionDiffEngine;
use arrow::datatypes::{DataType as ArrowType, Schema as ArrowSchema};
use polars::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info};

/// Name under which the snapshot is visible to SQL
pub const SNAPSHOT_TABLE_NAME: &str = "lance_table";

/// Column appended to search results
pub const DISTANCE_COLUMN: &str = "_distance";

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest.trim_start_matches(['/', '\\']));
        }
    }
    PathBuf::from(path)
}

/// Resolve and check a store root.
pub fn resolve_root(root: &str) -> Result<PathBuf> {
    let path = expand_home(root);
    if !path.exists() {
        return Err(BridgeError::InvalidInput(format!(
            "Database path does not exist: {}",
            path.display()
        )));
    }
    if !path.is_dir() {
        return Err(BridgeError::InvalidInput(format!(
            "Database path is not a directory: {}",
            path.display()
        )));
    }
    Ok(path)
}

/// Filtered, materialized view of the latest table version
#[derive(Debug)]
pub struct CachedSnapshot {
    pub frame: DataFrame,
    pub columns: Vec<String>,
    pub excluded_columns: Vec<String>,
    /// First fixed-size float list among the kept columns, with its dimension
    pub vector_column: Option<(String, usize)>,
}

pub struct TableIntrospectionClient {
    table: Arc<dyn VersionedTable>,
    filter: TypeCompatibilityFilter,
    embedder: Option<Arc<dyn Embedder>>,
    snapshot: Mutex<Option<Arc<CachedSnapshot>>>,
    conversions: AtomicUsize,
}

impl TableIntrospectionClient {
    /// Open `table_name` in the store at `root`.
    pub fn open(root: &str, table_name: &str) -> Result<Self> {
        let root = resolve_root(root)?;
        let table = LocalTableStore::new(root).open(table_name)?;
        Ok(Self::with_table(Arc::new(table)))
    }

    /// Open a table from its full `<root>/<name>.vtable` path.
    pub fn from_table_path(table_path: &str) -> Result<Self> {
        let (root, name) = split_table_path(table_path)?;
        Self::open(&root, &name)
    }

    pub fn with_table(table: Arc<dyn VersionedTable>) -> Self {
        Self {
            table,
            filter: TypeCompatibilityFilter::new(),
            embedder: None,
            snapshot: Mutex::new(None),
            conversions: AtomicUsize::new(0),
        }
    }

    pub fn with_filter(mut self, filter: TypeCompatibilityFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn table_name(&self) -> &str {
        self.table.name()
    }

    pub fn list_versions(&self) -> Result<Vec<VersionInfo>> {
        let records = self.table.versions()?;
        let table = &self.table;
        Ok(VersionDiffEngine::diff(records, |version| {
            let schema = table.schema_at(version)?;
            Ok(schema.fields().iter().map(|f| f.name().clone()).collect())
        }))
    }

    pub fn list_columns(&self) -> Result<Vec<ColumnInfo>> {
        self.table.columns()
    }

    pub fn list_indices(&self) -> Result<Vec<IndexInfo>> {
        self.table.indices()
    }

    pub fn count_rows(&self) -> Result<u64> {
        self.table.count_rows()
    }

    pub fn latest_version(&self) -> Result<u64> {
        self.table.latest_version()
    }

    pub fn count_versions(&self) -> Result<u64> {
        Ok(self.table.versions()?.len() as u64)
    }

    /// Number of times the snapshot has been built
    pub fn conversion_count(&self) -> usize {
        self.conversions.load(Ordering::SeqCst)
    }

    /// Build the snapshot on first use and return it.
    pub fn snapshot(&self) -> Result<Arc<CachedSnapshot>> {
        let mut guard = self
            .snapshot
            .lock()
            .map_err(|_| BridgeError::Execution("snapshot lock poisoned".to_string()))?;
        if let Some(snapshot) = guard.as_ref() {
            return Ok(Arc::clone(snapshot));
        }

        let schema = self.table.latest_schema()?;
        let partition = self.filter.filter(self.table.name(), &schema)?;
        let columns = partition.compatible_names();
        let frame = self.table.scan(&columns)?;
        self.conversions.fetch_add(1, Ordering::SeqCst);

        info!(
            "Materialized {} rows x {} columns of '{}' ({} excluded)",
            frame.height(),
            columns.len(),
            self.table.name(),
            partition.incompatible.len()
        );

        let snapshot = Arc::new(CachedSnapshot {
            vector_column: find_vector_column(&schema, &columns),
            excluded_columns: partition.incompatible_names(),
            columns,
            frame,
        });
        *guard = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Run `sql` against the snapshot registered as `lance_table`.
    ///
    /// Table-level failures are `Err`; a statement the engine rejects comes
    /// back as an error result.
    pub fn run_embedded_query(&self, sql: &str) -> Result<QueryResult> {
        let start = Instant::now();
        let snapshot = self.snapshot()?;

        let mut conn = EmbeddedConnection::new();
        conn.register(SNAPSHOT_TABLE_NAME, snapshot.frame.clone().lazy());

        let elapsed = || start.elapsed().as_secs_f64();
        match conn.query_rows(sql) {
            Ok(rows) => Ok(QueryResult::success(rows, elapsed())),
            Err(e) => {
                debug!("Query on '{}' failed: {}", self.table.name(), e);
                Ok(QueryResult::failure(e.to_string(), elapsed()))
            }
        }
    }

    /// Nearest rows to `query_text` by squared L2 distance.
    pub fn search(&self, query_text: &str, limit: usize) -> Result<RowSet> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| BridgeError::Embedding("No embedder configured".to_string()))?;
        let snapshot = self.snapshot()?;
        let (vector_column, dim) = snapshot.vector_column.clone().ok_or_else(|| {
            BridgeError::InvalidInput(format!(
                "Table '{}' has no vector column",
                self.table.name()
            ))
        })?;

        let query = embedder.embed(query_text)?;
        if query.len() != dim {
            return Err(BridgeError::Embedding(format!(
                "Query vector has {} dimensions, column '{}' has {}",
                query.len(),
                vector_column,
                dim
            )));
        }

        let vectors = snapshot
            .frame
            .column(&vector_column)?
            .cast(&DataType::List(Box::new(DataType::Float64)))?;
        let mut scored: Vec<(IdxSize, f64)> = Vec::new();
        for (row, value) in vectors.list()?.into_iter().enumerate() {
            let Some(value) = value else { continue };
            match squared_distance(value.f64()?, &query) {
                Some(distance) => scored.push((row as IdxSize, distance)),
                None => debug!("Skipping row {} of '{}': malformed vector", row, self.table.name()),
            }
        }
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(limit);

        let (indices, distances): (Vec<IdxSize>, Vec<f64>) = scored.into_iter().unzip();
        let mut hits = snapshot
            .frame
            .drop(&vector_column)?
            .take(&IdxCa::from_vec("idx", indices))?;
        hits.with_column(Series::new(DISTANCE_COLUMN, distances))?;
        RowSet::from_frame(&hits)
    }
}

/// Split `<root>/<name>.vtable` into root and table name.
pub fn split_table_path(table_path: &str) -> Result<(String, String)> {
    let trimmed = table_path.trim().trim_end_matches(['/', '\\']);
    let path = Path::new(trimmed);
    let file_name = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or_default();
    let name = file_name.strip_suffix(TABLE_SUFFIX).unwrap_or_default();
    if name.is_empty() {
        return Err(BridgeError::InvalidInput(format!(
            "Table path must end with '<name>{}': {}",
            TABLE_SUFFIX, table_path
        )));
    }
    let root = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_string_lossy().to_string(),
        _ => ".".to_string(),
    };
    Ok((root, name.to_string()))
}

/// Squared L2 distance, or `None` when the stored vector has the wrong
/// length or holds nulls.
fn squared_distance(stored: &Float64Chunked, query: &[f32]) -> Option<f64> {
    if stored.len() != query.len() || stored.null_count() > 0 {
        return None;
    }
    Some(
        stored
            .into_no_null_iter()
            .zip(query)
            .map(|(v, q)| {
                let d = v - *q as f64;
                d * d
            })
            .sum(),
    )
}

fn find_vector_column(schema: &ArrowSchema, kept: &[String]) -> Option<(String, usize)> {
    schema
        .fields()
        .iter()
        .filter(|f| kept.contains(f.name()))
        .find_map(|f| match f.data_type() {
            ArrowType::FixedSizeList(item, dim)
                if matches!(item.data_type(), ArrowType::Float32 | ArrowType::Float64) =>
            {
                Some((f.name().clone(), *dim as usize))
            }
            _ => None,
        })
}
