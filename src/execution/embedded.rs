//! Embedded Execution Engine
//!
//! In-process SQL over polars frames. A connection is a `SQLContext` with
//! named frames registered on it; connections are created per query by a
//! caller-supplied factory and never shared.

use crate::error::{BridgeError, Result};
use crate::execution::engine::{EngineKind, EngineOptions, ExecutionEngine};
use crate::execution::result::RowSet;
use async_trait::async_trait;
use polars::prelude::*;
use polars::sql::SQLContext;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One embedded SQL session
pub struct EmbeddedConnection {
    ctx: SQLContext,
    tables: Vec<String>,
}

impl EmbeddedConnection {
    pub fn new() -> Self {
        Self {
            ctx: SQLContext::new(),
            tables: Vec::new(),
        }
    }

    /// Expose `frame` to SQL as `name`, replacing any earlier registration.
    pub fn register(&mut self, name: &str, frame: LazyFrame) {
        self.ctx.register(name, frame);
        if !self.tables.iter().any(|t| t == name) {
            self.tables.push(name.to_string());
        }
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    /// Run `sql` and materialize the result.
    pub fn query(&mut self, sql: &str) -> Result<DataFrame> {
        debug!("Embedded query over {:?}: {}", self.tables, sql);
        let plan = self
            .ctx
            .execute(sql)
            .map_err(|e| BridgeError::Execution(e.to_string()))?;
        plan.collect().map_err(|e| BridgeError::Execution(e.to_string()))
    }

    pub fn query_rows(&mut self, sql: &str) -> Result<RowSet> {
        let frame = self.query(sql)?;
        RowSet::from_frame(&frame)
    }
}

impl Default for EmbeddedConnection {
    fn default() -> Self {
        Self::new()
    }
}

/// Source of fresh embedded connections
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self) -> Result<EmbeddedConnection>;
}

impl<F> ConnectionFactory for F
where
    F: Fn() -> Result<EmbeddedConnection> + Send + Sync,
{
    fn connect(&self) -> Result<EmbeddedConnection> {
        self()
    }
}

/// Registers every parquet and csv file of a directory under its file stem
#[derive(Debug, Clone)]
pub struct DataDirConnectionFactory {
    data_dir: PathBuf,
}

impl DataDirConnectionFactory {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn load(path: &std::path::Path) -> Result<Option<LazyFrame>> {
        let frame = match path.extension().and_then(|e| e.to_str()) {
            Some("parquet") => LazyFrame::scan_parquet(path, ScanArgsParquet::default())
                .map_err(|e| BridgeError::Execution(format!("Failed to load Parquet: {}", e)))?,
            Some("csv") => LazyCsvReader::new(path)
                .with_has_header(true)
                .finish()
                .map_err(|e| BridgeError::Execution(format!("Failed to load CSV: {}", e)))?,
            _ => return Ok(None),
        };
        Ok(Some(frame))
    }
}

impl ConnectionFactory for DataDirConnectionFactory {
    fn connect(&self) -> Result<EmbeddedConnection> {
        let mut conn = EmbeddedConnection::new();
        if !self.data_dir.is_dir() {
            warn!("Data directory {} does not exist", self.data_dir.display());
            return Ok(conn);
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.data_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        for path in paths {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            if conn.tables().contains(&stem) {
                warn!("Skipping {}: table '{}' already registered", path.display(), stem);
                continue;
            }
            if let Some(frame) = Self::load(&path)? {
                conn.register(&stem, frame);
            }
        }
        Ok(conn)
    }
}

/// Embedded engine: one fresh connection per statement
pub struct EmbeddedEngine {
    factory: Arc<dyn ConnectionFactory>,
}

impl EmbeddedEngine {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl ExecutionEngine for EmbeddedEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Embedded
    }

    async fn execute(&self, statement: &str, _options: &EngineOptions) -> Result<RowSet> {
        info!("Executing query with embedded engine: {}", statement);
        let factory = Arc::clone(&self.factory);
        let sql = statement.to_string();

        tokio::task::spawn_blocking(move || {
            let mut conn = factory.connect()?;
            conn.query_rows(&sql)
        })
        .await
        .map_err(|e| BridgeError::Execution(format!("Embedded worker failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::fs::File;

    #[test]
    fn test_registered_frame_is_queryable() {
        let mut conn = EmbeddedConnection::new();
        let frame = df!["id" => [1i64, 2, 3], "v" => [10i64, 20, 30]].unwrap();
        conn.register("t", frame.lazy());

        let rows = conn.query_rows("SELECT id FROM t WHERE v > 15 ORDER BY id").unwrap();
        assert_eq!(rows.column_names, vec!["id"]);
        assert_eq!(rows.rows, vec![vec![Value::from(2)], vec![Value::from(3)]]);
    }

    #[test]
    fn test_bad_sql_is_execution_error() {
        let mut conn = EmbeddedConnection::new();
        assert!(matches!(
            conn.query("SELECT * FROM missing_table"),
            Err(BridgeError::Execution(_))
        ));
    }

    #[test]
    fn test_data_dir_factory_registers_by_stem() {
        let dir = tempfile::tempdir().unwrap();
        let mut orders = df!["order_id" => [1i64, 2], "amount" => [5.0f64, 7.5]].unwrap();
        let mut file = File::create(dir.path().join("orders.parquet")).unwrap();
        ParquetWriter::new(&mut file).finish(&mut orders).unwrap();
        std::fs::write(dir.path().join("regions.csv"), "code,name\nN,North\nS,South\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut conn = DataDirConnectionFactory::new(dir.path()).connect().unwrap();
        assert_eq!(conn.tables(), &["orders".to_string(), "regions".to_string()]);

        let rows = conn.query_rows("SELECT COUNT(*) AS n FROM regions").unwrap();
        assert_eq!(rows.row_count(), 1);
    }

    #[tokio::test]
    async fn test_engine_uses_fresh_connection() {
        let factory: Arc<dyn ConnectionFactory> = Arc::new(|| -> Result<EmbeddedConnection> {
            let mut conn = EmbeddedConnection::new();
            conn.register("nums", df!["n" => [1i64, 2]]?.lazy());
            Ok(conn)
        });
        let engine = EmbeddedEngine::new(factory);

        let rows = engine
            .execute("SELECT SUM(n) AS total FROM nums", &EngineOptions::new())
            .await
            .unwrap();
        assert_eq!(rows.column_names, vec!["total"]);
        assert_eq!(rows.rows[0][0], Value::from(3));
    }
}
