//! Versioned Table Execution Engine
//!
//! Runs SQL over a versioned table through the embedded engine. Clients are
//! resolved per table path. The caching resolver reuses a client, and so its
//! snapshot, only while the table is still at the version the client was
//! opened at, and keeps at most `capacity` tables.

use crate::embedding::Embedder;
use crate::error::{BridgeError, Result};
use crate::execution::engine::{EngineKind, EngineOptions, ExecutionEngine};
use crate::execution::result::RowSet;
use crate::table::client::TableIntrospectionClient;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_CACHED_TABLES: usize = 16;

/// Maps a table path to an introspection client
pub trait TableClientResolver: Send + Sync {
    fn resolve(&self, table_path: &str) -> Result<Arc<TableIntrospectionClient>>;
}

struct CachedClient {
    version: u64,
    client: Arc<TableIntrospectionClient>,
    last_used: AtomicU64,
}

/// Reuses clients per (path, latest version), evicting the least recently
/// used table past capacity
pub struct CachingTableResolver {
    clients: DashMap<String, CachedClient>,
    capacity: usize,
    embedder: Option<Arc<dyn Embedder>>,
    clock: AtomicU64,
}

impl Default for CachingTableResolver {
    fn default() -> Self {
        Self {
            clients: DashMap::new(),
            capacity: DEFAULT_CACHED_TABLES,
            embedder: None,
            clock: AtomicU64::new(0),
        }
    }
}

impl CachingTableResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn cached_paths(&self) -> usize {
        self.clients.len()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn evict_over_capacity(&self) {
        while self.clients.len() > self.capacity {
            let oldest = self
                .clients
                .iter()
                .min_by_key(|entry| entry.last_used.load(Ordering::SeqCst))
                .map(|entry| entry.key().clone());
            let Some(path) = oldest else { break };
            self.clients.remove(&path);
            debug!("Evicted table client for {}", path);
        }
    }
}

impl TableClientResolver for CachingTableResolver {
    fn resolve(&self, table_path: &str) -> Result<Arc<TableIntrospectionClient>> {
        let key = table_path.trim().trim_end_matches('/').to_string();

        // Opening reads only the version listing; the snapshot is built on first query
        let mut opened = TableIntrospectionClient::from_table_path(&key)?;
        let version = opened.latest_version()?;

        if let Some(cached) = self.clients.get(&key) {
            if cached.version == version {
                cached.last_used.store(self.tick(), Ordering::SeqCst);
                return Ok(Arc::clone(&cached.client));
            }
            info!(
                "Table {} moved from version {} to {}, reopening",
                key, cached.version, version
            );
        }

        if let Some(embedder) = &self.embedder {
            opened = opened.with_embedder(Arc::clone(embedder));
        }
        let opened = Arc::new(opened);

        let resolved = {
            let mut entry = self.clients.entry(key).or_insert_with(|| CachedClient {
                version,
                client: Arc::clone(&opened),
                last_used: AtomicU64::new(0),
            });
            // A concurrent resolve may already have stored this or a newer version
            if entry.version < version {
                entry.version = version;
                entry.client = Arc::clone(&opened);
            }
            entry.last_used.store(self.tick(), Ordering::SeqCst);
            Arc::clone(&entry.client)
        };

        self.evict_over_capacity();
        Ok(resolved)
    }
}

pub struct VersionedTableEngine {
    resolver: Arc<dyn TableClientResolver>,
}

impl VersionedTableEngine {
    pub fn new(resolver: Arc<dyn TableClientResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl ExecutionEngine for VersionedTableEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::VersionedTable
    }

    async fn execute(&self, statement: &str, options: &EngineOptions) -> Result<RowSet> {
        let table_path = options
            .table_path()
            .ok_or_else(|| BridgeError::InvalidInput("tablePath is required".to_string()))?
            .to_string();
        info!("Executing query on versioned table {}: {}", table_path, statement);

        let resolver = Arc::clone(&self.resolver);
        let sql = statement.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let client = resolver.resolve(&table_path)?;
            client.run_embedded_query(&sql)
        })
        .await
        .map_err(|e| BridgeError::Execution(format!("Versioned table worker failed: {}", e)))??;

        result.into_row_set().map_err(BridgeError::Execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::engine::TABLE_PATH_OPTION;
    use crate::table::store::LocalTableStore;
    use polars::prelude::*;

    #[tokio::test]
    async fn test_resolver_reuses_client() {
        let dir = tempfile::tempdir().unwrap();
        LocalTableStore::new(dir.path())
            .create_table("t", &mut df!["x" => [1i64, 2]].unwrap(), None)
            .unwrap();
        let path = dir.path().join("t.vtable").to_string_lossy().to_string();

        let resolver = Arc::new(CachingTableResolver::new());
        let engine = VersionedTableEngine::new(resolver.clone());
        let options = EngineOptions::new().with(TABLE_PATH_OPTION, path.clone());

        let rows = engine.execute("SELECT SUM(x) AS s FROM lance_table", &options).await.unwrap();
        assert_eq!(rows.rows[0][0], serde_json::Value::from(3));
        engine.execute("SELECT x FROM lance_table", &options).await.unwrap();

        assert_eq!(resolver.cached_paths(), 1);
        assert_eq!(resolver.resolve(&path).unwrap().conversion_count(), 1);
    }

    #[tokio::test]
    async fn test_new_version_replaces_cached_client() {
        let dir = tempfile::tempdir().unwrap();
        let table = LocalTableStore::new(dir.path())
            .create_table("t", &mut df!["x" => [1i64, 2]].unwrap(), None)
            .unwrap();
        let path = table.path().to_string_lossy().to_string();

        let resolver = Arc::new(CachingTableResolver::new());
        let engine = VersionedTableEngine::new(resolver.clone());
        let options = EngineOptions::new().with(TABLE_PATH_OPTION, path.clone());
        let count = "SELECT COUNT(*) AS n FROM lance_table";

        let rows = engine.execute(count, &options).await.unwrap();
        assert_eq!(rows.rows, vec![vec![serde_json::Value::from(2)]]);
        let before = resolver.resolve(&path).unwrap();

        table.append(&mut df!["x" => [3i64]].unwrap()).unwrap();

        let rows = engine.execute(count, &options).await.unwrap();
        assert_eq!(rows.rows, vec![vec![serde_json::Value::from(3)]]);
        let after = resolver.resolve(&path).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.conversion_count(), 1);
        assert_eq!(resolver.cached_paths(), 1);
    }

    #[tokio::test]
    async fn test_least_recently_used_table_is_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalTableStore::new(dir.path());
        let mut paths = Vec::new();
        for name in ["a", "b", "c"] {
            let table = store
                .create_table(name, &mut df!["x" => [1i64]].unwrap(), None)
                .unwrap();
            paths.push(table.path().to_string_lossy().to_string());
        }

        let resolver = CachingTableResolver::new().with_capacity(2);
        let a = resolver.resolve(&paths[0]).unwrap();
        resolver.resolve(&paths[1]).unwrap();
        // Touch "a" so "b" becomes the oldest
        assert!(Arc::ptr_eq(&a, &resolver.resolve(&paths[0]).unwrap()));
        resolver.resolve(&paths[2]).unwrap();

        assert_eq!(resolver.cached_paths(), 2);
        assert!(Arc::ptr_eq(&a, &resolver.resolve(&paths[0]).unwrap()));
        assert_eq!(resolver.cached_paths(), 2);
    }

    #[tokio::test]
    async fn test_missing_table_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ghost.vtable").to_string_lossy().to_string();
        let engine = VersionedTableEngine::new(Arc::new(CachingTableResolver::new()));

        let options = EngineOptions::new().with(TABLE_PATH_OPTION, path);
        assert!(engine.execute("SELECT 1", &options).await.is_err());
    }
}
