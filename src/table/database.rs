//! Database-level listing of versioned tables

use crate::error::Result;
use crate::table::client::{resolve_root, TableIntrospectionClient};
use crate::table::models::TableInfo;
use crate::table::store::{LocalTableStore, TableStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

pub struct DatabaseIntrospectionClient {
    root: PathBuf,
    store: Arc<dyn TableStore>,
}

impl DatabaseIntrospectionClient {
    pub fn open(root: &str) -> Result<Self> {
        let root = resolve_root(root)?;
        let store = Arc::new(LocalTableStore::new(root.clone()));
        Ok(Self { root, store })
    }

    pub fn with_store(root: impl Into<PathBuf>, store: Arc<dyn TableStore>) -> Self {
        Self {
            root: root.into(),
            store,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every table with best-effort counts.
    ///
    /// A table that fails to open or count is still listed, with unknown
    /// counts.
    pub fn list_tables(&self) -> Result<Vec<TableInfo>> {
        let names = self.store.table_names()?;
        Ok(names.into_iter().map(|name| self.describe(name)).collect())
    }

    fn describe(&self, name: String) -> TableInfo {
        let counted = self.store.open_table(&name).and_then(|table| {
            let client = TableIntrospectionClient::with_table(table);
            Ok((
                client.count_rows()?,
                client.list_columns()?.len() as u64,
                client.count_versions()?,
            ))
        });

        match counted {
            Ok((rows, columns, versions)) => TableInfo {
                name,
                cnt_rows: Some(rows),
                cnt_columns: Some(columns),
                cnt_versions: Some(versions),
            },
            Err(e) => {
                warn!("Failed to get info for table {}: {}", name, e);
                TableInfo::unknown(name)
            }
        }
    }
}
