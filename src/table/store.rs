//! Versioned table storage
//!
//! `VersionedTable` and `TableStore` are the seam between the introspection
//! clients and whatever holds the data. `LocalTableStore` is this crate's own
//! local format, not a Lance dataset: each table is a `<name>.vtable`
//! directory with one JSON manifest per version under `_versions/` and
//! parquet fragments under `data/`. Every write commits a new version;
//! manifests are never rewritten. Other backends, including object stores,
//! plug in by implementing `VersionedTable`.

use crate::error::{BridgeError, Result};
use crate::table::models::{ColumnInfo, IndexInfo, VersionRecord};
use crate::table::types::declared_field;
use crate::table::versions::{TOTAL_DATA_ROWS_KEY, TOTAL_DELETION_ROWS_KEY};
use arrow::datatypes::Schema as ArrowSchema;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Directory suffix of a table inside a store root
pub const TABLE_SUFFIX: &str = ".vtable";

const VERSIONS_DIR: &str = "_versions";
const DATA_DIR: &str = "data";

/// A table with an append-only version history
pub trait VersionedTable: Send + Sync {
    fn name(&self) -> &str;

    /// Highest committed version; cheap, reads no data
    fn latest_version(&self) -> Result<u64>;

    /// All versions, in no particular order
    fn versions(&self) -> Result<Vec<VersionRecord>>;

    /// Arrow schema as of `version`
    fn schema_at(&self, version: u64) -> Result<ArrowSchema>;

    /// Arrow schema of the latest version
    fn latest_schema(&self) -> Result<ArrowSchema>;

    /// Declared columns of the latest version
    fn columns(&self) -> Result<Vec<ColumnInfo>>;

    fn indices(&self) -> Result<Vec<IndexInfo>>;

    /// Live rows of the latest version
    fn count_rows(&self) -> Result<u64>;

    /// Materialize `columns` of the latest version
    fn scan(&self, columns: &[String]) -> Result<DataFrame>;
}

/// A directory of versioned tables
pub trait TableStore: Send + Sync {
    fn table_names(&self) -> Result<Vec<String>>;

    fn open_table(&self, name: &str) -> Result<Arc<dyn VersionedTable>>;
}

/// Declared column of a table version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable: true,
            extension: None,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    fn to_arrow(&self) -> arrow::datatypes::Field {
        declared_field(&self.name, &self.type_name, self.nullable, self.extension.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Fragment {
    id: u64,
    /// Relative to the table directory
    path: String,
    physical_rows: u64,
    #[serde(default)]
    deleted: BTreeSet<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    name: String,
    index_type: String,
    columns: Vec<String>,
    indexed_rows: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    version: u64,
    timestamp: i64,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    fields: Vec<FieldSpec>,
    #[serde(default)]
    fragments: Vec<Fragment>,
    #[serde(default)]
    indices: Vec<IndexEntry>,
    #[serde(default)]
    next_fragment_id: u64,
}

impl Manifest {
    fn total_data_rows(&self) -> u64 {
        self.fragments.iter().map(|f| f.physical_rows).sum()
    }

    fn total_deleted_rows(&self) -> u64 {
        self.fragments.iter().map(|f| f.deleted.len() as u64).sum()
    }

    fn live_rows(&self) -> u64 {
        self.total_data_rows().saturating_sub(self.total_deleted_rows())
    }

    fn refresh_metadata(&mut self) {
        let deletion_files = self.fragments.iter().filter(|f| !f.deleted.is_empty()).count();
        let entries = [
            ("total_fragments", self.fragments.len() as u64),
            ("total_data_files", self.fragments.len() as u64),
            (TOTAL_DATA_ROWS_KEY, self.total_data_rows()),
            ("total_deletion_files", deletion_files as u64),
            (TOTAL_DELETION_ROWS_KEY, self.total_deleted_rows()),
            ("total_rows", self.live_rows()),
        ];
        for (key, value) in entries {
            self.metadata.insert(key.to_string(), value.to_string());
        }
    }

    fn arrow_schema(&self) -> ArrowSchema {
        ArrowSchema::new(self.fields.iter().map(FieldSpec::to_arrow).collect::<Vec<_>>())
    }

    fn record(&self) -> VersionRecord {
        VersionRecord {
            version: self.version,
            timestamp: self.timestamp,
            metadata: self.metadata.clone(),
        }
    }
}

/// Filesystem-backed table store rooted at a directory
#[derive(Debug, Clone)]
pub struct LocalTableStore {
    root: PathBuf,
}

impl LocalTableStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_dir(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}{}", name, TABLE_SUFFIX))
    }

    pub fn open(&self, name: &str) -> Result<LocalTable> {
        let dir = self.table_dir(name);
        if !dir.join(VERSIONS_DIR).is_dir() {
            return Err(BridgeError::Store(format!(
                "Table '{}' not found in {}",
                name,
                self.root.display()
            )));
        }

        let table = LocalTable {
            name: name.to_string(),
            dir,
        };
        // Fails for a table directory without any committed version
        table.latest_version()?;
        Ok(table)
    }

    /// Create a table whose first version holds `data`.
    ///
    /// When `fields` is `None` the declared schema is derived from the frame.
    pub fn create_table(
        &self,
        name: &str,
        data: &mut DataFrame,
        fields: Option<Vec<FieldSpec>>,
    ) -> Result<LocalTable> {
        let dir = self.table_dir(name);
        if dir.exists() {
            return Err(BridgeError::Store(format!("Table '{}' already exists", name)));
        }
        let table = LocalTable {
            name: name.to_string(),
            dir,
        };
        let fields = fields.unwrap_or_else(|| fields_from_frame(data));
        table.check_frame(&fields, data)?;

        fs::create_dir_all(table.dir.join(VERSIONS_DIR))?;
        fs::create_dir_all(table.dir.join(DATA_DIR))?;

        let fragment = table.write_fragment(0, data)?;
        let mut manifest = Manifest {
            version: 1,
            timestamp: chrono::Utc::now().timestamp(),
            metadata: BTreeMap::new(),
            fields,
            fragments: vec![fragment],
            indices: Vec::new(),
            next_fragment_id: 1,
        };
        manifest.refresh_metadata();
        table.write_manifest(&manifest)?;

        info!("Created table '{}' at {}", name, table.dir.display());
        Ok(table)
    }
}

impl TableStore for LocalTableStore {
    fn table_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            if let Some(name) = file_name.to_string_lossy().strip_suffix(TABLE_SUFFIX) {
                if !name.is_empty() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn open_table(&self, name: &str) -> Result<Arc<dyn VersionedTable>> {
        Ok(Arc::new(self.open(name)?))
    }
}

/// One table of a `LocalTableStore`
#[derive(Debug, Clone)]
pub struct LocalTable {
    name: String,
    dir: PathBuf,
}

impl LocalTable {
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn manifest_path(&self, version: u64) -> PathBuf {
        self.dir.join(VERSIONS_DIR).join(format!("{}.json", version))
    }

    fn version_numbers(&self) -> Result<Vec<u64>> {
        let mut numbers = Vec::new();
        for entry in fs::read_dir(self.dir.join(VERSIONS_DIR))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(n) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                numbers.push(n);
            }
        }
        Ok(numbers)
    }

    fn read_manifest(&self, version: u64) -> Result<Manifest> {
        let path = self.manifest_path(version);
        let file = File::open(&path).map_err(|e| {
            BridgeError::Store(format!(
                "Failed to open manifest for version {} of '{}': {}",
                version, self.name, e
            ))
        })?;
        Ok(serde_json::from_reader(file)?)
    }

    fn latest_manifest(&self) -> Result<Manifest> {
        self.read_manifest(self.latest_version()?)
    }

    fn write_manifest(&self, manifest: &Manifest) -> Result<()> {
        let path = self.manifest_path(manifest.version);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                BridgeError::Store(format!(
                    "Failed to commit version {} of '{}': {}",
                    manifest.version, self.name, e
                ))
            })?;
        serde_json::to_writer_pretty(file, manifest)?;
        Ok(())
    }

    fn write_fragment(&self, id: u64, data: &mut DataFrame) -> Result<Fragment> {
        let relative = format!("{}/{:06}.parquet", DATA_DIR, id);
        let mut file = File::create(self.dir.join(&relative))?;
        ParquetWriter::new(&mut file).finish(data)?;
        Ok(Fragment {
            id,
            path: relative,
            physical_rows: data.height() as u64,
            deleted: BTreeSet::new(),
        })
    }

    fn check_frame(&self, fields: &[FieldSpec], data: &DataFrame) -> Result<()> {
        let present: BTreeSet<&str> = data.get_column_names().into_iter().collect();
        let missing: Vec<&str> = fields
            .iter()
            .map(|f| f.name.as_str())
            .filter(|name| !present.contains(name))
            .collect();
        if !missing.is_empty() {
            return Err(BridgeError::Store(format!(
                "Data for '{}' is missing declared columns: {}",
                self.name,
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Apply `change` to a copy of the latest manifest and commit it as the next version.
    fn commit<F>(&self, change: F) -> Result<u64>
    where
        F: FnOnce(&mut Manifest) -> Result<()>,
    {
        let mut manifest = self.latest_manifest()?;
        change(&mut manifest)?;
        manifest.version += 1;
        manifest.timestamp = chrono::Utc::now().timestamp();
        manifest.refresh_metadata();
        self.write_manifest(&manifest)?;
        debug!("Committed version {} of '{}'", manifest.version, self.name);
        Ok(manifest.version)
    }

    /// Append rows as a new fragment.
    pub fn append(&self, data: &mut DataFrame) -> Result<u64> {
        self.commit(|manifest| {
            self.check_frame(&manifest.fields, data)?;
            let fragment = self.write_fragment(manifest.next_fragment_id, data)?;
            manifest.next_fragment_id += 1;
            manifest.fragments.push(fragment);
            Ok(())
        })
    }

    /// Mark rows of one fragment as deleted.
    pub fn delete_rows(&self, fragment_id: u64, offsets: &[u32]) -> Result<u64> {
        self.commit(|manifest| {
            let fragment = manifest
                .fragments
                .iter_mut()
                .find(|f| f.id == fragment_id)
                .ok_or_else(|| BridgeError::Store(format!("Unknown fragment {}", fragment_id)))?;
            if let Some(bad) = offsets.iter().find(|&&o| o as u64 >= fragment.physical_rows) {
                return Err(BridgeError::Store(format!(
                    "Row offset {} is out of range for fragment {}",
                    bad, fragment_id
                )));
            }
            fragment.deleted.extend(offsets.iter().copied());
            Ok(())
        })
    }

    /// Remove columns from the declared schema. Data files are left untouched.
    pub fn drop_columns(&self, names: &[&str]) -> Result<u64> {
        self.commit(|manifest| {
            for name in names {
                if !manifest.fields.iter().any(|f| f.name == *name) {
                    return Err(BridgeError::Store(format!("Unknown column '{}'", name)));
                }
            }
            manifest.fields.retain(|f| !names.contains(&f.name.as_str()));
            manifest
                .indices
                .retain(|idx| idx.columns.iter().all(|c| !names.contains(&c.as_str())));
            Ok(())
        })
    }

    /// Record an index over `columns` covering the rows live at this point.
    pub fn create_index(&self, name: &str, index_type: &str, columns: &[&str]) -> Result<u64> {
        self.commit(|manifest| {
            for column in columns {
                if !manifest.fields.iter().any(|f| f.name == *column) {
                    return Err(BridgeError::Store(format!("Unknown column '{}'", column)));
                }
            }
            let entry = IndexEntry {
                name: name.to_string(),
                index_type: index_type.to_string(),
                columns: columns.iter().map(|c| c.to_string()).collect(),
                indexed_rows: manifest.live_rows(),
            };
            manifest.indices.retain(|idx| idx.name != name);
            manifest.indices.push(entry);
            Ok(())
        })
    }

    fn read_fragment(&self, fragment: &Fragment, columns: &[String]) -> Result<DataFrame> {
        let path = self.dir.join(&fragment.path);
        let file = File::open(&path).map_err(|e| {
            BridgeError::Store(format!("Failed to open fragment {}: {}", path.display(), e))
        })?;
        let frame = ParquetReader::new(file).finish()?;
        let frame = frame.select(columns.iter().map(String::as_str)).map_err(|e| {
            BridgeError::Store(format!("Fragment {} of '{}': {}", fragment.id, self.name, e))
        })?;

        if fragment.deleted.is_empty() {
            return Ok(frame);
        }
        let keep: Vec<bool> = (0..frame.height())
            .map(|row| !fragment.deleted.contains(&(row as u32)))
            .collect();
        Ok(frame.filter(&BooleanChunked::from_slice("keep", &keep))?)
    }
}

impl VersionedTable for LocalTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn latest_version(&self) -> Result<u64> {
        self.version_numbers()?
            .into_iter()
            .max()
            .ok_or_else(|| BridgeError::Store(format!("Table '{}' has no versions", self.name)))
    }

    fn versions(&self) -> Result<Vec<VersionRecord>> {
        self.version_numbers()?
            .into_iter()
            .map(|v| self.read_manifest(v).map(|m| m.record()))
            .collect()
    }

    fn schema_at(&self, version: u64) -> Result<ArrowSchema> {
        Ok(self.read_manifest(version)?.arrow_schema())
    }

    fn latest_schema(&self) -> Result<ArrowSchema> {
        Ok(self.latest_manifest()?.arrow_schema())
    }

    fn columns(&self) -> Result<Vec<ColumnInfo>> {
        Ok(self
            .latest_manifest()?
            .fields
            .into_iter()
            .map(|f| ColumnInfo {
                name: f.name,
                column_type: f.type_name,
            })
            .collect())
    }

    fn indices(&self) -> Result<Vec<IndexInfo>> {
        let manifest = self.latest_manifest()?;
        let live = manifest.live_rows();
        Ok(manifest
            .indices
            .into_iter()
            .map(|idx| IndexInfo {
                name: idx.name,
                index_type: idx.index_type,
                columns: idx.columns,
                num_unindexed_rows: Some(live.saturating_sub(idx.indexed_rows)),
            })
            .collect())
    }

    fn count_rows(&self) -> Result<u64> {
        Ok(self.latest_manifest()?.live_rows())
    }

    fn scan(&self, columns: &[String]) -> Result<DataFrame> {
        let manifest = self.latest_manifest()?;
        let mut frame: Option<DataFrame> = None;

        for fragment in &manifest.fragments {
            let part = self.read_fragment(fragment, columns)?;
            match frame.as_mut() {
                Some(acc) => {
                    acc.vstack_mut(&part)?;
                }
                None => frame = Some(part),
            }
        }

        match frame {
            Some(frame) => Ok(frame),
            None => Ok(DataFrame::new(
                columns
                    .iter()
                    .map(|c| Series::new_empty(c, &DataType::Null))
                    .collect(),
            )?),
        }
    }
}

/// Derive declared fields from a polars frame.
pub fn fields_from_frame(frame: &DataFrame) -> Vec<FieldSpec> {
    frame
        .get_columns()
        .iter()
        .map(|s| FieldSpec::new(s.name(), polars_type_name(s.dtype())))
        .collect()
}

fn polars_type_name(dtype: &DataType) -> String {
    let unit = |tu: &TimeUnit| match tu {
        TimeUnit::Nanoseconds => "ns",
        TimeUnit::Microseconds => "us",
        TimeUnit::Milliseconds => "ms",
    };
    match dtype {
        DataType::Boolean => "bool".to_string(),
        DataType::Int8 => "int8".to_string(),
        DataType::Int16 => "int16".to_string(),
        DataType::Int32 => "int32".to_string(),
        DataType::Int64 => "int64".to_string(),
        DataType::UInt8 => "uint8".to_string(),
        DataType::UInt16 => "uint16".to_string(),
        DataType::UInt32 => "uint32".to_string(),
        DataType::UInt64 => "uint64".to_string(),
        DataType::Float32 => "float32".to_string(),
        DataType::Float64 => "float64".to_string(),
        DataType::String => "string".to_string(),
        DataType::Binary => "binary".to_string(),
        DataType::Date => "date32".to_string(),
        DataType::Datetime(tu, _) => format!("timestamp[{}]", unit(tu)),
        DataType::Duration(tu) => format!("duration[{}]", unit(tu)),
        DataType::List(inner) => format!("list<{}>", polars_type_name(inner)),
        DataType::Null => "null".to_string(),
        other => other.to_string().to_ascii_lowercase(),
    }
}
