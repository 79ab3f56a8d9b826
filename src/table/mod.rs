//! Versioned table access: storage, compatibility filtering, version history
//! and introspection clients.

pub mod client;
pub mod compat;
pub mod database;
pub mod models;
pub mod store;
pub mod types;
pub mod versions;

pub use client::{CachedSnapshot, TableIntrospectionClient, SNAPSHOT_TABLE_NAME};
pub use compat::{CompatibilityDecision, CompatibilityPartition, TypeCompatibilityFilter};
pub use database::DatabaseIntrospectionClient;
pub use models::{ColumnInfo, IndexInfo, TableInfo, VersionInfo, VersionRecord};
pub use store::{FieldSpec, LocalTable, LocalTableStore, TableStore, VersionedTable, TABLE_SUFFIX};
pub use versions::VersionDiffEngine;
