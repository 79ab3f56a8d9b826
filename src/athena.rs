//! Athena-dialect translation for the managed catalog engine
//!
//! Statements written against the embedded engine address tables as
//! `catalog.database.table`. The managed service resolves tables through its
//! own catalog and only accepts `database.table`, so the catalog segment is
//! dropped. DESCRIBE is not sent as SQL at all; it is answered from catalog
//! metadata.

use crate::error::{BridgeError, Result};
use crate::execution::managed::MetadataCatalog;
use crate::execution::result::RowSet;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

lazy_static! {
    static ref TABLE_REFERENCE: Regex = Regex::new(
        r"(?i)\b(FROM|JOIN)\s+('[A-Za-z0-9_]+(?:\.[A-Za-z0-9_]+)*'|[A-Za-z0-9_]+(?:\.[A-Za-z0-9_]+)*)"
    )
    .unwrap();
    static ref QUALIFIED_FROM: Regex =
        Regex::new(r#"(?i)FROM\s+['"]?([A-Za-z0-9_]+(?:\.[A-Za-z0-9_]+){1,2})['"]?"#).unwrap();
    static ref DESCRIBE: Regex =
        Regex::new(r"(?i)^\s*DESCRIBE\s+(?:([A-Za-z0-9_]+)\.)?([A-Za-z0-9_]+)\s*$").unwrap();
    static ref LINE_COMMENT: Regex = Regex::new(r"(?m)--.*$").unwrap();
    static ref BLOCK_COMMENT: Regex = Regex::new(r"(?s)/\*.*?\*/").unwrap();
}

pub const DEFAULT_DATABASE: &str = "default";

/// Column names of a DESCRIBE result
pub const DESCRIBE_COLUMNS: [&str; 3] = ["col_name", "data_type", "comment"];

/// Target of a `DESCRIBE [database.]table` statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescribeTarget {
    pub database: Option<String>,
    pub table: String,
}

/// Column of a catalog table, with its type mapped to embedded naming
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub column_name: String,
    pub column_type: String,
}

pub struct AthenaTranslator;

impl AthenaTranslator {
    /// Unquote single-quoted FROM/JOIN table references and drop the catalog
    /// segment of three-part names. Double-quoted identifiers are left as is.
    pub fn rewrite_table_references(sql: &str) -> String {
        TABLE_REFERENCE
            .replace_all(sql, |caps: &Captures| {
                let keyword = &caps[1];
                let reference = caps[2].trim_matches('\'');
                let parts: Vec<&str> = reference.split('.').collect();
                if parts.len() == 3 {
                    format!("{} {}.{}", keyword, parts[1], parts[2])
                } else {
                    format!("{} {}", keyword, reference)
                }
            })
            .into_owned()
    }

    /// Database of the first qualified FROM reference, ignoring comments.
    pub fn extract_database(sql: &str) -> Option<String> {
        let without_lines = LINE_COMMENT.replace_all(sql, "");
        let cleaned = BLOCK_COMMENT.replace_all(&without_lines, "");
        let normalized = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

        QUALIFIED_FROM.captures_iter(&normalized).find_map(|caps| {
            let parts: Vec<&str> = caps[1].split('.').collect();
            match parts.len() {
                3 => Some(parts[1].to_string()),
                2 => Some(parts[0].to_string()),
                _ => None,
            }
        })
    }

    pub fn detect_describe(sql: &str) -> Option<DescribeTarget> {
        let caps = DESCRIBE.captures(sql.trim())?;
        Some(DescribeTarget {
            database: caps.get(1).map(|m| m.as_str().to_string()),
            table: caps[2].to_string(),
        })
    }

    /// Map a managed-engine type name to the embedded engine's naming.
    pub fn map_type_name(native: &str) -> String {
        let lower = native.trim().to_ascii_lowercase();
        let mapped = match lower.as_str() {
            "string" | "varchar" | "char" => "VARCHAR",
            "int" | "integer" => "INTEGER",
            "bigint" => "BIGINT",
            "smallint" => "SMALLINT",
            "tinyint" => "TINYINT",
            "double" => "DOUBLE",
            "float" => "FLOAT",
            "decimal" => "DECIMAL",
            "boolean" => "BOOLEAN",
            "date" => "DATE",
            "timestamp" => "TIMESTAMP",
            "binary" => "BLOB",
            "array" => "LIST",
            "map" => "MAP",
            "struct" => "STRUCT",
            _ => {
                let complex = ["array<", "map<", "struct<"]
                    .iter()
                    .any(|prefix| lower.starts_with(prefix));
                if !complex {
                    warn!("Unknown managed type '{}', passing through", native);
                }
                return native.trim().to_uppercase();
            }
        };
        mapped.to_string()
    }

    /// Answer `DESCRIBE database.table` from catalog metadata.
    pub async fn describe_via_catalog(
        catalog: &dyn MetadataCatalog,
        database: &str,
        table: &str,
    ) -> Result<RowSet> {
        let columns = catalog.table_types(database, table).await?;
        if columns.is_empty() {
            return Err(BridgeError::Catalog(format!(
                "No columns found for table {}.{}",
                database, table
            )));
        }

        let rows = columns
            .into_iter()
            .map(|(name, native)| {
                vec![
                    Value::String(name),
                    Value::String(Self::map_type_name(&native)),
                    Value::String(String::new()),
                ]
            })
            .collect::<Vec<_>>();

        info!("Retrieved metadata for {}.{}: {} columns", database, table, rows.len());
        Ok(RowSet::new(
            DESCRIBE_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows,
        ))
    }

    /// Column listing for `catalog.database.table`, `database.table` or `table`.
    pub async fn column_metadata(
        catalog: &dyn MetadataCatalog,
        table_path: &str,
        default_database: Option<&str>,
    ) -> Result<Vec<ColumnMetadata>> {
        let parts: Vec<&str> = table_path.trim().split('.').collect();
        let (database, table) = match parts.as_slice() {
            [_, database, table] | [database, table] => (*database, *table),
            [table] => (default_database.unwrap_or(DEFAULT_DATABASE), *table),
            _ => {
                return Err(BridgeError::InvalidInput(format!(
                    "Invalid table path format: {}",
                    table_path
                )))
            }
        };

        let columns = catalog.table_types(database, table).await?;
        Ok(columns
            .into_iter()
            .map(|(column_name, native)| ColumnMetadata {
                column_type: Self::map_type_name(&native),
                column_name,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::managed::StaticCatalog;

    #[test]
    fn test_rewrite_drops_catalog_only_for_three_parts() {
        assert_eq!(
            AthenaTranslator::rewrite_table_references(
                "SELECT * FROM AwsDataCatalog.sales.orders o JOIN sales.items i ON o.id = i.id"
            ),
            "SELECT * FROM sales.orders o JOIN sales.items i ON o.id = i.id"
        );
        assert_eq!(
            AthenaTranslator::rewrite_table_references("select 1 from orders"),
            "select 1 from orders"
        );
    }

    #[test]
    fn test_rewrite_strips_single_quotes_and_keeps_keyword_case() {
        assert_eq!(
            AthenaTranslator::rewrite_table_references("select * from 'cat.db.t' join 'db.u' on true"),
            "select * from db.t join db.u on true"
        );
    }

    #[test]
    fn test_rewrite_keeps_double_quoted_identifiers() {
        let sql = r#"SELECT * FROM "order" JOIN "Select" s ON true"#;
        assert_eq!(AthenaTranslator::rewrite_table_references(sql), sql);
    }

    #[test]
    fn test_rewrite_leaves_four_parts_alone() {
        let sql = "SELECT * FROM a.b.c.d";
        assert_eq!(AthenaTranslator::rewrite_table_references(sql), sql);
    }

    #[test]
    fn test_extract_database() {
        assert_eq!(
            AthenaTranslator::extract_database("SELECT * FROM cat.sales.orders"),
            Some("sales".to_string())
        );
        assert_eq!(
            AthenaTranslator::extract_database("SELECT * FROM sales.orders"),
            Some("sales".to_string())
        );
        assert_eq!(AthenaTranslator::extract_database("SELECT * FROM orders"), None);
        assert_eq!(
            AthenaTranslator::extract_database(
                "-- FROM hidden.table\n/* FROM other.t */ SELECT *\nFROM\n  'web.clicks'"
            ),
            Some("web".to_string())
        );
    }

    #[test]
    fn test_detect_describe() {
        assert_eq!(
            AthenaTranslator::detect_describe("DESCRIBE sales.orders"),
            Some(DescribeTarget {
                database: Some("sales".to_string()),
                table: "orders".to_string()
            })
        );
        assert_eq!(
            AthenaTranslator::detect_describe("  describe orders  "),
            Some(DescribeTarget {
                database: None,
                table: "orders".to_string()
            })
        );
        assert_eq!(AthenaTranslator::detect_describe("SELECT * FROM orders"), None);
        assert_eq!(AthenaTranslator::detect_describe("DESCRIBE a.b.c"), None);
    }

    #[test]
    fn test_map_type_name() {
        assert_eq!(AthenaTranslator::map_type_name("string"), "VARCHAR");
        assert_eq!(AthenaTranslator::map_type_name("BIGINT"), "BIGINT");
        assert_eq!(AthenaTranslator::map_type_name("binary"), "BLOB");
        assert_eq!(AthenaTranslator::map_type_name("array<string>"), "ARRAY<STRING>");
        assert_eq!(AthenaTranslator::map_type_name("geography"), "GEOGRAPHY");
    }

    #[tokio::test]
    async fn test_describe_via_catalog() {
        let catalog = StaticCatalog::new().with_table(
            "sales",
            "orders",
            vec![("id", "bigint"), ("note", "string")],
        );

        let rows = AthenaTranslator::describe_via_catalog(&catalog, "sales", "orders")
            .await
            .unwrap();
        assert_eq!(rows.column_names, vec!["col_name", "data_type", "comment"]);
        assert_eq!(
            rows.rows[0],
            vec![Value::from("id"), Value::from("BIGINT"), Value::from("")]
        );

        let empty = StaticCatalog::new().with_table("sales", "ghost", Vec::<(&str, &str)>::new());
        assert!(AthenaTranslator::describe_via_catalog(&empty, "sales", "ghost")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_column_metadata_paths() {
        let catalog = StaticCatalog::new()
            .with_table("default", "t", vec![("a", "int")])
            .with_table("web", "t", vec![("b", "double")]);

        let cols = AthenaTranslator::column_metadata(&catalog, "t", None).await.unwrap();
        assert_eq!(cols[0].column_type, "INTEGER");
        let cols = AthenaTranslator::column_metadata(&catalog, "AwsDataCatalog.web.t", None)
            .await
            .unwrap();
        assert_eq!(cols[0].column_name, "b");
        assert!(AthenaTranslator::column_metadata(&catalog, "a.b.c.d", None).await.is_err());
    }
}
