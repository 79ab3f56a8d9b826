//! Type compatibility filtering
//!
//! Decides which columns of a versioned table can be held by the embedded
//! engine. Rejected columns are left out of the cached snapshot; they never
//! fail a query unless nothing is left.

use crate::error::{BridgeError, Result};
use crate::table::types::EXTENSION_NAME_KEY;
use arrow::datatypes::{DataType, Field, Schema};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Per-field verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityDecision {
    pub field_name: String,
    pub compatible: bool,
    /// Why the field was rejected (absent when compatible)
    pub reason: Option<String>,
}

/// Result of partitioning a schema
#[derive(Debug, Clone, PartialEq)]
pub struct CompatibilityPartition {
    pub compatible: Vec<Field>,
    pub incompatible: Vec<CompatibilityDecision>,
}

impl CompatibilityPartition {
    pub fn compatible_names(&self) -> Vec<String> {
        self.compatible.iter().map(|f| f.name().clone()).collect()
    }

    pub fn incompatible_names(&self) -> Vec<String> {
        self.incompatible.iter().map(|d| d.field_name.clone()).collect()
    }
}

/// Filters out fields the embedded engine cannot represent.
#[derive(Debug, Clone)]
pub struct TypeCompatibilityFilter {
    native_extensions: Vec<String>,
}

impl Default for TypeCompatibilityFilter {
    fn default() -> Self {
        Self {
            native_extensions: vec!["arrow.json".to_string()],
        }
    }
}

impl TypeCompatibilityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extension types the embedded engine reads natively through their storage type
    pub fn with_native_extensions<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            native_extensions: extensions.into_iter().map(Into::into).collect(),
        }
    }

    /// Judge a single field.
    pub fn check_field(&self, field: &Field) -> CompatibilityDecision {
        let mut reasons = Vec::new();

        if let Some(extension) = field.metadata().get(EXTENSION_NAME_KEY) {
            if !self.native_extensions.iter().any(|e| e == extension) {
                reasons.push(format!("extension type '{}' is not supported", extension));
            }
        }
        collect_type_reasons(field.data_type(), &mut reasons);

        CompatibilityDecision {
            field_name: field.name().clone(),
            compatible: reasons.is_empty(),
            reason: if reasons.is_empty() {
                None
            } else {
                Some(reasons.join("; "))
            },
        }
    }

    /// Split a schema into representable and rejected fields. Pure; never fails.
    pub fn partition(&self, schema: &Schema) -> CompatibilityPartition {
        let mut compatible = Vec::new();
        let mut incompatible = Vec::new();

        for field in schema.fields() {
            let decision = self.check_field(field);
            if decision.compatible {
                compatible.push(field.as_ref().clone());
            } else {
                incompatible.push(decision);
            }
        }

        CompatibilityPartition {
            compatible,
            incompatible,
        }
    }

    /// Partition and require at least one compatible field.
    ///
    /// Logs one warning per rejected field.
    pub fn filter(&self, table_name: &str, schema: &Schema) -> Result<CompatibilityPartition> {
        let partition = self.partition(schema);

        for decision in &partition.incompatible {
            warn!(
                "Skipping column '{}' of table '{}': {}",
                decision.field_name,
                table_name,
                decision.reason.as_deref().unwrap_or("incompatible type")
            );
        }

        if partition.compatible.is_empty() {
            return Err(BridgeError::NoCompatibleColumns(table_name.to_string()));
        }

        Ok(partition)
    }
}

fn collect_type_reasons(dtype: &DataType, reasons: &mut Vec<String>) {
    match dtype {
        DataType::Float16 => reasons.push("half-precision float".to_string()),
        DataType::Duration(_) => reasons.push("duration type".to_string()),
        DataType::Interval(_) => reasons.push("interval type".to_string()),
        DataType::LargeBinary => reasons.push("large binary (64-bit offsets)".to_string()),
        DataType::LargeUtf8 => reasons.push("large string (64-bit offsets)".to_string()),
        DataType::LargeList(item) | DataType::LargeListView(item) => {
            reasons.push("large list (64-bit offsets)".to_string());
            collect_type_reasons(item.data_type(), reasons);
        }
        DataType::List(item) | DataType::ListView(item) | DataType::FixedSizeList(item, _) => {
            collect_type_reasons(item.data_type(), reasons)
        }
        DataType::Struct(fields) => {
            for child in fields {
                collect_type_reasons(child.data_type(), reasons);
            }
        }
        DataType::Map(entries, _) => collect_type_reasons(entries.data_type(), reasons),
        DataType::Dictionary(_, values) => collect_type_reasons(values, reasons),
        _ => {}
    }
}
