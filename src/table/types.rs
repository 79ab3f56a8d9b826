//! Table-store type names.
//!
//! Manifests record column types as lower-case names such as `int64`,
//! `large_string`, `list<float32>` or `fixed_size_list<float32, 512>`.
//! This module turns them into arrow fields so compatibility rules can be
//! evaluated on real type descriptors.

use arrow::datatypes::{DataType, Field, Fields, IntervalUnit, TimeUnit};
use std::collections::HashMap;
use std::sync::Arc;

/// Field metadata key carrying an arrow extension type name.
pub const EXTENSION_NAME_KEY: &str = "ARROW:extension:name";

/// Parse a store type name into an arrow data type.
///
/// Returns `None` for names this store does not know.
pub fn parse_type_name(name: &str) -> Option<DataType> {
    let name = name.trim().to_ascii_lowercase();

    if let Some((head, args)) = split_generic(&name) {
        return match head {
            "list" => {
                let item = parse_type_name(args.first()?)?;
                Some(DataType::List(Arc::new(Field::new_list_field(item, true))))
            }
            "large_list" => {
                let item = parse_type_name(args.first()?)?;
                Some(DataType::LargeList(Arc::new(Field::new_list_field(item, true))))
            }
            "fixed_size_list" => {
                if args.len() != 2 {
                    return None;
                }
                let item = parse_type_name(&args[0])?;
                let size = args[1].trim().parse::<i32>().ok()?;
                Some(DataType::FixedSizeList(
                    Arc::new(Field::new_list_field(item, true)),
                    size,
                ))
            }
            "struct" => {
                let mut fields = Vec::with_capacity(args.len());
                for member in &args {
                    let (field_name, field_type) = member.split_once(':')?;
                    let dtype = parse_type_name(field_type)?;
                    fields.push(Field::new(field_name.trim(), dtype, true));
                }
                Some(DataType::Struct(Fields::from(fields)))
            }
            _ => None,
        };
    }

    if let Some(unit) = bracketed(&name, "timestamp") {
        return Some(DataType::Timestamp(parse_time_unit(unit)?, None));
    }
    if let Some(unit) = bracketed(&name, "duration") {
        return Some(DataType::Duration(parse_time_unit(unit)?));
    }
    if let Some(unit) = bracketed(&name, "interval") {
        let unit = match unit {
            "year_month" => IntervalUnit::YearMonth,
            "day_time" => IntervalUnit::DayTime,
            "month_day_nano" => IntervalUnit::MonthDayNano,
            _ => return None,
        };
        return Some(DataType::Interval(unit));
    }
    if let Some(params) = parenthesized(&name, "decimal") {
        let (precision, scale) = params.split_once(',')?;
        return Some(DataType::Decimal128(
            precision.trim().parse().ok()?,
            scale.trim().parse().ok()?,
        ));
    }

    let dtype = match name.as_str() {
        "null" => DataType::Null,
        "bool" | "boolean" => DataType::Boolean,
        "int8" => DataType::Int8,
        "int16" => DataType::Int16,
        "int32" => DataType::Int32,
        "int64" => DataType::Int64,
        "uint8" => DataType::UInt8,
        "uint16" => DataType::UInt16,
        "uint32" => DataType::UInt32,
        "uint64" => DataType::UInt64,
        "float16" | "halffloat" => DataType::Float16,
        "float32" | "float" => DataType::Float32,
        "float64" | "double" => DataType::Float64,
        "string" | "utf8" => DataType::Utf8,
        "large_string" | "large_utf8" => DataType::LargeUtf8,
        "binary" => DataType::Binary,
        "large_binary" => DataType::LargeBinary,
        "date32" | "date" => DataType::Date32,
        "date64" => DataType::Date64,
        "timestamp" => DataType::Timestamp(TimeUnit::Microsecond, None),
        "duration" => DataType::Duration(TimeUnit::Microsecond),
        "interval" => DataType::Interval(IntervalUnit::MonthDayNano),
        _ => return None,
    };
    Some(dtype)
}

/// Build the arrow field for a declared column.
///
/// Unknown type names become opaque binary fields tagged with the raw name
/// as their extension type, so downstream filtering treats them as custom
/// logical types.
pub fn declared_field(name: &str, type_name: &str, nullable: bool, extension: Option<&str>) -> Field {
    match (parse_type_name(type_name), extension) {
        (Some(dtype), None) => Field::new(name, dtype, nullable),
        (Some(dtype), Some(ext)) => Field::new(name, dtype, nullable).with_metadata(extension_metadata(ext)),
        (None, _) => Field::new(name, DataType::Binary, nullable)
            .with_metadata(extension_metadata(type_name.trim())),
    }
}

fn extension_metadata(name: &str) -> HashMap<String, String> {
    HashMap::from([(EXTENSION_NAME_KEY.to_string(), name.to_string())])
}

fn parse_time_unit(unit: &str) -> Option<TimeUnit> {
    match unit {
        "s" => Some(TimeUnit::Second),
        "ms" => Some(TimeUnit::Millisecond),
        "us" => Some(TimeUnit::Microsecond),
        "ns" => Some(TimeUnit::Nanosecond),
        _ => None,
    }
}

fn bracketed<'a>(name: &'a str, head: &str) -> Option<&'a str> {
    name.strip_prefix(head)?
        .strip_prefix('[')?
        .strip_suffix(']')
        .map(str::trim)
}

fn parenthesized<'a>(name: &'a str, head: &str) -> Option<&'a str> {
    name.strip_prefix(head)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
}

/// Split `head<a, b<c, d>>` into `("head", ["a", "b<c, d>"])`.
fn split_generic(name: &str) -> Option<(&str, Vec<String>)> {
    let open = name.find('<')?;
    let inner = name[open + 1..].strip_suffix('>')?;
    let head = name[..open].trim();

    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for ch in inner.chars() {
        match ch {
            '<' => {
                depth += 1;
                current.push(ch);
            }
            '>' => {
                depth = depth.checked_sub(1)?;
                current.push(ch);
            }
            ',' if depth == 0 => {
                args.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if depth != 0 {
        return None;
    }
    if !current.trim().is_empty() {
        args.push(current.trim().to_string());
    }
    Some((head, args))
}
