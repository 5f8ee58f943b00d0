//! SQLite type mappings.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies the declared column type
//! 2. The value's storage class decides how it is extracted
//!
//! SQLite is dynamically typed, so the declared type is only a hint: a
//! `BOOLEAN` column yields [`Value::Bool`] and a `JSON` column is parsed, but
//! any other column decodes by what is actually stored.

use crate::error::ProviderResult;
use crate::models::Value;
use serde_json::Value as JsonValue;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, Sqlite, TypeInfo, ValueRef};

/// Logical category for a declared column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Boolean,
    Text,
    Binary,
    Json,
    Unknown,
}

/// Classify a declared type name, following SQLite's affinity rules where
/// they apply.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }
    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }
    if lower.contains("int") {
        return TypeCategory::Integer;
    }
    if lower.contains("char") || lower.contains("clob") || lower.contains("text") {
        return TypeCategory::Text;
    }
    if lower.contains("blob") {
        return TypeCategory::Binary;
    }
    if lower.contains("real") || lower.contains("floa") || lower.contains("doub") {
        return TypeCategory::Float;
    }
    if lower == "numeric" || lower.contains("decimal") {
        return TypeCategory::Float;
    }

    TypeCategory::Unknown
}

/// Decode every column of a row.
pub fn decode_row(row: &SqliteRow) -> ProviderResult<Vec<Value>> {
    (0..row.columns().len())
        .map(|idx| decode_column(row, idx))
        .collect()
}

/// Decode one column.
pub fn decode_column(row: &SqliteRow, idx: usize) -> ProviderResult<Value> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage = raw.type_info().name().to_string();
    let declared = categorize_type(row.columns()[idx].type_info().name());

    let value = match (declared, storage.as_str()) {
        (TypeCategory::Boolean, "INTEGER") => decode_as(row, idx)?.map(Value::Bool),
        (TypeCategory::Json, "TEXT") => decode_text(row, idx)?.map(|value| match value {
            Value::Text(text) => match serde_json::from_str::<JsonValue>(&text) {
                Ok(json) => Value::Json(json),
                Err(_) => Value::Text(text),
            },
            other => other,
        }),
        (_, "INTEGER") => decode_as(row, idx)?.map(Value::Int),
        (_, "REAL") => decode_as(row, idx)?.map(Value::Float),
        (_, "BLOB") => decode_as(row, idx)?.map(Value::Bytes),
        _ => decode_text(row, idx)?,
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Extract column `idx` as `T`.
fn decode_as<'r, T>(row: &'r SqliteRow, idx: usize) -> ProviderResult<Option<T>>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    Ok(row.try_get::<Option<T>, _>(idx)?)
}

/// Extract a TEXT column. SQLite does not enforce UTF-8, so text that is not
/// valid UTF-8 comes back as its raw bytes.
fn decode_text(row: &SqliteRow, idx: usize) -> ProviderResult<Option<Value>> {
    match row.try_get::<Option<String>, _>(idx) {
        Ok(text) => Ok(text.map(Value::Text)),
        Err(_) => {
            let bytes = row.try_get_unchecked::<Option<Vec<u8>>, _>(idx)?;
            Ok(bytes.map(Value::Bytes))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(categorize_type("INTEGER"), TypeCategory::Integer);
        assert_eq!(categorize_type("BIGINT"), TypeCategory::Integer);
        assert_eq!(categorize_type("tinyint"), TypeCategory::Integer);
    }

    #[test]
    fn test_categorize_type_text_and_binary() {
        assert_eq!(categorize_type("VARCHAR(20)"), TypeCategory::Text);
        assert_eq!(categorize_type("TEXT"), TypeCategory::Text);
        assert_eq!(categorize_type("BLOB"), TypeCategory::Binary);
    }

    #[test]
    fn test_categorize_type_float() {
        assert_eq!(categorize_type("REAL"), TypeCategory::Float);
        assert_eq!(categorize_type("DOUBLE PRECISION"), TypeCategory::Float);
        // NUMERIC affinity stores floats
        assert_eq!(categorize_type("numeric"), TypeCategory::Float);
    }

    #[test]
    fn test_categorize_type_hints() {
        assert_eq!(categorize_type("BOOLEAN"), TypeCategory::Boolean);
        assert_eq!(categorize_type("json"), TypeCategory::Json);
        assert_eq!(categorize_type(""), TypeCategory::Unknown);
        assert_eq!(categorize_type("NULL"), TypeCategory::Unknown);
    }
}
