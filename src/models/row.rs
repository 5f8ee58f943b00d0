//! Result rows and selections.

use crate::error::{DbError, DbResult};
use crate::models::Value;
use regex::Regex;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashMap;
use std::ops::Index;
use std::sync::{Arc, LazyLock};

static IDENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

/// True if `name` can be used as a column accessor.
pub fn is_ident(name: &str) -> bool {
    IDENT_RE.is_match(name)
}

/// Column layout shared by every row of one result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Columns {
    names: Vec<String>,
    by_name: HashMap<String, usize>,
}

impl Columns {
    /// Build the layout. Only identifier-shaped names are addressable by name;
    /// when two columns share a name the later one wins.
    pub fn new(names: Vec<String>) -> Self {
        let by_name = names
            .iter()
            .enumerate()
            .filter(|(_, name)| is_ident(name))
            .map(|(idx, name)| (name.clone(), idx))
            .collect();
        Self { names, by_name }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }
}

/// One materialized result row: indexed access plus named access by column.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<Columns>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<Columns>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Value of a named column.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .position(name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Value of a named column, or an error naming the missing column.
    pub fn try_get(&self, name: &str) -> DbResult<&Value> {
        self.get(name)
            .ok_or_else(|| DbError::invalid_input(format!("Row has no column named '{}'", name)))
    }

    pub fn get_index(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    pub fn columns(&self) -> &[String] {
        self.columns.names()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Convert to a JSON object keyed by column name.
    pub fn to_json_map(&self) -> serde_json::Map<String, serde_json::Value> {
        self.columns
            .names()
            .iter()
            .zip(&self.values)
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }
}

impl Index<usize> for Row {
    type Output = Value;

    fn index(&self, idx: usize) -> &Value {
        &self.values[idx]
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.columns.names().iter().zip(&self.values) {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Output of `select`: single-column results are flattened to their values.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum Selection {
    Values(Vec<Value>),
    Rows(Vec<Row>),
}

impl Selection {
    pub fn len(&self) -> usize {
        match self {
            Self::Values(v) => v.len(),
            Self::Rows(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The flattened values of a single-column selection.
    pub fn into_values(self) -> DbResult<Vec<Value>> {
        match self {
            Self::Values(v) => Ok(v),
            Self::Rows(_) => Err(DbError::invalid_input(
                "Selection has more than one column; use into_rows",
            )),
        }
    }

    /// The rows of a multi-column selection.
    pub fn into_rows(self) -> DbResult<Vec<Row>> {
        match self {
            Self::Rows(r) => Ok(r),
            Self::Values(_) => Err(DbError::invalid_input(
                "Selection has a single column; use into_values",
            )),
        }
    }

    pub fn into_records(self) -> Vec<Record> {
        match self {
            Self::Values(v) => v.into_iter().map(Record::Value).collect(),
            Self::Rows(r) => r.into_iter().map(Record::Row).collect(),
        }
    }
}

/// Output of `get`: one value or one row.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum Record {
    Value(Value),
    Row(Row),
}

impl Record {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Row(_) => None,
        }
    }

    pub fn as_row(&self) -> Option<&Row> {
        match self {
            Self::Row(r) => Some(r),
            Self::Value(_) => None,
        }
    }

    pub fn into_value(self) -> DbResult<Value> {
        match self {
            Self::Value(v) => Ok(v),
            Self::Row(_) => Err(DbError::invalid_input(
                "Record is a multi-column row, not a single value",
            )),
        }
    }

    pub fn into_row(self) -> DbResult<Row> {
        match self {
            Self::Row(r) => Ok(r),
            Self::Value(_) => Err(DbError::invalid_input(
                "Record is a single value, not a row",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(names: &[&str]) -> Arc<Columns> {
        Arc::new(Columns::new(names.iter().map(|s| s.to_string()).collect()))
    }

    #[test]
    fn test_named_and_indexed_access() {
        let row = Row::new(columns(&["id", "name"]), vec![1.into(), "bob".into()]);
        assert_eq!(row.get("name"), Some(&Value::Text("bob".into())));
        assert_eq!(row[0], Value::Int(1));
        assert!(row.try_get("email").is_err());
    }

    #[test]
    fn test_non_identifier_columns_are_index_only() {
        let row = Row::new(columns(&["count(*)", "x"]), vec![3.into(), 4.into()]);
        assert_eq!(row.get("count(*)"), None);
        assert_eq!(row.get_index(0), Some(&Value::Int(3)));
        assert_eq!(row.get("x"), Some(&Value::Int(4)));
    }

    #[test]
    fn test_duplicate_column_names_last_wins() {
        let row = Row::new(columns(&["id", "id"]), vec![1.into(), 2.into()]);
        assert_eq!(row.get("id"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_row_serializes_as_object() {
        let row = Row::new(columns(&["a", "b"]), vec![1.into(), Value::Null]);
        assert_eq!(
            serde_json::to_value(&row).unwrap(),
            serde_json::json!({"a": 1, "b": null})
        );
    }

    #[test]
    fn test_is_ident() {
        assert!(is_ident("user_id"));
        assert!(is_ident("_x1"));
        assert!(!is_ident("1x"));
        assert!(!is_ident("a b"));
        assert!(!is_ident(""));
    }

    #[test]
    fn test_selection_conversions() {
        let sel = Selection::Values(vec![1.into(), 2.into()]);
        assert_eq!(sel.len(), 2);
        assert!(sel.clone().into_rows().is_err());
        assert_eq!(sel.into_values().unwrap(), vec![Value::Int(1), Value::Int(2)]);
    }
}
