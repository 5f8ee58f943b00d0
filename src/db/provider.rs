//! Provider and connection interfaces.
//!
//! A [`Provider`] knows how to open connections to one database and which
//! parameter style its SQL expects. A [`Connection`] executes adapted SQL and
//! owns the transaction that is implicitly open on it.

use crate::error::{DbResult, ProviderResult};
use crate::models::{Columns, Row, Value};
use crate::sql::{Arguments, InsertSql, ParamStyle, build_insert, quote_identifier};
use std::collections::VecDeque;
use std::sync::Arc;

/// A live database connection.
///
/// A transaction is implicitly open from the first statement until `commit`
/// or `rollback`.
pub trait Connection: Send {
    fn execute(&mut self, sql: &str, args: &Arguments) -> ProviderResult<Cursor>;

    /// Execute a statement, reading at most `limit` result rows.
    ///
    /// Providers that can stream rows should stop at the limit instead of
    /// buffering the whole result first.
    fn query(&mut self, sql: &str, args: &Arguments, limit: usize) -> ProviderResult<Cursor> {
        let mut cursor = self.execute(sql, args)?;
        cursor.truncate(limit);
        Ok(cursor)
    }

    /// Execute one statement per argument set. Returns total rows affected.
    fn execute_many(&mut self, sql: &str, batch: &[Arguments]) -> ProviderResult<u64> {
        let mut affected = 0;
        for args in batch {
            affected += self.execute(sql, args)?.rows_affected();
        }
        Ok(affected)
    }

    fn commit(&mut self) -> ProviderResult<()>;

    fn rollback(&mut self) -> ProviderResult<()>;
}

/// A database backend.
pub trait Provider: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &str;

    fn param_style(&self) -> ParamStyle;

    fn connect(&self) -> ProviderResult<Box<dyn Connection>>;

    /// Take back a connection obtained from `connect`.
    fn release(&self, connection: Box<dyn Connection>) -> ProviderResult<()>;

    fn quote_identifier(&self, name: &str) -> String {
        quote_identifier(name)
    }

    /// SQL for inserting one row into `table` with `columns` in the given order.
    fn insert_sql(&self, table: &str, columns: &[String]) -> DbResult<InsertSql> {
        build_insert(table, columns, self.param_style(), |name| {
            self.quote_identifier(name)
        })
    }
}

/// Buffered result of one statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    columns: Arc<Columns>,
    rows: VecDeque<Vec<Value>>,
    rows_affected: u64,
    last_row_id: Option<i64>,
}

impl Cursor {
    /// Result of a statement that produced rows.
    pub fn with_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns: Arc::new(Columns::new(columns)),
            rows: rows.into(),
            rows_affected: 0,
            last_row_id: None,
        }
    }

    /// Result of a statement that produced no rows.
    pub fn with_outcome(rows_affected: u64, last_row_id: Option<i64>) -> Self {
        Self {
            columns: Arc::new(Columns::new(Vec::new())),
            rows: VecDeque::new(),
            rows_affected,
            last_row_id,
        }
    }

    pub fn columns(&self) -> &Arc<Columns> {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    pub fn last_row_id(&self) -> Option<i64> {
        self.last_row_id
    }

    /// Rows not fetched yet.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }

    /// Drop every row past the first `limit`.
    pub fn truncate(&mut self, limit: usize) {
        self.rows.truncate(limit);
    }

    pub fn fetch_one(&mut self) -> Option<Row> {
        let values = self.rows.pop_front()?;
        Some(Row::new(Arc::clone(&self.columns), values))
    }

    pub fn fetch_many(&mut self, limit: usize) -> Vec<Row> {
        let take = limit.min(self.rows.len());
        self.rows
            .drain(..take)
            .map(|values| Row::new(Arc::clone(&self.columns), values))
            .collect()
    }

    pub fn fetch_all(&mut self) -> Vec<Row> {
        self.fetch_many(self.rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor() -> Cursor {
        Cursor::with_rows(
            vec!["id".into(), "name".into()],
            vec![
                vec![Value::Int(1), Value::Text("a".into())],
                vec![Value::Int(2), Value::Text("b".into())],
                vec![Value::Int(3), Value::Text("c".into())],
            ],
        )
    }

    #[test]
    fn test_fetch_many_consumes_in_order() {
        let mut cursor = cursor();
        let rows = cursor.fetch_many(2);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("name"), Some(&Value::Text("b".into())));
        assert_eq!(cursor.remaining(), 1);
        assert_eq!(cursor.fetch_one().unwrap()[0], Value::Int(3));
        assert!(cursor.fetch_one().is_none());
    }

    #[test]
    fn test_fetch_many_beyond_end() {
        let mut cursor = cursor();
        assert_eq!(cursor.fetch_many(10).len(), 3);
        assert!(cursor.fetch_all().is_empty());
    }

    #[test]
    fn test_truncate_keeps_leading_rows() {
        let mut cursor = cursor();
        cursor.truncate(2);
        assert_eq!(cursor.remaining(), 2);
        assert_eq!(cursor.fetch_all()[1][0], Value::Int(2));
    }

    #[test]
    fn test_outcome_cursor() {
        let cursor = Cursor::with_outcome(1, Some(42));
        assert_eq!(cursor.column_count(), 0);
        assert_eq!(cursor.last_row_id(), Some(42));
        assert_eq!(cursor.rows_affected(), 1);
    }
}
