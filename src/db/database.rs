//! The database handle.

use crate::db::context::{self, SharedConnection, lock_connection};
use crate::db::provider::{Cursor, Provider};
use crate::error::{DbError, DbResult};
use crate::models::{DEFAULT_MAX_ROWS, Record, Scope, Selection, Value};
use crate::sql::{AdaptedSql, Arguments, InsertCache, StatementCache, statement_cache};
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, LazyLock, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

static SELECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*select\b").expect("select pattern is valid"));

/// True if the template starts with the `select` keyword.
pub fn is_select(template: &str) -> bool {
    SELECT_RE.is_match(template)
}

/// Prefix `select ` unless the template already starts with it.
pub fn select_prefixed(template: &str) -> Cow<'_, str> {
    if is_select(template) {
        Cow::Borrowed(template)
    } else {
        Cow::Owned(format!("select {}", template))
    }
}

/// Per-handle settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Most rows `select` returns before failing with `TooManyRowsFound`.
    pub max_rows: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
        }
    }
}

/// A logical database handle.
///
/// The handle holds no connection itself: each thread resolves its own
/// connection for the handle through the execution context registry on first
/// use, and keeps it until the unit of work ends or [`release`](Self::release)
/// is called. Clones share identity, so they resolve to the same connection.
#[derive(Clone)]
pub struct Database {
    id: Uuid,
    label: Arc<str>,
    provider: Arc<dyn Provider>,
    settings: Settings,
    statements: Arc<StatementCache>,
    inserts: Arc<InsertCache>,
}

impl Database {
    /// Create a handle, checking that the provider can open a connection.
    pub fn new(provider: Arc<dyn Provider>) -> DbResult<Self> {
        let connection = provider.connect()?;
        provider.release(connection)?;
        info!(provider = provider.name(), "Database handle created");
        Ok(Self::unchecked(provider))
    }

    /// Create a handle without opening a connection.
    pub fn unchecked(provider: Arc<dyn Provider>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: Arc::from(provider.name()),
            provider,
            settings: Settings::default(),
            statements: statement_cache(),
            inserts: Arc::new(InsertCache::unbounded()),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Arc::from(label.into());
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.settings.max_rows = max_rows;
        self
    }

    /// Use `cache` instead of the process-wide statement cache.
    pub fn with_statement_cache(mut self, cache: Arc<StatementCache>) -> Self {
        self.statements = cache;
        self
    }

    pub fn with_insert_cache(mut self, cache: Arc<InsertCache>) -> Self {
        self.inserts = cache;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The current thread's connection for this handle.
    pub fn connection(&self) -> DbResult<SharedConnection> {
        context::get_or_create_connection(self)
    }

    fn adapt(&self, template: &str) -> DbResult<Arc<AdaptedSql>> {
        self.statements.adapt(template, self.provider.param_style())
    }

    /// Run adapted SQL. With a `limit`, at most that many rows are read.
    fn run(
        &self,
        connection: &SharedConnection,
        sql: &str,
        args: &Arguments,
        limit: Option<usize>,
    ) -> DbResult<Cursor> {
        debug!(
            database = %self.label,
            sql = %sql,
            arguments = ?args,
            limit = ?limit,
            "Executing statement"
        );
        let mut connection = lock_connection(connection);
        let cursor = match limit {
            Some(limit) => connection.query(sql, args, limit)?,
            None => connection.execute(sql, args)?,
        };
        Ok(cursor)
    }

    fn run_template(
        &self,
        template: &str,
        scope: &dyn Scope,
        limit: Option<usize>,
    ) -> DbResult<Cursor> {
        let connection = self.connection()?;
        let adapted = self.adapt(template)?;
        let args = adapted.evaluator.evaluate(scope)?;
        self.run(&connection, &adapted.sql, &args, limit)
    }

    /// Run a template as-is and return its cursor.
    pub fn execute(&self, template: &str, scope: &dyn Scope) -> DbResult<Cursor> {
        self.run_template(template, scope, None)
    }

    /// Run a query and materialize at most `max_rows` rows.
    ///
    /// `select ` is prepended when the template does not start with it.
    /// Single-column results are flattened into their values.
    pub fn select(&self, template: &str, scope: &dyn Scope) -> DbResult<Selection> {
        let template = select_prefixed(template);
        let limit = self.settings.max_rows;
        // one extra row tells a full result from an overflowing one
        let mut cursor = self.run_template(&template, scope, Some(limit.saturating_add(1)))?;

        let rows = cursor.fetch_many(limit);
        if cursor.fetch_one().is_some() {
            return Err(DbError::TooManyRowsFound { limit });
        }

        if cursor.column_count() == 1 {
            Ok(Selection::Values(
                rows.into_iter()
                    .map(|row| row.into_values().into_iter().next().unwrap_or(Value::Null))
                    .collect(),
            ))
        } else {
            Ok(Selection::Rows(rows))
        }
    }

    /// Run a query expected to produce exactly one row.
    pub fn get(&self, template: &str, scope: &dyn Scope) -> DbResult<Record> {
        let selection = self.select(template, scope)?;
        match selection.len() {
            0 => Err(DbError::RowNotFound),
            1 => selection
                .into_records()
                .into_iter()
                .next()
                .ok_or(DbError::RowNotFound),
            count => Err(DbError::MultipleRowsFound { count }),
        }
    }

    /// True if the query produces at least one row.
    pub fn exists(&self, template: &str, scope: &dyn Scope) -> DbResult<bool> {
        let template = select_prefixed(template);
        let mut cursor = self.run_template(&template, scope, Some(1))?;
        Ok(cursor.fetch_one().is_some())
    }

    /// Insert one row and return the provider's last row id, if any.
    ///
    /// Statements are cached per table and column order; the same columns in
    /// a different order compile a separate statement.
    pub fn insert(&self, table: &str, values: &[(&str, Value)]) -> DbResult<Option<i64>> {
        let mut seen = HashSet::with_capacity(values.len());
        if let Some((column, _)) = values.iter().find(|(column, _)| !seen.insert(*column)) {
            return Err(DbError::invalid_input(format!(
                "Column '{}' is given more than once",
                column
            )));
        }

        let connection = self.connection()?;
        let columns: Vec<String> = values.iter().map(|(c, _)| c.to_string()).collect();
        let insert = self
            .inserts
            .get_or_try_insert_with((table.to_string(), columns.clone()), || {
                self.provider.insert_sql(table, &columns)
            })?;
        let args = insert
            .adapter
            .adapt(values.iter().map(|(_, v)| v.clone()).collect())?;
        let cursor = self.run(&connection, &insert.sql, &args, None)?;
        Ok(cursor.last_row_id())
    }

    /// Run one template once per scope. Returns the total rows affected.
    pub fn execute_many<S: Scope>(&self, template: &str, scopes: &[S]) -> DbResult<u64> {
        let connection = self.connection()?;
        let adapted = self.adapt(template)?;
        let batch = scopes
            .iter()
            .map(|scope| adapted.evaluator.evaluate(scope))
            .collect::<DbResult<Vec<_>>>()?;
        debug!(
            database = %self.label,
            sql = %adapted.sql,
            batch = batch.len(),
            "Executing batch"
        );
        lock_connection(&connection)
            .execute_many(&adapted.sql, &batch)
            .map_err(DbError::from)
    }

    pub fn commit(&self) -> DbResult<()> {
        let connection = self.connection()?;
        lock_connection(&connection).commit().map_err(DbError::from)
    }

    pub fn rollback(&self) -> DbResult<()> {
        let connection = self.connection()?;
        lock_connection(&connection).rollback().map_err(DbError::from)
    }

    /// Return this thread's connection to the provider.
    pub fn release(&self) -> DbResult<()> {
        context::release(self)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("provider", &self.provider.name())
            .field("settings", &self.settings)
            .finish()
    }
}

impl PartialEq for Database {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Database {}

static DEFAULT_DATABASE: RwLock<Option<Database>> = RwLock::new(None);

/// Make `db` the process-wide default handle, returning the previous one.
pub fn set_default_database(db: Database) -> Option<Database> {
    DEFAULT_DATABASE
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .replace(db)
}

pub fn clear_default_database() -> Option<Database> {
    DEFAULT_DATABASE
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .take()
}

/// The process-wide default handle.
pub fn default_database() -> DbResult<Database> {
    DEFAULT_DATABASE
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
        .ok_or(DbError::NoDefaultDb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_prefix_added() {
        assert_eq!(select_prefixed("name from users"), "select name from users");
        assert_eq!(select_prefixed("1"), "select 1");
    }

    #[test]
    fn test_select_prefix_kept() {
        assert_eq!(select_prefixed("SELECT 1"), "SELECT 1");
        assert_eq!(select_prefixed("  select * from t"), "  select * from t");
        assert_eq!(select_prefixed("\n\tSelect x"), "\n\tSelect x");
    }

    #[test]
    fn test_select_prefix_requires_word_boundary() {
        assert_eq!(select_prefixed("selected from t"), "select selected from t");
    }

    #[test]
    fn test_default_settings() {
        assert_eq!(Settings::default().max_rows, DEFAULT_MAX_ROWS);
    }
}
