//! Parameter binding for SQLite queries.

use crate::error::{ErrorKind, ProviderError, ProviderResult};
use crate::models::Value;
use crate::sql::Arguments;
use sqlx::Sqlite;
use sqlx::sqlite::SqliteArguments;

pub(crate) type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Bind a value to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(query: SqliteQuery<'q>, param: &'q Value) -> SqliteQuery<'q> {
    match param {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        // SQLite doesn't have native JSON type, store as string
        Value::Json(v) => query.bind(v.to_string()),
    }
}

/// Build a query with every argument bound in placeholder order.
///
/// The provider adapts templates to `?` placeholders, so named arguments
/// can only come from a caller bypassing the compiler and are rejected.
pub(crate) fn bind_arguments<'q>(sql: &'q str, args: &'q Arguments) -> ProviderResult<SqliteQuery<'q>> {
    if matches!(args, Arguments::Named(_)) {
        return Err(ProviderError::new(
            ErrorKind::Interface,
            "SQLite binds positional arguments only",
        ));
    }
    Ok(args
        .values()
        .into_iter()
        .fold(sqlx::query(sql), bind_sqlite_param))
}
