//! INSERT statement construction.

use crate::error::{DbError, DbResult};
use crate::models::Value;
use crate::sql::{Arguments, ParamStyle};
use sqlparser::ast::Ident;

/// Quote an identifier with double quotes, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    Ident::with_quote('"', name).to_string()
}

/// Maps caller values (in column order) onto the bind arguments an
/// INSERT statement expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentAdapter {
    Positional,
    /// Keys in column order.
    Named(Vec<String>),
}

impl ArgumentAdapter {
    pub fn for_style(style: ParamStyle, columns: usize) -> Self {
        if style.is_named() {
            Self::Named((1..=columns).map(ParamStyle::key).collect())
        } else {
            Self::Positional
        }
    }

    pub fn adapt(&self, values: Vec<Value>) -> DbResult<Arguments> {
        match self {
            Self::Positional if values.is_empty() => Ok(Arguments::None),
            Self::Positional => Ok(Arguments::Positional(values)),
            Self::Named(keys) => {
                if keys.len() != values.len() {
                    return Err(DbError::invalid_input(format!(
                        "expected {} values, got {}",
                        keys.len(),
                        values.len()
                    )));
                }
                if keys.is_empty() {
                    return Ok(Arguments::None);
                }
                Ok(Arguments::Named(keys.iter().cloned().zip(values).collect()))
            }
        }
    }
}

/// A compiled INSERT statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertSql {
    pub sql: String,
    pub adapter: ArgumentAdapter,
}

/// Build `INSERT INTO "table" ("c1", ...) VALUES (...)` for `style`.
///
/// With no columns the statement inserts a row of defaults.
pub fn build_insert(
    table: &str,
    columns: &[String],
    style: ParamStyle,
    quote: impl Fn(&str) -> String,
) -> DbResult<InsertSql> {
    if table.is_empty() {
        return Err(DbError::invalid_input("table name is empty"));
    }
    if let Some(bad) = columns.iter().find(|c| c.is_empty()) {
        return Err(DbError::invalid_input(format!(
            "empty column name in insert into '{}' ({:?})",
            table, bad
        )));
    }

    // Identifiers are formatted along with the placeholders.
    let ident = |name: &str| {
        let quoted = quote(name);
        if style.escapes_percent() && !columns.is_empty() {
            quoted.replace('%', "%%")
        } else {
            quoted
        }
    };

    let sql = if columns.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", ident(table))
    } else {
        let names: Vec<String> = columns.iter().map(|c| ident(c)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|n| style.placeholder(n)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            ident(table),
            names.join(", "),
            placeholders.join(", ")
        )
    };

    Ok(InsertSql {
        sql,
        adapter: ArgumentAdapter::for_style(style, columns.len()),
    })
}
