//! Statement compiler.
//!
//! Turns SQL templates with embedded `$expression` placeholders into
//! provider-specific parametrized SQL plus a reusable [`Evaluator`] that
//! produces the bind arguments from a caller's [`Scope`](crate::models::Scope).
//!
//! - `expr`: placeholder expression grammar and evaluation
//! - `template`: the template scanner and `$`-rewriting
//! - `cache`: process-wide memoization of compiled statements
//! - `insert`: INSERT statement construction for `Database::insert`

pub mod cache;
pub mod expr;
pub mod insert;
pub mod template;

pub use cache::{InsertCache, StatementCache, TemplateCache, statement_cache};
pub use expr::Expression;
pub use insert::{ArgumentAdapter, InsertSql, build_insert, quote_identifier};
pub use template::{AdaptedSql, Evaluator, adapt_sql, compile};

use crate::error::{DbError, DbResult};
use crate::models::Value;
use std::fmt;
use std::str::FromStr;

/// Placeholder convention a provider expects bound values in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamStyle {
    /// `?`
    Qmark,
    /// `%s`
    Format,
    /// `:1`, `:2`, ...
    Numeric,
    /// `:p1`, `:p2`, ...
    Named,
    /// `%(p1)s`, `%(p2)s`, ...
    Pyformat,
}

impl ParamStyle {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Qmark => "qmark",
            Self::Format => "format",
            Self::Numeric => "numeric",
            Self::Named => "named",
            Self::Pyformat => "pyformat",
        }
    }

    /// Styles that bind a name → value mapping instead of a sequence.
    pub fn is_named(&self) -> bool {
        matches!(self, Self::Named | Self::Pyformat)
    }

    /// Styles whose SQL text goes through printf-style formatting, so a
    /// literal `%` must be written `%%`.
    pub fn escapes_percent(&self) -> bool {
        matches!(self, Self::Format | Self::Pyformat)
    }

    /// Key of the `n`-th (1-based) named parameter.
    pub fn key(n: usize) -> String {
        format!("p{}", n)
    }

    /// Placeholder text for the `n`-th (1-based) parameter.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Self::Qmark => "?".to_string(),
            Self::Format => "%s".to_string(),
            Self::Numeric => format!(":{}", n),
            Self::Named => format!(":{}", Self::key(n)),
            Self::Pyformat => format!("%({})s", Self::key(n)),
        }
    }
}

impl fmt::Display for ParamStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ParamStyle {
    type Err = DbError;

    fn from_str(s: &str) -> DbResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "qmark" => Ok(Self::Qmark),
            "format" => Ok(Self::Format),
            "numeric" => Ok(Self::Numeric),
            "named" => Ok(Self::Named),
            "pyformat" => Ok(Self::Pyformat),
            other => Err(DbError::not_implemented(format!(
                "parameter style '{}'",
                other
            ))),
        }
    }
}

/// Bind arguments produced by an evaluator.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Arguments {
    /// The statement has no placeholders.
    #[default]
    None,
    Positional(Vec<Value>),
    /// Named arguments in placeholder order.
    Named(Vec<(String, Value)>),
}

impl Arguments {
    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Positional(v) => v.len(),
            Self::Named(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values in placeholder order.
    pub fn values(&self) -> Vec<&Value> {
        match self {
            Self::None => Vec::new(),
            Self::Positional(v) => v.iter().collect(),
            Self::Named(v) => v.iter().map(|(_, value)| value).collect(),
        }
    }

    /// Look up a named argument.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Named(v) => v.iter().find(|(k, _)| k == key).map(|(_, value)| value),
            _ => None,
        }
    }
}
