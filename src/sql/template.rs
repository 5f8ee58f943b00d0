//! Template scanning and placeholder rewriting.

use crate::error::DbResult;
use crate::models::Scope;
use crate::sql::cache::statement_cache;
use crate::sql::expr::{Expression, parse_placeholder};
use crate::sql::{Arguments, ParamStyle};
use std::sync::Arc;

/// Placeholder marker.
const MARKER: char = '$';

/// Produces bind arguments for one adapted statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluator {
    /// The statement has no placeholders.
    Nothing,
    Positional(Vec<Expression>),
    Named(Vec<(String, Expression)>),
}

impl Evaluator {
    /// Evaluate every placeholder against `scope`, in placeholder order.
    pub fn evaluate(&self, scope: &dyn Scope) -> DbResult<Arguments> {
        match self {
            Self::Nothing => Ok(Arguments::None),
            Self::Positional(exprs) => exprs
                .iter()
                .map(|e| e.evaluate(scope))
                .collect::<DbResult<Vec<_>>>()
                .map(Arguments::Positional),
            Self::Named(exprs) => exprs
                .iter()
                .map(|(key, e)| Ok((key.clone(), e.evaluate(scope)?)))
                .collect::<DbResult<Vec<_>>>()
                .map(Arguments::Named),
        }
    }

    /// Number of placeholders.
    pub fn len(&self) -> usize {
        match self {
            Self::Nothing => 0,
            Self::Positional(e) => e.len(),
            Self::Named(e) => e.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A compiled template: provider SQL plus its argument evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptedSql {
    pub sql: String,
    pub evaluator: Evaluator,
}

enum Segment<'a> {
    Text(&'a str),
    Placeholder(String),
}

/// Compile a template without consulting the cache.
pub fn compile(template: &str, style: ParamStyle) -> DbResult<AdaptedSql> {
    let mut segments = Vec::new();
    let mut exprs: Vec<Expression> = Vec::new();
    let mut pos = 0;

    while let Some(offset) = template[pos..].find(MARKER) {
        let marker = pos + offset;
        segments.push(Segment::Text(&template[pos..marker]));
        let after = marker + MARKER.len_utf8();
        if template[after..].starts_with(MARKER) {
            segments.push(Segment::Text(&template[after..after + MARKER.len_utf8()]));
            pos = after + MARKER.len_utf8();
            continue;
        }
        let (expr, end) = parse_placeholder(template, after)?;
        exprs.push(expr);
        segments.push(Segment::Placeholder(style.placeholder(exprs.len())));
        pos = end;
    }
    segments.push(Segment::Text(&template[pos..]));

    // Printf-style providers only format the text when arguments are bound.
    let escape_percent = style.escapes_percent() && !exprs.is_empty();
    let mut sql = String::with_capacity(template.len());
    for segment in segments {
        match segment {
            Segment::Text(text) if escape_percent => sql.push_str(&text.replace('%', "%%")),
            Segment::Text(text) => sql.push_str(text),
            Segment::Placeholder(p) => sql.push_str(&p),
        }
    }

    let evaluator = if exprs.is_empty() {
        Evaluator::Nothing
    } else if style.is_named() {
        Evaluator::Named(
            exprs
                .into_iter()
                .enumerate()
                .map(|(i, e)| (ParamStyle::key(i + 1), e))
                .collect(),
        )
    } else {
        Evaluator::Positional(exprs)
    };

    Ok(AdaptedSql { sql, evaluator })
}

/// Compile a template through the process-wide statement cache.
pub fn adapt_sql(template: &str, style: ParamStyle) -> DbResult<Arc<AdaptedSql>> {
    statement_cache().adapt(template, style)
}
