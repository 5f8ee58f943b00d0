//! Embedded placeholder expressions.
//!
//! A placeholder starts right after the `$` marker and is either a *path*
//! (`name`, `user.id`, `ids[0]`, `row["key"].x`) or a parenthesized
//! expression using the full grammar:
//!
//! ```text
//! expr    := or
//! or      := and ( "||" and )*
//! and     := eq ( "&&" eq )*
//! eq      := cmp ( ( "==" | "!=" ) cmp )*
//! cmp     := sum ( ( "<" | "<=" | ">" | ">=" ) sum )*
//! sum     := product ( ( "+" | "-" ) product )*
//! product := unary ( ( "*" | "/" | "%" ) unary )*
//! unary   := ( "-" | "!" ) unary | postfix
//! postfix := atom ( "." ident | "[" expr "]" )*
//! atom    := literal | ident | "(" expr ")"
//! ```
//!
//! The parser always takes the longest expression it can; whatever follows is
//! left to the surrounding SQL text.

use crate::error::{DbError, DbResult};
use crate::models::{Scope, Value};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn precedence(&self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Eq | Self::Ne => 3,
            Self::Lt | Self::Le | Self::Gt | Self::Ge => 4,
            Self::Add | Self::Sub => 5,
            Self::Mul | Self::Div | Self::Rem => 6,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Self::Or => "||",
            Self::And => "&&",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Name(String),
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
}

/// A parsed placeholder together with its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    /// Parse a standalone expression; the whole input must be consumed.
    pub fn parse(source: &str) -> DbResult<Self> {
        let mut parser = ExprParser::new(source, 0);
        parser.skip_ws();
        let root = parser.expr(0)?;
        parser.skip_ws();
        if parser.pos != source.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Expr {
        &self.root
    }

    /// Evaluate against a scope.
    pub fn evaluate(&self, scope: &dyn Scope) -> DbResult<Value> {
        eval(&self.root, scope, &self.source)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse the placeholder that starts at byte offset `start` of `template`
/// (the position right after the `$` marker). Returns the expression and the
/// offset where the SQL text resumes.
pub fn parse_placeholder(template: &str, start: usize) -> DbResult<(Expression, usize)> {
    let mut parser = ExprParser::new(template, start);
    let root = match parser.peek() {
        None => return Err(parser.error("unexpected end of template after '$'")),
        Some(c) if c == '(' || is_ident_start(c) => parser.postfix()?,
        Some(c) => {
            return Err(parser.error(format!("expected an expression after '$', found {:?}", c)));
        }
    };
    let end = parser.pos;
    Ok((
        Expression {
            source: template[start..end].to_string(),
            root,
        },
        end,
    ))
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

struct ExprParser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> ExprParser<'a> {
    fn new(src: &'a str, pos: usize) -> Self {
        Self { src, pos }
    }

    fn error(&self, message: impl Into<String>) -> DbError {
        DbError::parse(message, self.pos, self.src)
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn expect(&mut self, expected: char) -> DbResult<()> {
        self.skip_ws();
        match self.peek() {
            Some(c) if c == expected => {
                self.bump();
                Ok(())
            }
            Some(c) => Err(self.error(format!("expected '{}', found {:?}", expected, c))),
            None => Err(self.error(format!("expected '{}', found end of input", expected))),
        }
    }

    fn expr(&mut self, min_prec: u8) -> DbResult<Expr> {
        let mut left = self.unary()?;
        loop {
            self.skip_ws();
            let Some((op, width)) = self.peek_binary_op() else {
                break;
            };
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.pos += width;
            self.skip_ws();
            let right = self.expr(prec + 1)?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn peek_binary_op(&self) -> Option<(BinaryOp, usize)> {
        let rest = self.rest();
        let two = [
            ("||", BinaryOp::Or),
            ("&&", BinaryOp::And),
            ("==", BinaryOp::Eq),
            ("!=", BinaryOp::Ne),
            ("<=", BinaryOp::Le),
            (">=", BinaryOp::Ge),
        ];
        if let Some((sym, op)) = two.iter().find(|(sym, _)| rest.starts_with(sym)) {
            return Some((*op, sym.len()));
        }
        let op = match rest.chars().next()? {
            '<' => BinaryOp::Lt,
            '>' => BinaryOp::Gt,
            '+' => BinaryOp::Add,
            '-' => BinaryOp::Sub,
            '*' => BinaryOp::Mul,
            '/' => BinaryOp::Div,
            '%' => BinaryOp::Rem,
            _ => return None,
        };
        Some((op, 1))
    }

    fn unary(&mut self) -> DbResult<Expr> {
        self.skip_ws();
        let op = match self.peek() {
            Some('-') => UnaryOp::Neg,
            Some('!') if self.peek_second() != Some('=') => UnaryOp::Not,
            _ => return self.postfix(),
        };
        self.bump();
        let operand = self.unary()?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    /// Atom followed by `.field` / `[index]` suffixes. Suffixes must follow
    /// without whitespace, and a `.` that is not followed by an identifier is
    /// not consumed.
    fn postfix(&mut self) -> DbResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            match self.peek() {
                Some('.') if self.peek_second().is_some_and(is_ident_start) => {
                    self.bump();
                    let name = self.ident();
                    expr = Expr::Attr(Box::new(expr), name);
                }
                Some('[') => {
                    self.bump();
                    self.skip_ws();
                    let index = self.expr(0)?;
                    self.expect(']')?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn atom(&mut self) -> DbResult<Expr> {
        match self.peek() {
            Some('(') => {
                self.bump();
                self.skip_ws();
                let inner = self.expr(0)?;
                self.expect(')')?;
                Ok(inner)
            }
            Some(c) if c == '\'' || c == '"' => self.string(c),
            Some(c) if c.is_ascii_digit() => self.number(),
            Some(c) if is_ident_start(c) => {
                let name = self.ident();
                Ok(match name.as_str() {
                    "null" => Expr::Literal(Value::Null),
                    "true" => Expr::Literal(Value::Bool(true)),
                    "false" => Expr::Literal(Value::Bool(false)),
                    _ => Expr::Name(name),
                })
            }
            Some(c) => Err(self.error(format!("expected an expression, found {:?}", c))),
            None => Err(self.error("expected an expression, found end of input")),
        }
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_continue) {
            self.bump();
        }
        self.src[start..self.pos].to_string()
    }

    fn number(&mut self) -> DbResult<Expr> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_second().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let save = self.pos;
            self.bump();
            if matches!(self.peek(), Some('+' | '-')) {
                self.bump();
            }
            if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            } else {
                self.pos = save;
            }
        }
        let text = &self.src[start..self.pos];
        let value = if is_float {
            text.parse::<f64>().map(Value::Float).ok()
        } else {
            text.parse::<i64>().map(Value::Int).ok()
        };
        value
            .map(Expr::Literal)
            .ok_or_else(|| DbError::parse(format!("invalid number literal {}", text), start, self.src))
    }

    fn string(&mut self, quote: char) -> DbResult<Expr> {
        let start = self.pos;
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(DbError::parse("unterminated string literal", start, self.src));
                }
                Some(c) if c == quote => break,
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('0') => out.push('\0'),
                    Some(c @ ('\\' | '\'' | '"')) => out.push(c),
                    Some(c) => {
                        return Err(self.error(format!("invalid escape sequence '\\{}'", c)));
                    }
                    None => {
                        return Err(DbError::parse("unterminated string literal", start, self.src));
                    }
                },
                Some(c) => out.push(c),
            }
        }
        Ok(Expr::Literal(Value::Text(out)))
    }
}

// =============================================================================
// Evaluation
// =============================================================================

fn eval(expr: &Expr, scope: &dyn Scope, source: &str) -> DbResult<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Name(name) => scope
            .lookup(name)
            .ok_or_else(|| DbError::unbound_name(name.as_str())),
        Expr::Attr(target, name) => {
            let target = eval(target, scope, source)?;
            attr(&target, name).map_err(|m| DbError::evaluation(source, m))
        }
        Expr::Index(target, index) => {
            let target = eval(target, scope, source)?;
            let index = eval(index, scope, source)?;
            subscript(&target, &index).map_err(|m| DbError::evaluation(source, m))
        }
        Expr::Unary(op, operand) => {
            let operand = eval(operand, scope, source)?;
            unary(*op, operand).map_err(|m| DbError::evaluation(source, m))
        }
        Expr::Binary(left, BinaryOp::And, right) => {
            if truth(&eval(left, scope, source)?, source)? {
                Ok(Value::Bool(truth(&eval(right, scope, source)?, source)?))
            } else {
                Ok(Value::Bool(false))
            }
        }
        Expr::Binary(left, BinaryOp::Or, right) => {
            if truth(&eval(left, scope, source)?, source)? {
                Ok(Value::Bool(true))
            } else {
                Ok(Value::Bool(truth(&eval(right, scope, source)?, source)?))
            }
        }
        Expr::Binary(left, op, right) => {
            let left = eval(left, scope, source)?;
            let right = eval(right, scope, source)?;
            binary(*op, left, right).map_err(|m| DbError::evaluation(source, m))
        }
    }
}

fn truth(value: &Value, source: &str) -> DbResult<bool> {
    value.as_bool().ok_or_else(|| {
        DbError::evaluation(
            source,
            format!("expected bool operand, found {}", value.type_name()),
        )
    })
}

fn attr(target: &Value, name: &str) -> Result<Value, String> {
    match target {
        Value::Json(JsonValue::Object(map)) => map
            .get(name)
            .cloned()
            .map(Value::from_json)
            .ok_or_else(|| format!("object has no field '{}'", name)),
        other => Err(format!("{} value has no field '{}'", other.type_name(), name)),
    }
}

/// Resolve a possibly negative index against a length.
fn resolve_index(idx: i64, len: usize) -> Result<usize, String> {
    let resolved = if idx < 0 { len as i64 + idx } else { idx };
    if resolved < 0 || resolved as usize >= len {
        return Err(format!("index {} out of range for length {}", idx, len));
    }
    Ok(resolved as usize)
}

fn subscript(target: &Value, index: &Value) -> Result<Value, String> {
    match (target, index) {
        (Value::Json(JsonValue::Array(items)), Value::Int(i)) => {
            let idx = resolve_index(*i, items.len())?;
            Ok(Value::from_json(items[idx].clone()))
        }
        (Value::Json(JsonValue::Object(_)), Value::Text(key)) => attr(target, key),
        (Value::Text(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = resolve_index(*i, chars.len())?;
            Ok(Value::Text(chars[idx].to_string()))
        }
        (Value::Bytes(b), Value::Int(i)) => {
            let idx = resolve_index(*i, b.len())?;
            Ok(Value::Int(b[idx].into()))
        }
        (t, i) => Err(format!(
            "cannot index {} with {}",
            t.type_name(),
            i.type_name()
        )),
    }
}

fn unary(op: UnaryOp, operand: Value) -> Result<Value, String> {
    match (op, operand) {
        (UnaryOp::Neg, Value::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| "integer overflow".to_string()),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, v) => Err(format!("cannot negate {}", v.type_name())),
        (UnaryOp::Not, v) => Err(format!("cannot apply '!' to {}", v.type_name())),
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            compare(left, right) == Some(Ordering::Equal)
        }
        _ => left == right,
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, String> {
    let mismatch = |l: &Value, r: &Value| {
        format!(
            "unsupported operand types for '{}': {} and {}",
            op.symbol(),
            l.type_name(),
            r.type_name()
        )
    };
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(&left, &right))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(&left, &right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = compare(&left, &right).ok_or_else(|| mismatch(&left, &right))?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        BinaryOp::Add => match (&left, &right) {
            (Value::Text(a), Value::Text(b)) => Ok(Value::Text(format!("{}{}", a, b))),
            (Value::Int(a), Value::Int(b)) => a
                .checked_add(*b)
                .map(Value::Int)
                .ok_or_else(|| "integer overflow".to_string()),
            _ => float_op(&left, &right, |a, b| a + b).ok_or_else(|| mismatch(&left, &right)),
        },
        BinaryOp::Sub => match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_sub(*b)
                .map(Value::Int)
                .ok_or_else(|| "integer overflow".to_string()),
            _ => float_op(&left, &right, |a, b| a - b).ok_or_else(|| mismatch(&left, &right)),
        },
        BinaryOp::Mul => match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_mul(*b)
                .map(Value::Int)
                .ok_or_else(|| "integer overflow".to_string()),
            _ => float_op(&left, &right, |a, b| a * b).ok_or_else(|| mismatch(&left, &right)),
        },
        BinaryOp::Div | BinaryOp::Rem => match (&left, &right) {
            (Value::Int(_), Value::Int(0)) => Err("division by zero".to_string()),
            (Value::Int(a), Value::Int(b)) => {
                let result = if op == BinaryOp::Div {
                    a.checked_div(*b)
                } else {
                    a.checked_rem(*b)
                };
                result
                    .map(Value::Int)
                    .ok_or_else(|| "integer overflow".to_string())
            }
            _ if right.as_f64() == Some(0.0) => Err("division by zero".to_string()),
            _ => {
                let f: fn(f64, f64) -> f64 = if op == BinaryOp::Div {
                    |a, b| a / b
                } else {
                    |a, b| a % b
                };
                float_op(&left, &right, f).ok_or_else(|| mismatch(&left, &right))
            }
        },
        // short-circuit operators never reach here, see `eval`
        BinaryOp::And | BinaryOp::Or => Err(mismatch(&left, &right)),
    }
}

fn float_op(left: &Value, right: &Value, f: impl Fn(f64, f64) -> f64) -> Option<Value> {
    match (left, right) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            Some(Value::Float(f(left.as_f64()?, right.as_f64()?)))
        }
        _ => None,
    }
}
