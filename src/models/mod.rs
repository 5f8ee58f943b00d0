//! Data models for db-session.
//!
//! This module re-exports the value, scope and row types used throughout the crate.

pub mod row;
pub mod scope;
pub mod value;

pub use row::{Columns, Record, Row, Selection, is_ident};
pub use scope::{Layered, Scope, Vars};
pub use value::{DEFAULT_MAX_ROWS, Value};
