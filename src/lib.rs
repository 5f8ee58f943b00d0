//! db-session
//!
//! A database-access layer built around SQL templates with embedded
//! `$expression` placeholders and thread-scoped units of work that span any
//! number of open database handles.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod sql;

pub use config::Config;
pub use db::{Database, auto_commit, auto_rollback, db_session, release_all, with_transaction};
pub use error::{DbError, DbResult};
pub use models::{Scope, Value, Vars};
