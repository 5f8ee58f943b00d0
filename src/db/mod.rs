//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Provider and connection interfaces
//! - The SQLite provider and its type mappings
//! - The per-thread execution context registry
//! - Database handles
//! - Unit-of-work coordination
//! - The `vars!` scope macro

pub mod context;
pub mod database;
#[macro_use]
pub mod macros;
pub mod params;
pub mod provider;
pub mod sqlite;
pub mod transaction;
pub mod types;

pub use context::{HandleMetadata, SharedConnection, open_count, open_handles, release_all};
pub use database::{
    Database, Settings, clear_default_database, default_database, is_select, select_prefixed,
    set_default_database,
};
pub use provider::{Connection, Cursor, Provider};
pub use sqlite::{SqliteConnection, SqliteProvider};
pub use transaction::{
    UnitOfWorkError, WebLayer, auto_commit, auto_rollback, db_session, with_transaction,
};
