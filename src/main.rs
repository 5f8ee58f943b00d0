//! db-session - Main entry point.
//!
//! Runs SQL templates against a SQLite database as one unit of work and
//! prints each statement's outcome as JSON.

use db_session::config::Config;
use db_session::db::{Database, SqliteProvider, auto_rollback, db_session, is_select};
use db_session::error::DbError;
use db_session::models::{Scope, Vars};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // stdout carries the results
    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

fn run_statement(
    db: &Database,
    template: &str,
    scope: &dyn Scope,
) -> Result<serde_json::Value, DbError> {
    if is_select(template) {
        let rows = db.select(template, scope)?;
        Ok(json!({ "template": template, "rows": rows }))
    } else {
        let cursor = db.execute(template, scope)?;
        Ok(json!({
            "template": template,
            "rows_affected": cursor.rows_affected(),
            "last_row_id": cursor.last_row_id(),
        }))
    }
}

fn run_all(db: &Database, statements: &[String], scope: &Vars) -> Result<Vec<serde_json::Value>, DbError> {
    statements
        .iter()
        .map(|template| run_statement(db, template, scope))
        .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    init_tracing(&config);

    let db_config = config.parse_database()?;
    info!(
        database = %db_config.database,
        writable = db_config.writable,
        "Starting db-session v{}",
        env!("CARGO_PKG_VERSION")
    );

    let provider = Arc::new(SqliteProvider::open(&db_config).map_err(DbError::from)?);
    let db = Database::new(provider)?.with_max_rows(config.max_rows);
    let scope = config.scope();

    let result = if config.rollback {
        let outcome = run_all(&db, &config.statements, &scope);
        auto_rollback()?;
        outcome
    } else {
        db_session(None, || run_all(&db, &config.statements, &scope))
    };

    match result {
        Ok(outputs) => {
            println!("{}", serde_json::to_string_pretty(&outputs)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Unit of work failed");
            Err(e.into())
        }
    }
}
