//! SQLite provider on an sqlx pool.
//!
//! The public API is blocking, so the provider owns a tokio runtime and
//! drives every sqlx future to completion on the calling thread. Each
//! [`Connection`] handed out holds one pooled connection for the lifetime of
//! its transaction; the transaction is opened when the connection is taken
//! and reopened on the first statement after a commit or rollback.

use crate::config::DatabaseConfig;
use crate::db::params::bind_arguments;
use crate::db::provider::{Connection, Cursor, Provider};
use crate::db::types::decode_row;
use crate::error::{ErrorKind, ProviderError, ProviderResult};
use crate::sql::{Arguments, ParamStyle};
use futures_util::{StreamExt, TryStreamExt};
use regex::Regex;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Sqlite, SqlitePool, Statement, Transaction};
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use tokio::runtime::Runtime;
use tracing::{debug, info};

static INSERT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(insert|replace)\b").expect("insert pattern is valid"));

/// Provider for one SQLite database.
#[derive(Debug)]
pub struct SqliteProvider {
    pool: SqlitePool,
    runtime: Arc<Runtime>,
    name: String,
}

impl SqliteProvider {
    /// Open the pool described by `config`.
    pub fn open(config: &DatabaseConfig) -> ProviderResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("db-session-sqlite")
            .enable_all()
            .build()
            .map_err(|e| {
                ProviderError::new(ErrorKind::Internal, "Failed to start async runtime")
                    .with_source(e)
            })?;

        let mut options = SqliteConnectOptions::from_str(&config.connection_string)
            .map_err(|e| {
                ProviderError::new(
                    ErrorKind::Interface,
                    format!("Invalid SQLite connection string: {}", e),
                )
            })?;
        if config.writable {
            options = options.create_if_missing(true).read_only(false);
        } else {
            options = options.read_only(true);
        }

        let pool_options = &config.pool_options;
        // Every pooled connection to an in-memory database is its own database.
        let max_connections = if config.is_memory() {
            1
        } else {
            pool_options.max_connections
        };
        let pool = runtime.block_on(
            SqlitePoolOptions::new()
                .min_connections(pool_options.min_connections.min(max_connections))
                .max_connections(max_connections)
                .acquire_timeout(pool_options.acquire_timeout)
                .idle_timeout(Some(pool_options.idle_timeout))
                .connect_with(options),
        )?;

        let name = config.database.clone();
        info!(database = %name, max_connections, "Opened SQLite pool");

        Ok(Self {
            pool,
            runtime: Arc::new(runtime),
            name,
        })
    }

    /// Open a URL such as `sqlite:data.db`.
    pub fn open_url(url: &str) -> ProviderResult<Self> {
        let config = DatabaseConfig::parse(url)
            .map_err(|message| ProviderError::new(ErrorKind::Interface, message))?;
        Self::open(&config)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl Drop for SqliteProvider {
    fn drop(&mut self) {
        let pool = self.pool.clone();
        self.runtime.block_on(pool.close());
    }
}

impl Provider for SqliteProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn param_style(&self) -> ParamStyle {
        ParamStyle::Qmark
    }

    fn connect(&self) -> ProviderResult<Box<dyn Connection>> {
        let transaction = self.runtime.block_on(self.pool.begin())?;
        debug!(database = %self.name, "Acquired SQLite connection");
        Ok(Box::new(SqliteConnection {
            pool: self.pool.clone(),
            runtime: Arc::clone(&self.runtime),
            transaction: Some(transaction),
        }))
    }

    fn release(&self, connection: Box<dyn Connection>) -> ProviderResult<()> {
        // Dropping an open transaction rolls it back before the pooled
        // connection is reused.
        drop(connection);
        debug!(database = %self.name, "Released SQLite connection");
        Ok(())
    }
}

/// One pooled connection with its open transaction.
pub struct SqliteConnection {
    pool: SqlitePool,
    runtime: Arc<Runtime>,
    transaction: Option<Transaction<'static, Sqlite>>,
}

impl SqliteConnection {
    fn transaction(&mut self) -> ProviderResult<&mut Transaction<'static, Sqlite>> {
        if self.transaction.is_none() {
            let transaction = self.runtime.block_on(self.pool.begin())?;
            self.transaction = Some(transaction);
        }
        self.transaction.as_mut().ok_or_else(|| {
            ProviderError::new(ErrorKind::Internal, "Transaction is no longer active")
        })
    }
}

// Returning a pooled connection needs a runtime context, which a thread
// tearing down its thread-locals no longer has; drop it on a worker instead.
impl Drop for SqliteConnection {
    fn drop(&mut self) {
        if let Some(transaction) = self.transaction.take() {
            self.runtime.spawn(async move { drop(transaction) });
        }
    }
}

impl SqliteConnection {
    /// Run one statement, reading at most `limit` rows from the driver.
    fn run(
        &mut self,
        sql: &str,
        args: &Arguments,
        limit: Option<usize>,
    ) -> ProviderResult<Cursor> {
        let runtime = Arc::clone(&self.runtime);
        let tx = self.transaction()?;

        runtime.block_on(async {
            let statement = (&mut **tx).prepare(sql).await?;
            let columns: Vec<String> = statement
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect();

            let query = bind_arguments(sql, args)?;
            if columns.is_empty() {
                let result = query.execute(&mut **tx).await?;
                // last_insert_rowid() is per connection and goes stale after
                // UPDATE or DELETE.
                let last_row_id = (result.rows_affected() > 0 && INSERT_RE.is_match(sql))
                    .then(|| result.last_insert_rowid());
                Ok::<_, ProviderError>(Cursor::with_outcome(result.rows_affected(), last_row_id))
            } else {
                let rows: Vec<SqliteRow> = query
                    .fetch(&mut **tx)
                    .take(limit.unwrap_or(usize::MAX))
                    .try_collect()
                    .await?;
                let values = rows
                    .iter()
                    .map(decode_row)
                    .collect::<ProviderResult<Vec<_>>>()?;
                Ok::<_, ProviderError>(Cursor::with_rows(columns, values))
            }
        })
    }
}

impl Connection for SqliteConnection {
    fn execute(&mut self, sql: &str, args: &Arguments) -> ProviderResult<Cursor> {
        self.run(sql, args, None)
    }

    fn query(&mut self, sql: &str, args: &Arguments, limit: usize) -> ProviderResult<Cursor> {
        self.run(sql, args, Some(limit))
    }

    fn commit(&mut self) -> ProviderResult<()> {
        if let Some(tx) = self.transaction.take() {
            self.runtime.block_on(tx.commit())?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> ProviderResult<()> {
        if let Some(tx) = self.transaction.take() {
            self.runtime.block_on(tx.rollback())?;
        }
        Ok(())
    }
}
