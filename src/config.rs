//! Configuration handling for db-session.
//!
//! Command line flags and environment variables are read through clap. The
//! database URL carries pool sizing and the `writable` flag in its query
//! string; those keys are consumed here and everything else is handed to the
//! SQLite driver untouched.

use crate::models::{DEFAULT_MAX_ROWS, Value, Vars};
use clap::Parser;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Pool sizing and timeouts for one SQLite database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    pub max_connections: u32,
    pub min_connections: u32,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

impl PoolOptions {
    /// URL query keys understood by [`set`](Self::set). Timeouts are seconds.
    pub const KEYS: &'static [&'static str] = &[
        "max_connections",
        "min_connections",
        "idle_timeout",
        "acquire_timeout",
    ];

    /// Apply one `key=value` pair from a database URL.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "max_connections" => self.max_connections = parse_number(key, value)?,
            "min_connections" => self.min_connections = parse_number(key, value)?,
            "idle_timeout" => self.idle_timeout = Duration::from_secs(parse_number(key, value)?),
            "acquire_timeout" => {
                self.acquire_timeout = Duration::from_secs(parse_number(key, value)?)
            }
            other => return Err(format!("Unknown pool option '{}'", other)),
        }
        Ok(())
    }

    pub fn check(&self) -> Result<(), String> {
        match (self.min_connections, self.max_connections) {
            (_, 0) => Err("max_connections must be at least 1".to_string()),
            (0, _) => Err("min_connections must be at least 1".to_string()),
            (min, max) if min > max => Err(format!(
                "min_connections ({}) is larger than max_connections ({})",
                min, max
            )),
            _ if self.acquire_timeout.is_zero() => {
                Err("acquire_timeout must be at least 1 second".to_string())
            }
            _ => Ok(()),
        }
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("Option '{}' expects a non-negative integer, got '{}'", key, value))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(format!("Option '{}' expects true or false, got '{}'", key, value)),
    }
}

/// A SQLite database URL split into driver URL and our own options.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// URL handed to the driver (may carry credentials, never logged).
    pub connection_string: String,
    /// Open read-write, creating the file if needed. `?writable=false` opens
    /// the database read-only.
    pub writable: bool,
    /// Short name for logs: the file name without its extension.
    pub database: String,
    pub pool_options: PoolOptions,
}

impl DatabaseConfig {
    /// Parse a database URL.
    ///
    /// ```text
    /// sqlite:data.db
    /// sqlite:///var/lib/app/data.db?max_connections=1
    /// sqlite::memory:?writable=false
    /// ```
    pub fn parse(s: &str) -> Result<Self, String> {
        let mut url = Url::parse(s).map_err(|e| format!("Invalid URL: {e}"))?;
        if !url.scheme().eq_ignore_ascii_case("sqlite") {
            return Err(format!(
                "Unsupported database scheme '{}': only sqlite URLs are supported",
                url.scheme()
            ));
        }

        let (ours, driver): (Vec<(String, String)>, Vec<(String, String)>) = url
            .query_pairs()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.into_owned()))
            .partition(|(k, _)| k == "writable" || PoolOptions::KEYS.contains(&k.as_str()));
        if driver.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(&driver);
        }

        let mut writable = true;
        let mut pool_options = PoolOptions::default();
        for (key, value) in &ours {
            if key == "writable" {
                writable = parse_flag(key, value)?;
            } else {
                pool_options.set(key, value)?;
            }
        }
        pool_options.check()?;

        let database = Path::new(url.path())
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .map(String::from)
            .ok_or_else(|| "SQLite requires a database file path or :memory:".to_string())?;

        Ok(Self {
            connection_string: url.to_string(),
            writable,
            database,
            pool_options,
        })
    }

    /// True for `sqlite::memory:` and `mode=memory` URLs.
    pub fn is_memory(&self) -> bool {
        self.connection_string.contains(":memory:") || self.connection_string.contains("mode=memory")
    }
}

/// Parse a `NAME=VALUE` scope variable.
///
/// The value is read as JSON when it parses as JSON and as text otherwise,
/// so `id=7` binds an integer and `name=bob` binds a string.
pub fn parse_var(s: &str) -> Result<(String, Value), String> {
    let (name, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid variable '{}': expected NAME=VALUE", s))?;
    let name = name.trim();
    if !crate::models::is_ident(name) {
        return Err(format!("Invalid variable name '{}'", name));
    }
    let value = serde_json::from_str::<serde_json::Value>(raw)
        .map(Value::from_json)
        .unwrap_or_else(|_| Value::Text(raw.to_string()));
    Ok((name.to_string(), value))
}

/// Configuration for the db-session command line.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-session",
    about = "Run SQL templates with $expression placeholders inside one unit of work",
    version
)]
pub struct Config {
    /// Database URL, e.g. "sqlite:data.db?max_connections=2"
    #[arg(short = 'd', long = "database", value_name = "URL", env = "DB_SESSION_DATABASE")]
    pub database: String,

    /// SQL templates to run in order. SELECT statements print their rows.
    #[arg(value_name = "TEMPLATE", required = true)]
    pub statements: Vec<String>,

    /// Scope variables available to placeholders, as NAME=VALUE.
    #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, Value)>,

    /// Maximum rows a select may return
    #[arg(long, default_value_t = DEFAULT_MAX_ROWS, env = "DB_SESSION_MAX_ROWS")]
    pub max_rows: usize,

    /// Roll back at the end instead of committing
    #[arg(long)]
    pub rollback: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "DB_SESSION_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DB_SESSION_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn parse_database(&self) -> Result<DatabaseConfig, String> {
        DatabaseConfig::parse(&self.database)
    }

    /// The `--var` pairs as a scope. A repeated name keeps the last value.
    pub fn scope(&self) -> Vars {
        self.vars.iter().cloned().collect()
    }
}
