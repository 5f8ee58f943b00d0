//! Error types for db-session.
//!
//! Providers report failures as [`ProviderError`], tagged with the standard
//! driver taxonomy ([`ErrorKind`]). At the boundary of every database call the
//! provider error is remapped into [`DbError`], so calling code never depends
//! on a specific backend's error types. The original provider error is kept as
//! the `source` of the remapped variant.
//!
//! Taxonomy:
//!
//! ```text
//! Warning
//! Error
//!  |__ InterfaceError
//!  |__ DatabaseError
//!       |__ DataError
//!       |__ OperationalError
//!       |__ IntegrityError
//!       |__ InternalError
//!       |__ ProgrammingError
//!       |__ NotSupportedError
//! ```

use std::fmt;
use thiserror::Error;

/// Standard driver error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Warning,
    Error,
    Interface,
    Database,
    Data,
    Operational,
    Integrity,
    Internal,
    Programming,
    NotSupported,
}

impl ErrorKind {
    /// Name of the kind as drivers conventionally spell it.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Interface => "InterfaceError",
            Self::Database => "DatabaseError",
            Self::Data => "DataError",
            Self::Operational => "OperationalError",
            Self::Integrity => "IntegrityError",
            Self::Internal => "InternalError",
            Self::Programming => "ProgrammingError",
            Self::NotSupported => "NotSupportedError",
        }
    }

    /// True for `DatabaseError` and all of its subtypes.
    pub fn is_database_error(&self) -> bool {
        matches!(
            self,
            Self::Database
                | Self::Data
                | Self::Operational
                | Self::Integrity
                | Self::Internal
                | Self::Programming
                | Self::NotSupported
        )
    }

    /// True for `Error` and everything below it (everything except `Warning`).
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::Warning)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A failure reported by a provider, before remapping.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the driver's own error as the cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Classify an sqlx failure into the driver taxonomy.
impl From<sqlx::Error> for ProviderError {
    fn from(err: sqlx::Error) -> Self {
        let (kind, message) = match &err {
            sqlx::Error::Configuration(msg) => {
                (ErrorKind::Interface, format!("Invalid configuration: {}", msg))
            }
            sqlx::Error::Database(db_err) => {
                (classify_database_error(db_err.as_ref()), db_err.message().to_string())
            }
            sqlx::Error::PoolTimedOut => (
                ErrorKind::Operational,
                "Timed out acquiring a pooled connection".to_string(),
            ),
            sqlx::Error::PoolClosed => {
                (ErrorKind::Operational, "Connection pool is closed".to_string())
            }
            sqlx::Error::Io(io_err) => (ErrorKind::Operational, format!("I/O error: {}", io_err)),
            sqlx::Error::Tls(tls_err) => {
                (ErrorKind::Operational, format!("TLS error: {}", tls_err))
            }
            sqlx::Error::Protocol(msg) => {
                (ErrorKind::Operational, format!("Protocol error: {}", msg))
            }
            sqlx::Error::TypeNotFound { type_name } => {
                (ErrorKind::Programming, format!("Type not found: {}", type_name))
            }
            sqlx::Error::ColumnNotFound(col) => {
                (ErrorKind::Programming, format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => (
                ErrorKind::Programming,
                format!("Column index {} out of bounds (len: {})", index, len),
            ),
            sqlx::Error::ColumnDecode { index, source } => (
                ErrorKind::Data,
                format!("Failed to decode column {}: {}", index, source),
            ),
            sqlx::Error::Decode(source) => (ErrorKind::Data, format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => {
                (ErrorKind::Internal, "Database worker crashed".to_string())
            }
            other => (ErrorKind::Database, format!("Unknown database error: {}", other)),
        };
        ProviderError::new(kind, message).with_source(err)
    }
}

fn classify_database_error(err: &dyn sqlx::error::DatabaseError) -> ErrorKind {
    use sqlx::error::ErrorKind as SqlxKind;

    match err.kind() {
        SqlxKind::UniqueViolation
        | SqlxKind::ForeignKeyViolation
        | SqlxKind::NotNullViolation
        | SqlxKind::CheckViolation => return ErrorKind::Integrity,
        _ => {}
    }

    let message = err.message().to_lowercase();
    if message.contains("constraint") {
        ErrorKind::Integrity
    } else if message.contains("syntax error")
        || message.contains("no such")
        || message.contains("already exists")
        || message.contains("incomplete input")
    {
        ErrorKind::Programming
    } else if message.contains("locked") || message.contains("busy") || message.contains("readonly")
    {
        ErrorKind::Operational
    } else {
        ErrorKind::Database
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("{0}")]
    Warning(#[source] ProviderError),

    #[error("{0}")]
    Error(#[source] ProviderError),

    #[error("{0}")]
    Interface(#[source] ProviderError),

    #[error("{0}")]
    Database(#[source] ProviderError),

    #[error("{0}")]
    Data(#[source] ProviderError),

    #[error("{0}")]
    Operational(#[source] ProviderError),

    #[error("{0}")]
    Integrity(#[source] ProviderError),

    #[error("{0}")]
    Internal(#[source] ProviderError),

    #[error("{0}")]
    Programming(#[source] ProviderError),

    #[error("{0}")]
    NotSupported(#[source] ProviderError),

    #[error("Row not found")]
    RowNotFound,

    #[error("Multiple rows found: {count}")]
    MultipleRowsFound { count: usize },

    #[error("Too many rows found: more than {limit}")]
    TooManyRowsFound { limit: usize },

    #[error("Commit failed{}: {}", partial_note(.partial), summarize(.errors))]
    Commit { errors: Vec<DbError>, partial: bool },

    #[error("Rollback failed: {}", summarize(.errors))]
    Rollback { errors: Vec<DbError> },

    #[error("No default database has been set")]
    NoDefaultDb,

    #[error("Parse error at offset {position}: {message} (template: {template:?})")]
    Parse {
        message: String,
        position: usize,
        template: String,
    },

    #[error("Not implemented: {feature}")]
    NotImplemented { feature: String },

    #[error("Name '{name}' is not defined in the scope")]
    UnboundName { name: String },

    #[error("Cannot evaluate '{expression}': {message}")]
    Evaluation { expression: String, message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

fn partial_note(partial: &bool) -> &'static str {
    if *partial {
        " (partially committed)"
    } else {
        ""
    }
}

fn summarize(errors: &[DbError]) -> String {
    match errors {
        [] => "no underlying errors recorded".to_string(),
        [single] => single.to_string(),
        many => format!(
            "Multiple exceptions have occurred: {}",
            many.iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ")
        ),
    }
}

impl DbError {
    /// Create a parse error for a template.
    pub fn parse(message: impl Into<String>, position: usize, template: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            position,
            template: template.into(),
        }
    }

    pub fn not_implemented(feature: impl Into<String>) -> Self {
        Self::NotImplemented {
            feature: feature.into(),
        }
    }

    pub fn unbound_name(name: impl Into<String>) -> Self {
        Self::UnboundName { name: name.into() }
    }

    pub fn evaluation(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Evaluation {
            expression: expression.into(),
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error that did not originate in a provider.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(ProviderError::new(ErrorKind::Internal, message))
    }

    /// Taxonomy kind of a remapped provider error, `None` for domain errors.
    pub fn kind(&self) -> Option<ErrorKind> {
        self.provider_error().map(|e| e.kind)
    }

    /// The wrapped provider error, if this is a remapped one.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Warning(e)
            | Self::Error(e)
            | Self::Interface(e)
            | Self::Database(e)
            | Self::Data(e)
            | Self::Operational(e)
            | Self::Integrity(e)
            | Self::Internal(e)
            | Self::Programming(e)
            | Self::NotSupported(e) => Some(e),
            _ => None,
        }
    }

    /// True for `DatabaseError` and its subtypes.
    pub fn is_database_error(&self) -> bool {
        self.kind().is_some_and(|k| k.is_database_error())
    }

    /// Errors aggregated by a commit or rollback, empty for everything else.
    pub fn aggregated(&self) -> &[DbError] {
        match self {
            Self::Commit { errors, .. } | Self::Rollback { errors } => errors,
            _ => &[],
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Operational(_) | Self::Interface(_))
    }
}

/// Remap a provider failure into the provider-independent taxonomy.
impl From<ProviderError> for DbError {
    fn from(err: ProviderError) -> Self {
        match err.kind {
            ErrorKind::Warning => DbError::Warning(err),
            ErrorKind::Error => DbError::Error(err),
            ErrorKind::Interface => DbError::Interface(err),
            ErrorKind::Database => DbError::Database(err),
            ErrorKind::Data => DbError::Data(err),
            ErrorKind::Operational => DbError::Operational(err),
            ErrorKind::Integrity => DbError::Integrity(err),
            ErrorKind::Internal => DbError::Internal(err),
            ErrorKind::Programming => DbError::Programming(err),
            ErrorKind::NotSupported => DbError::NotSupported(err),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
