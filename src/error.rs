//! Error types for filmworks-etl.

use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for filmworks-etl operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
        /// Source error if any
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// SQLite open/connectivity error
    #[error("SQLite connection error: {message}")]
    SqliteConnection {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<rusqlite::Error>,
    },

    /// SQLite query error
    #[error("SQLite query error on table '{table}': {message}")]
    SqliteQuery {
        /// Table name
        table: String,
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<rusqlite::Error>,
    },

    /// A source row did not match the expected projection for its table
    #[error("Malformed row in table '{table}': {detail}")]
    MalformedRow {
        /// Table name
        table: String,
        /// What failed to convert
        detail: String,
    },

    /// PostgreSQL connection error
    #[error("PostgreSQL connection error: {message}")]
    PostgresConnection {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<tokio_postgres::Error>,
    },

    /// PostgreSQL query error
    #[error("PostgreSQL query error on table '{table}': {message}")]
    PostgresQuery {
        /// Table name
        table: String,
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<tokio_postgres::Error>,
    },

    /// A destination constraint rejected the batch. The idempotent insert
    /// policy swallows identity/uniqueness conflicts, so this signals a
    /// genuine data problem such as a join row pointing at a missing parent.
    #[error("Constraint violation on table '{table}': {message}")]
    ConstraintViolation {
        /// Table name
        table: String,
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<tokio_postgres::Error>,
    },

    /// A destination statement exceeded its deadline
    #[error("Operation '{operation}' timed out after {seconds}s")]
    Timeout {
        /// What was running
        operation: String,
        /// Configured deadline
        seconds: u64,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Retry exhausted
    #[error("Operation failed after {attempts} attempts: {message}")]
    RetryExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Error message
        message: String,
        /// Last error encountered
        #[source]
        last_error: Option<Box<Error>>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with source.
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a SQLite connection error.
    pub fn sqlite_connection(message: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::SqliteConnection {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a SQLite query error.
    pub fn sqlite_query(
        table: impl Into<String>,
        message: impl Into<String>,
        source: rusqlite::Error,
    ) -> Self {
        Self::SqliteQuery {
            table: table.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a malformed-row error.
    pub fn malformed_row(table: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::MalformedRow {
            table: table.into(),
            detail: detail.into(),
        }
    }

    /// Create a PostgreSQL connection error.
    pub fn postgres_connection(message: impl Into<String>) -> Self {
        Self::PostgresConnection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a PostgreSQL connection error with tokio_postgres::Error.
    pub fn postgres_connection_pg(
        message: impl Into<String>,
        source: tokio_postgres::Error,
    ) -> Self {
        Self::PostgresConnection {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a PostgreSQL query error.
    pub fn postgres_query(
        table: impl Into<String>,
        message: impl Into<String>,
        source: tokio_postgres::Error,
    ) -> Self {
        Self::PostgresQuery {
            table: table.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a constraint-violation error.
    pub fn constraint_violation(
        table: impl Into<String>,
        message: impl Into<String>,
        source: tokio_postgres::Error,
    ) -> Self {
        Self::ConstraintViolation {
            table: table.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::PostgresConnection { .. } | Error::Timeout { .. } | Error::Io(_)
        )
    }

    /// Get the error code for metrics/logging.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "CONFIG_ERROR",
            Error::SqliteConnection { .. } => "SQLITE_CONNECTION_ERROR",
            Error::SqliteQuery { .. } => "SQLITE_QUERY_ERROR",
            Error::MalformedRow { .. } => "MALFORMED_ROW",
            Error::PostgresConnection { .. } => "PG_CONNECTION_ERROR",
            Error::PostgresQuery { .. } => "PG_QUERY_ERROR",
            Error::ConstraintViolation { .. } => "CONSTRAINT_VIOLATION",
            Error::Timeout { .. } => "TIMEOUT",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            Error::Io(_) => "IO_ERROR",
        }
    }
}

/// Error context extension trait.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation).
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ErrorContext<T>
    for std::result::Result<T, E>
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::config_with_source(message, e))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Error::config_with_source(f(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::config("test").code(), "CONFIG_ERROR");
        assert_eq!(Error::validation("test").code(), "VALIDATION_ERROR");
        assert_eq!(
            Error::malformed_row("genre", "bad uuid").code(),
            "MALFORMED_ROW"
        );
        assert_eq!(Error::timeout("upsert", 30).code(), "TIMEOUT");
    }

    #[test]
    fn test_retryable() {
        assert!(!Error::config("test").is_retryable());
        assert!(!Error::validation("test").is_retryable());
        assert!(!Error::malformed_row("person", "arity").is_retryable());
        assert!(Error::postgres_connection("refused").is_retryable());
        assert!(Error::timeout("upsert", 30).is_retryable());
    }
}
