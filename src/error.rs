//! Error types for the table gateway.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Clause validation failures have their own [`ValidationError`] so callers can match
//! on them without touching the rest of the taxonomy.

use thiserror::Error;

/// Malformed optional clause combination in a SELECT request.
///
/// Raised before any database contact and never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("HAVING clauses are only permitted when using a GROUP BY clause (having: {having})")]
    InvalidClauseCombination { having: String },

    #[error("Invalid LIMIT clause: {limit}")]
    InvalidLimitSyntax { limit: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error(
        "Dangerous operation blocked: {operation}. {reason}. Pass an explicit WHERE map or disable the full-table guard."
    )]
    DangerousOperationBlocked { operation: String, reason: String },

    #[error("Execution failed: {message}")]
    Execution {
        message: String,
        /// e.g., "23505" for unique violation
        sql_state: Option<String>,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Connection pool exhausted: no connection available after {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    #[error("Connection pool is broken: {message}")]
    PoolBroken { message: String },

    #[error("Connection pool is shut down")]
    PoolClosed,

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a dangerous operation blocked error.
    pub fn dangerous_operation_blocked(
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::DangerousOperationBlocked {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a driver failure raised while a statement was running.
    pub fn execution(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => Self::Execution {
                message: db_err.message().to_string(),
                sql_state: db_err.code().map(|c| c.to_string()),
            },
            other => Self::Execution {
                message: other.to_string(),
                sql_state: None,
            },
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn pool_exhausted(waited_ms: u64) -> Self {
        Self::PoolExhausted { waited_ms }
    }

    pub fn pool_broken(message: impl Into<String>) -> Self {
        Self::PoolBroken {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::PoolExhausted { .. } => {
                Some("Increase max_size or checkout_timeout_ms, or release connections sooner")
            }
            _ => None,
        }
    }

    /// Check if this error is retryable.
    ///
    /// A broken or closed pool never recovers, so neither is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::PoolExhausted { .. })
    }

    /// Check if this error was raised before the database was contacted.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::InvalidInput { .. } | Self::DangerousOperationBlocked { .. }
        )
    }
}

/// Convert sqlx errors to DbError.
///
/// Used on the connect path; statement failures go through [`DbError::execution`].
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::configuration(msg.to_string()),
            sqlx::Error::Database(_) => DbError::execution(err),
            sqlx::Error::PoolTimedOut => DbError::pool_exhausted(0),
            sqlx::Error::PoolClosed => DbError::PoolClosed,
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::AnyDriverError(err) => DbError::connection(
                format!("Driver error: {}", err),
                "Check database driver configuration",
            ),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_validation_error_converts() {
        let err: DbError = ValidationError::InvalidLimitSyntax {
            limit: "abc".to_string(),
        }
        .into();
        assert!(matches!(
            err,
            DbError::Validation(ValidationError::InvalidLimitSyntax { .. })
        ));
        assert!(err.to_string().contains("abc"));
        assert!(err.is_validation());
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::pool_exhausted(100).is_retryable());
        assert!(DbError::connection("err", "sugg").is_retryable());
        assert!(!DbError::pool_broken("gave up").is_retryable());
        assert!(!DbError::PoolClosed.is_retryable());
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::connection("refused", "Check that the server is running");
        assert_eq!(err.suggestion(), Some("Check that the server is running"));
        assert!(DbError::PoolClosed.suggestion().is_none());
    }

    #[test]
    fn test_sqlx_pool_closed_maps_to_pool_closed() {
        let err: DbError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, DbError::PoolClosed));
    }

    #[test]
    fn test_execution_wraps_non_database_error() {
        let err = DbError::execution(sqlx::Error::RowNotFound);
        match err {
            DbError::Execution { sql_state, .. } => assert!(sql_state.is_none()),
            other => panic!("expected execution error, got {:?}", other),
        }
    }
}
