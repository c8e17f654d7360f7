//! Error types for lean-postgres.

use thiserror::Error;

/// Result type for lean-postgres operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Structured error reported by the server (`ErrorResponse` / `NoticeResponse`).
///
/// Every optional field is `None` when the backend did not send it, so
/// "no detail given" and "empty detail" stay distinguishable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseError {
    /// Primary human-readable message (field `M`)
    pub message: String,
    /// SQLSTATE code, 5 characters (field `C`)
    pub code: Option<String>,
    /// Secondary message with more detail (field `D`)
    pub detail: Option<String>,
    /// Suggestion for fixing the problem (field `H`)
    pub hint: Option<String>,
    /// Severity, non-localized when the server provides it (fields `V` / `S`)
    pub severity: Option<String>,
    /// Cursor position in the query string, 1-based (field `P`)
    pub position: Option<u32>,
    /// Context / call stack (field `W`)
    pub where_: Option<String>,
    /// Schema name (field `s`)
    pub schema: Option<String>,
    /// Table name (field `t`)
    pub table: Option<String>,
    /// Column name (field `c`)
    pub column: Option<String>,
    /// Constraint name (field `n`)
    pub constraint: Option<String>,
}

impl DatabaseError {
    /// Create an error carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Returns true for `FATAL` and `PANIC` severities, after which the
    /// server closes the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self.severity.as_deref(), Some("FATAL") | Some("PANIC"))
    }
}

impl std::fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = &self.severity {
            write!(f, "{}: ", severity)?;
        }
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for DatabaseError {}

/// Error type for lean-postgres.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure while establishing the connection
    #[error("Connection failed: {0}")]
    Connect(#[source] std::io::Error),

    /// Authentication failed on the client side (missing password,
    /// unsupported mechanism, bad server signature)
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Server error response
    #[error("PostgreSQL error: {0}")]
    Server(DatabaseError),

    /// Protocol error (malformed message, unexpected response, etc.)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS error
    #[cfg(any(feature = "sync-tls", feature = "tokio-tls"))]
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    /// A client-side deadline expired
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Connection is broken and cannot be reused
    #[error("Connection is broken")]
    ConnectionBroken,

    /// Invalid usage (bad configuration, malformed URL, ...)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// Value could not be converted to the requested Rust type
    #[error("Decode error: {0}")]
    Decode(String),
}

impl Error {
    /// Returns true if the error indicates the connection is broken and cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Connect(_)
            | Error::Io(_)
            | Error::Protocol(_)
            | Error::Timeout(_)
            | Error::ConnectionBroken => true,
            Error::Server(err) => err.is_fatal(),
            _ => false,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(err) => err.code.as_deref(),
            _ => None,
        }
    }

    /// Flatten this error into the `DatabaseError` shape.
    ///
    /// Server errors are returned as-is; client-side errors carry their
    /// display text as the message and no SQLSTATE.
    pub fn database_error(&self) -> DatabaseError {
        match self {
            Error::Server(err) => err.clone(),
            other => DatabaseError::new(other.to_string()),
        }
    }
}

impl From<DatabaseError> for Error {
    fn from(err: DatabaseError) -> Self {
        Error::Server(err)
    }
}

impl From<core::convert::Infallible> for Error {
    fn from(err: core::convert::Infallible) -> Self {
        match err {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_server_error_breaks_connection() {
        let err = Error::Server(DatabaseError {
            message: "terminating connection".into(),
            severity: Some("FATAL".into()),
            ..DatabaseError::default()
        });
        assert!(err.is_connection_broken());

        let err = Error::Server(DatabaseError {
            message: "duplicate key".into(),
            code: Some("23505".into()),
            severity: Some("ERROR".into()),
            ..DatabaseError::default()
        });
        assert!(!err.is_connection_broken());
        assert_eq!(err.sqlstate(), Some("23505"));
    }

    #[test]
    fn client_errors_flatten_without_sqlstate() {
        let err = Error::Auth("Password required but not provided".into());
        let flat = err.database_error();
        assert_eq!(
            flat.message,
            "Authentication failed: Password required but not provided"
        );
        assert_eq!(flat.code, None);
        assert_eq!(flat.detail, None);
        assert_eq!(flat.hint, None);
    }

    #[test]
    fn display_includes_code_detail_hint() {
        let err = DatabaseError {
            message: "relation \"nope\" does not exist".into(),
            code: Some("42P01".into()),
            hint: Some("Check the table name".into()),
            severity: Some("ERROR".into()),
            ..DatabaseError::default()
        };
        assert_eq!(
            err.to_string(),
            "ERROR: relation \"nope\" does not exist (SQLSTATE 42P01)\nHINT: Check the table name"
        );
    }
}
