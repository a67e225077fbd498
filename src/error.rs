//! Error types for graphwire
//!
//! One taxonomy for the whole crate. Connection-level, pool-level, and
//! session-level failures are crate variants; failures reported by the server
//! arrive as FAILURE frames and keep their machine-readable code in
//! [`ServerError`].

use std::time::Duration;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// A failure reported by the server.
///
/// The `code` follows the `<Namespace>.<Category>.<Specific>` convention,
/// e.g. `Graph.ClientError.Statement.ArithmeticError`. Classification reads
/// the category segment, so any namespace works.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Machine-readable status code
    pub code: String,
    /// Human-readable message
    pub message: String,
}

impl ServerError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// The category segment of the code (`ClientError`, `TransientError`, ...)
    pub fn category(&self) -> Option<&str> {
        self.code.split('.').nth(1)
    }

    /// Whether this failure belongs to the transient category, or is one of
    /// the leader-change / read-only codes that every driver retries.
    pub fn is_transient(&self) -> bool {
        self.category() == Some("TransientError")
            || self.code.ends_with(".NotALeader")
            || self.code.ends_with(".ForbiddenOnReadOnlyDatabase")
    }

    /// Whether this failure is a client error (bad query, bad request)
    pub fn is_client_error(&self) -> bool {
        self.category() == Some("ClientError")
    }

    /// Whether this failure came from the security subsystem (rejected
    /// credentials, missing permissions)
    pub fn is_security_error(&self) -> bool {
        self.code.split('.').nth(2) == Some("Security")
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Errors that can occur anywhere in the driver
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Endpoint unreachable, handshake failed, or transport-level trouble
    #[error("connection error: {0}")]
    Connection(String),

    /// The server closed the connection
    #[error("connection closed by server")]
    ConnectionClosed,

    /// The server rejected the presented credentials
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Malformed frame, unexpected message, or a protocol-sequence violation
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Invalid connection state transition
    #[error("invalid connection state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// A FAILURE frame from the server
    #[error("server error: {0}")]
    Server(ServerError),

    /// No connection became available within the acquisition timeout
    #[error("connection pool exhausted: no connection available within {0:?}")]
    PoolExhausted(Duration),

    /// The driver has been closed
    #[error("driver closed")]
    DriverClosed,

    /// The session has been closed
    #[error("session closed")]
    SessionClosed,

    /// The transaction has already finished
    #[error("transaction closed: {0}")]
    TransactionClosed(String),

    /// The result stream has not been consumed yet
    #[error("result not consumed: {0}")]
    ResultNotConsumed(String),

    /// An in-flight operation was interrupted by driver shutdown
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// An operation exceeded its deadline
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a [`Error::Server`] from a FAILURE frame's fields.
    ///
    /// Security failures map to [`Error::Authentication`] so callers can
    /// match on the variant rather than parsing codes.
    pub(crate) fn from_failure(code: String, message: String) -> Self {
        let err = ServerError::new(code, message);
        if err.is_security_error() {
            Error::Authentication(err.to_string())
        } else {
            Error::Server(err)
        }
    }

    /// The server status code, if this error carries one
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Server(e) => Some(&e.code),
            _ => None,
        }
    }

    /// Whether this error came from a server FAILURE frame
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Server(_))
    }

    /// Whether a transaction function should be retried after this error.
    ///
    /// Transient server codes retry; so do connection-level failures, since
    /// the next attempt runs on a fresh connection. Client errors, pool
    /// exhaustion, and lifecycle errors never retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Server(e) => e.is_transient(),
            Error::Connection(_) | Error::ConnectionClosed | Error::Io(_) => true,
            _ => false,
        }
    }
}
