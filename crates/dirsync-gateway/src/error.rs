//! Gateway error types
//!
//! Error definitions with a connection/operation split so callers can tell a
//! broken directory connection apart from a failed single operation.

use thiserror::Error;

/// Error that can occur while talking to a directory.
#[derive(Debug, Error)]
pub enum GatewayError {
    // Connection errors - the session itself is unusable
    /// Failed to establish a connection to the directory.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Connection attempt timed out.
    #[error("connection timeout after {timeout_secs} seconds")]
    ConnectionTimeout { timeout_secs: u64 },

    /// Bind was rejected by the directory.
    #[error("bind rejected: invalid credentials")]
    BindRejected,

    /// Bind attempt timed out.
    #[error("bind timeout after {timeout_secs} seconds")]
    BindTimeout { timeout_secs: u64 },

    // Operation errors - the connection is fine, the request failed
    /// A single directory operation failed.
    #[error("operation failed: {message}")]
    OperationFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Entry not found in the directory.
    #[error("entry not found: {identifier}")]
    EntryNotFound { identifier: String },

    /// Entry already exists in the directory (create conflict).
    #[error("entry already exists: {identifier}")]
    EntryAlreadyExists { identifier: String },

    /// The directory rejected the data (schema violation, bad value).
    #[error("invalid entry data: {message}")]
    InvalidEntry { message: String },

    /// Upstream API returned a non-success response.
    #[error("upstream fetch failed: {message}")]
    UpstreamFetch { message: String },
}

impl GatewayError {
    /// Check whether this error means the connection itself is broken.
    ///
    /// Connection-level errors force a reconnect before the next cycle;
    /// operation-level errors do not.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            GatewayError::ConnectionFailed { .. }
                | GatewayError::ConnectionTimeout { .. }
                | GatewayError::BindRejected
                | GatewayError::BindTimeout { .. }
        )
    }

    /// Get an error code for classification and logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            GatewayError::ConnectionTimeout { .. } => "CONNECTION_TIMEOUT",
            GatewayError::BindRejected => "BIND_REJECTED",
            GatewayError::BindTimeout { .. } => "BIND_TIMEOUT",
            GatewayError::OperationFailed { .. } => "OPERATION_FAILED",
            GatewayError::EntryNotFound { .. } => "ENTRY_NOT_FOUND",
            GatewayError::EntryAlreadyExists { .. } => "ENTRY_EXISTS",
            GatewayError::InvalidEntry { .. } => "INVALID_ENTRY",
            GatewayError::UpstreamFetch { .. } => "UPSTREAM_FETCH_FAILED",
        }
    }

    // Convenience constructors

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        GatewayError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failed error with source.
    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        GatewayError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an operation failed error.
    pub fn operation_failed(message: impl Into<String>) -> Self {
        GatewayError::OperationFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create an operation failed error with source.
    pub fn operation_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        GatewayError::OperationFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an upstream fetch error.
    pub fn upstream_fetch(message: impl Into<String>) -> Self {
        GatewayError::UpstreamFetch {
            message: message.into(),
        }
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
