//! Error types for background removal requests

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for background removal operations
pub type Result<T> = std::result::Result<T, BgRemovalError>;

/// Every failure a request can run into, from upload validation to the backend call
#[derive(Error, Debug)]
pub enum BgRemovalError {
    /// Missing, oversize or wrongly typed upload
    #[error("{0}")]
    Validation(String),

    /// Required setting (e.g. API credential) not present
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Scratch file could not be written or removed
    #[error("Failed to {operation} '{}': {source}", path.display())]
    Staging {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// In-process model failure, fields forwarded verbatim to the client
    #[error("{name}: {message}")]
    Removal {
        name: String,
        message: String,
        cause: Option<String>,
    },

    /// Remote service answered with a non-success status
    #[error("Remote service responded with status {status}: {message}")]
    RemoteResponse {
        status: u16,
        message: String,
        details: Option<String>,
    },

    /// Request was sent but no response arrived
    #[error("Remote service unreachable: {0}")]
    RemoteUnreachable(String),

    /// Request could not be built or sent
    #[error("Failed to set up remote request: {0}")]
    RemoteRequest(String),

    /// Model fetch or cache failure outside a request
    #[error("Model error: {0}")]
    Model(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BgRemovalError {
    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a staging error with operation and path context
    pub fn staging<P: AsRef<Path>>(operation: &str, path: P, source: std::io::Error) -> Self {
        Self::Staging {
            operation: operation.to_string(),
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a removal error carrying the backend's classification and diagnostics
    pub fn removal<N: Into<String>, M: Into<String>>(
        name: N,
        message: M,
        cause: Option<&dyn std::fmt::Display>,
    ) -> Self {
        Self::Removal {
            name: name.into(),
            message: message.into(),
            cause: cause.map(ToString::to_string),
        }
    }

    /// Create a remote response error
    pub fn remote_response<S: Into<String>>(status: u16, message: S, details: Option<String>) -> Self {
        Self::RemoteResponse {
            status,
            message: message.into(),
            details,
        }
    }

    /// Create a model fetch error with operation context
    pub fn network_error<S: Into<String>, E: std::fmt::Display>(context: S, error: E) -> Self {
        Self::Model(format!("{}: {}", context.into(), error))
    }

    /// HTTP status used when this error reaches the client
    ///
    /// Remote statuses are only forwarded when they are a real client or server
    /// error; anything else collapses to 500.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::RemoteResponse { status, .. } if (400..=599).contains(status) => *status,
            _ => 500,
        }
    }

    /// Error classification reported in the `name` field of error bodies
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::Configuration(_) => "ConfigurationError",
            Self::Staging { .. } => "StagingError",
            Self::Removal { name, .. } => name,
            Self::RemoteResponse { .. } => "RemoteServiceError",
            Self::RemoteUnreachable(_) => "RemoteServiceUnreachable",
            Self::RemoteRequest(_) => "RemoteRequestError",
            Self::Model(_) => "ModelError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// Whether this error was caused by the client rather than the service
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}
