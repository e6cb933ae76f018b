//! Error types for the Chrome Debug MCP Server.

use thiserror::Error;

/// Main error type for Chrome Debug MCP operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Debugging endpoint unreachable or handshake failed
    #[error("Connection error ({endpoint}): {reason}")]
    Connection {
        /// Endpoint that was being contacted (host:port or websocket URL)
        endpoint: String,
        /// What went wrong
        reason: String,
    },

    /// Browser process failed to start
    #[error("Launch error: {0}")]
    Launch(String),

    /// Requested page, target or extension context does not exist
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    /// Listing pages or extensions failed
    #[error("Enumeration error: {0}")]
    Enumeration(String),

    /// The browser answered a command with a protocol error
    #[error("Protocol error in {method}: {message}")]
    Protocol {
        /// CDP method that failed
        method: String,
        /// Error message reported by the browser
        message: String,
    },

    /// A protocol round-trip or connection attempt exceeded its deadline
    #[error("Timeout after {ms}ms: {operation}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Deadline in milliseconds
        ms: u64,
    },

    /// No browser connection is established
    #[error("Not connected to a browser")]
    NotConnected,

    /// Invalid input or parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with custom message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a connection error for an endpoint.
    pub fn connection(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Connection {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same operation unchanged may succeed.
    ///
    /// Launch failures need different parameters and missing targets need a
    /// state change, so neither is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connection { .. } | Error::Timeout { .. } | Error::Enumeration(_)
        )
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
