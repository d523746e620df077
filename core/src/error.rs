//! Error types for the core crate
//!
//! `RemoteError` is the single failure type crossing the backend boundary.
//! It is `Clone` so query and mutation handles can keep the last error in
//! their state. `CoreError` covers local concerns such as configuration files.

use std::io;
use thiserror::Error;

/// Any failure surfaced by the persistence service, the network layer or a rejected write
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The request never reached the backend or never returned
    #[error("Network error: {0}")]
    Network(String),

    /// The backend rejected the operation (constraint violation, permission denied, ...)
    #[error("Rejected by backend: {message}")]
    Rejected {
        /// HTTP status when the rejection came over the wire
        status: Option<u16>,
        /// Backend message, kept verbatim
        message: String,
    },

    /// Row id does not exist in the table
    #[error("Row {id} not found in {table}")]
    NotFound {
        /// Table name
        table: String,
        /// Row identifier
        id: String,
    },

    /// Response could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// A row is missing a required field or carries an invalid value
    #[error("Validation error: {0}")]
    Validation(String),

    /// No user is signed in
    #[error("Not signed in")]
    Unauthenticated,

    /// The change feed ended
    #[error("Change feed closed: {0}")]
    FeedClosed(String),

    /// Client misconfiguration (bad URL, missing key)
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RemoteError {
    /// Build a rejection without a transport status
    pub fn rejected(message: impl Into<String>) -> Self {
        RemoteError::Rejected {
            status: None,
            message: message.into(),
        }
    }

    /// Build a not-found error for a row
    pub fn not_found(table: &str, id: impl ToString) -> Self {
        RemoteError::NotFound {
            table: table.to_string(),
            id: id.to_string(),
        }
    }

    /// Text shown to the user in a failure notification.
    ///
    /// Backend messages are passed through unchanged; transport failures get a
    /// generic text since their detail is meaningless to a shopper.
    pub fn user_message(&self) -> String {
        match self {
            RemoteError::Network(_) | RemoteError::FeedClosed(_) => {
                "Could not reach the server. Please check your connection and try again.".to_string()
            }
            RemoteError::Rejected { message, .. } => message.clone(),
            RemoteError::NotFound { .. } => "The requested item no longer exists.".to_string(),
            RemoteError::Decode(_) => "The server sent an unexpected response.".to_string(),
            RemoteError::Validation(msg) => msg.clone(),
            RemoteError::Unauthenticated => "Please sign in to continue.".to_string(),
            RemoteError::Config(_) => "The app is not configured correctly.".to_string(),
        }
    }

    /// Whether the failure happened in transport rather than at the backend
    pub fn is_transport(&self) -> bool {
        matches!(self, RemoteError::Network(_) | RemoteError::FeedClosed(_))
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::Decode(err.to_string())
    }
}

/// Result type for backend operations
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Core error type for local concerns
#[derive(Error, Debug)]
pub enum CoreError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Backend error
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Result type for the core crate
pub type Result<T> = std::result::Result<T, CoreError>;

/// Convert a string error to a ConfigError
pub fn to_config_error<E: std::fmt::Display>(err: E) -> CoreError {
    CoreError::ConfigError(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let core_err: CoreError = io_err.into();
        match core_err {
            CoreError::IoError(_) => {}
            _ => panic!("Expected IoError variant"),
        }

        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let remote: RemoteError = json_err.into();
        assert!(matches!(remote, RemoteError::Decode(_)));

        let core_err = to_config_error("missing url");
        match core_err {
            CoreError::ConfigError(msg) => assert_eq!(msg, "missing url"),
            _ => panic!("Expected ConfigError variant"),
        }
    }

    #[test]
    fn test_user_message() {
        let err = RemoteError::rejected("duplicate key value violates unique constraint");
        assert_eq!(err.user_message(), "duplicate key value violates unique constraint");
        assert!(!err.is_transport());

        let err = RemoteError::Network("connection refused".to_string());
        assert!(err.is_transport());
        assert!(!err.user_message().contains("connection refused"));
    }

    #[test]
    fn test_error_display() {
        let err = RemoteError::not_found("orders", "o-1");
        assert_eq!(err.to_string(), "Row o-1 not found in orders");

        let err = CoreError::ConfigError("bad".to_string());
        assert_eq!(err.to_string(), "Configuration error: bad");
    }
}
