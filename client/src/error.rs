//! Transport errors and their mapping onto `RemoteError`

use onemedi_core::RemoteError;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Error raised while talking to the backend over HTTP
#[derive(Error, Debug)]
pub enum TransportError {
    /// Network error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-success status from the backend
    #[error("Server error ({status}): {message}")]
    Server {
        /// HTTP status
        status: StatusCode,
        /// Message extracted from the error body
        message: String,
    },

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error body shape used by the backend
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

impl TransportError {
    /// Build a server error from a non-success response body
    pub fn from_body(status: StatusCode, body: &str) -> Self {
        let parsed = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.message.or(b.error));

        let message = match parsed {
            Some(message) => message,
            None if !body.trim().is_empty() => body.trim().to_string(),
            None => status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string(),
        };

        TransportError::Server { status, message }
    }
}

impl From<TransportError> for RemoteError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Network(e) if e.is_decode() => RemoteError::Decode(e.to_string()),
            TransportError::Network(e) => RemoteError::Network(e.to_string()),
            TransportError::Server { status, message } => RemoteError::Rejected {
                status: Some(status.as_u16()),
                message,
            },
            TransportError::Json(e) => RemoteError::Decode(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_is_kept_verbatim() {
        let err = TransportError::from_body(
            StatusCode::CONFLICT,
            r#"{"message":"duplicate key value violates unique constraint \"cart_items_pkey\"","code":"23505"}"#,
        );
        let remote: RemoteError = err.into();
        assert_eq!(
            remote,
            RemoteError::Rejected {
                status: Some(409),
                message: "duplicate key value violates unique constraint \"cart_items_pkey\"".to_string(),
            }
        );
    }

    #[test]
    fn test_plain_text_and_empty_bodies() {
        match TransportError::from_body(StatusCode::FORBIDDEN, "permission denied for table orders") {
            TransportError::Server { message, .. } => {
                assert_eq!(message, "permission denied for table orders")
            }
            other => panic!("unexpected {:?}", other),
        }

        match TransportError::from_body(StatusCode::BAD_GATEWAY, "") {
            TransportError::Server { message, .. } => assert_eq!(message, "Bad Gateway"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_error_field_fallback() {
        match TransportError::from_body(StatusCode::UNAUTHORIZED, r#"{"error":"invalid JWT"}"#) {
            TransportError::Server { status, message } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(message, "invalid JWT");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
