//! Unified SDK error types.

use std::fmt;

use thiserror::Error;

/// Top-level SDK error.
#[derive(Error, Debug)]
pub enum SdkError {
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// HTTP-layer errors.
#[derive(Error, Debug)]
pub enum HttpError {
    #[cfg(feature = "http")]
    #[error("Request failed: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Server error {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("Rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Timeout")]
    Timeout,

    #[error("Max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

/// Which streaming primitive a connection runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportKind {
    #[default]
    Sse,
    WebSocket,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Sse => f.write_str("SSE"),
            TransportKind::WebSocket => f.write_str("WebSocket"),
        }
    }
}

/// Errors delivered to stream error handlers.
///
/// These never escape as panics: every stream failure is routed to the
/// registered error callbacks (and logged), and the stream keeps running
/// unless the variant is [`StreamError::ConnectionExhausted`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Connection-level failure. A reconnect is scheduled.
    #[error("{kind} connection error: {reason}")]
    Transport { kind: TransportKind, reason: String },

    /// Malformed payload. The stream stays alive.
    #[error("Failed to parse {kind} message: {detail}")]
    Parse { kind: TransportKind, detail: String },

    /// Explicit error envelope sent by the server. The stream stays alive.
    #[error("Server error: {0}")]
    Protocol(String),

    /// Terminal: retries are used up and the connection has been torn down.
    #[error("Max reconnection attempts reached ({attempts})")]
    ConnectionExhausted { attempts: u32 },

    #[error("{kind} is not connected")]
    NotConnected { kind: TransportKind },

    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Terminal: no Tokio runtime to run the connection or its timers on.
    #[error("No Tokio runtime available")]
    NoRuntime,
}

impl StreamError {
    /// Whether the connection will not be retried automatically after this error.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamError::ConnectionExhausted { .. } | StreamError::NoRuntime)
    }
}

/// Authentication errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid auth token: {0}")]
    InvalidToken(String),

    #[error("Public streams carry no credentials to rotate")]
    PublicChannel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_message() {
        let err = StreamError::Transport {
            kind: TransportKind::Sse,
            reason: "reset by peer".into(),
        };
        assert_eq!(err.to_string(), "SSE connection error: reset by peer");
        assert!(!err.is_terminal());
    }

    #[test]
    fn test_parse_error_message() {
        let err = StreamError::Parse {
            kind: TransportKind::WebSocket,
            detail: "expected value".into(),
        };
        assert!(err
            .to_string()
            .starts_with("Failed to parse WebSocket message"));
    }

    #[test]
    fn test_exhausted_is_terminal() {
        let err = StreamError::ConnectionExhausted { attempts: 3 };
        assert!(err.is_terminal());
        assert!(err.to_string().starts_with("Max reconnection attempts reached"));
    }

    #[test]
    fn test_no_runtime_is_terminal() {
        assert!(StreamError::NoRuntime.is_terminal());
    }

    #[test]
    fn test_sdk_error_from_stream() {
        let err: SdkError = StreamError::NotConnected {
            kind: TransportKind::WebSocket,
        }
        .into();
        assert_eq!(err.to_string(), "Stream error: WebSocket is not connected");
    }
}
