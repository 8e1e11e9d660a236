use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by a speech session.
///
/// Every variant terminates the session it came from. Nothing here is retried
/// internally; retrying means opening a new session.
#[derive(Debug, Error)]
pub enum SpeechError {
    /// Missing or invalid credential / settings. Raised before any connection attempt.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The remote endpoint rejected the signed URL (clock skew or rotated credentials).
    #[error("Authentication rejected: {0}")]
    Auth(String),

    /// Transport failure: handshake error, dropped connection, or cancellation.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Non-zero response code from the service. `message` is the remote text verbatim.
    #[error("Speech service error {code}: {message}")]
    Protocol { code: i64, message: String },

    /// The session's wall-clock budget was exceeded.
    #[error("Speech session timed out after {0:?}")]
    Timeout(Duration),

    /// A response could not be decoded.
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// Caller supplied unusable input (empty audio, text too long, ...).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not allowed in the session's current state.
    #[error("Invalid session state: {0}")]
    InvalidState(String),
}

impl SpeechError {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Auth(_) => "auth",
            Self::Connection(_) => "connection",
            Self::Protocol { .. } => "protocol",
            Self::Timeout(_) => "timeout",
            Self::Decoding(_) => "decoding",
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidState(_) => "invalid_state",
        }
    }
}

impl From<serde_json::Error> for SpeechError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decoding(e.to_string())
    }
}

impl From<base64::DecodeError> for SpeechError {
    fn from(e: base64::DecodeError) -> Self {
        Self::Decoding(format!("invalid base64 payload: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, SpeechError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_keeps_remote_message() {
        let err = SpeechError::Protocol {
            code: 10000,
            message: "invalid parameter".into(),
        };
        assert_eq!(err.kind(), "protocol");
        assert!(err.to_string().contains("invalid parameter"));
        assert!(err.to_string().contains("10000"));
    }

    #[test]
    fn test_json_error_is_decoding() {
        let err: SpeechError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), "decoding");
    }
}
