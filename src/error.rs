//! # Error Handling
//!
//! Error types shared by every part of the bridge, and how they are turned into
//! HTTP responses on the control API.
//!
//! ## Error Categories:
//! - **Protocol**: the telephony leg or the runner sent something we did not expect
//! - **Hangup**: the telephony leg signalled the end of the call (terminal, not a failure)
//! - **Io**: a transient socket error; retried only by the keepalive supervisor
//! - **UnsupportedRate**: a runner audio frame cannot be resampled to the telephony rate
//! - **AlreadyExists / NotFound**: session registry lookups
//! - **Collaborator**: an external contract (metadata, media, events, pipeline) failed
//!
//! ## Propagation:
//! Protocol and codec errors abort only the directional loop that hit them, which
//! then cancels the session. Teardown failures are logged and never returned.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use tokio_tungstenite::tungstenite;

/// Every failure the bridge can report.
#[derive(Debug)]
pub enum BridgeError {
    /// Unexpected message on one of the wire protocols
    Protocol(String),

    /// The telephony leg hung up
    Hangup,

    /// Socket read/write failure
    Io(std::io::Error),

    /// Downsampling only supports integer multiples of 8 kHz
    UnsupportedRate(u32),

    /// PCM buffer with an odd byte count
    InvalidPcm(usize),

    /// A session with this id is already registered
    AlreadyExists(String),

    /// No session (or call) with this id
    NotFound(String),

    /// The session's cancellation fired while the operation was in flight
    Cancelled,

    /// WebSocket failure on the runner leg
    Runner(String),

    /// Protobuf or JSON payload could not be decoded
    Decode(String),

    /// External collaborator call failed
    Collaborator(String),

    /// Control API request body failed validation
    BadRequest(String),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            BridgeError::Hangup => write!(f, "Telephony leg hung up"),
            BridgeError::Io(err) => write!(f, "I/O error: {}", err),
            BridgeError::UnsupportedRate(rate) => {
                write!(f, "Unsupported sample rate: {} Hz is not a multiple of 8000", rate)
            }
            BridgeError::InvalidPcm(len) => {
                write!(f, "PCM data length must be even for 16-bit samples (received {} bytes)", len)
            }
            BridgeError::AlreadyExists(id) => write!(f, "Session already exists: {}", id),
            BridgeError::NotFound(id) => write!(f, "Not found: {}", id),
            BridgeError::Cancelled => write!(f, "Session cancelled"),
            BridgeError::Runner(msg) => write!(f, "Runner connection error: {}", msg),
            BridgeError::Decode(msg) => write!(f, "Decode error: {}", msg),
            BridgeError::Collaborator(msg) => write!(f, "Collaborator error: {}", msg),
            BridgeError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Io(err) => Some(err),
            _ => None,
        }
    }
}

/// Maps bridge errors onto the control API.
///
/// ## HTTP Status Code Mapping:
/// - NotFound → 404
/// - AlreadyExists → 409
/// - BadRequest/Decode/InvalidPcm/UnsupportedRate → 400
/// - Collaborator/Runner → 502
/// - everything else → 500
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "not_found",
///     "message": "Not found: 6b1f...",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for BridgeError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;

        match self {
            BridgeError::NotFound(_) => StatusCode::NOT_FOUND,
            BridgeError::AlreadyExists(_) => StatusCode::CONFLICT,
            BridgeError::BadRequest(_)
            | BridgeError::Decode(_)
            | BridgeError::InvalidPcm(_)
            | BridgeError::UnsupportedRate(_) => StatusCode::BAD_REQUEST,
            BridgeError::Collaborator(_) | BridgeError::Runner(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl BridgeError {
    /// Machine-readable error type used in API responses and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Protocol(_) => "protocol_error",
            BridgeError::Hangup => "hangup",
            BridgeError::Io(_) => "io_error",
            BridgeError::UnsupportedRate(_) => "unsupported_rate",
            BridgeError::InvalidPcm(_) => "invalid_pcm",
            BridgeError::AlreadyExists(_) => "already_exists",
            BridgeError::NotFound(_) => "not_found",
            BridgeError::Cancelled => "cancelled",
            BridgeError::Runner(_) => "runner_error",
            BridgeError::Decode(_) => "decode_error",
            BridgeError::Collaborator(_) => "collaborator_error",
            BridgeError::BadRequest(_) => "bad_request",
        }
    }

    /// Whether this error ends a call normally rather than as a failure.
    pub fn is_hangup(&self) -> bool {
        matches!(self, BridgeError::Hangup | BridgeError::Cancelled)
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io(err)
    }
}

impl From<tungstenite::Error> for BridgeError {
    fn from(err: tungstenite::Error) -> Self {
        BridgeError::Runner(err.to_string())
    }
}

impl From<prost::DecodeError> for BridgeError {
    fn from(err: prost::DecodeError) -> Self {
        BridgeError::Decode(format!("runner frame: {}", err))
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Decode(format!("JSON parsing error: {}", err))
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        BridgeError::Collaborator(err.to_string())
    }
}

/// Shorthand for `Result<T, BridgeError>`.
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_status_mapping() {
        assert_eq!(BridgeError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(BridgeError::AlreadyExists("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(BridgeError::UnsupportedRate(11025).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(BridgeError::Collaborator("down".into()).status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(BridgeError::Hangup.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_display_and_kind() {
        let err = BridgeError::UnsupportedRate(22050);
        assert_eq!(err.kind(), "unsupported_rate");
        assert!(err.to_string().contains("22050"));

        let io: BridgeError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        assert_eq!(io.kind(), "io_error");
        assert!(!io.is_hangup());
        assert!(BridgeError::Hangup.is_hangup());
    }
}
