//! # Error Handling
//!
//! This module defines the gateway's error type and how it is converted to HTTP responses.
//!
//! ## Containment policy:
//! Every failure that belongs to one session stays inside that session:
//! - **MalformedAudio**: the pending commit yields no result, the session stays open
//! - **ControlParse**: logged at debug level and ignored
//! - **InferenceEngine**: the worker turns it into an empty result for that job only
//!
//! Only the two kinds that threaten shared resources escalate:
//! - **BufferOverflow**: the offending session is closed to bound memory
//! - **WorkerUnavailable**: the single inference worker is gone, so the process stops
//!
//! ## HTTP mapping:
//! The same enum implements actix's `ResponseError` so the REST handlers can return it
//! directly with `?`. All error bodies share one JSON shape:
//! ```json
//! {
//!   "error": {
//!     "type": "malformed_audio",
//!     "message": "Malformed audio: 17001 bytes is not a whole number of 16-bit samples",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Errors produced by the audio-ingest gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Accumulated PCM bytes do not split into whole 16-bit samples
    #[error("Malformed audio: {len} bytes is not a whole number of 16-bit samples")]
    MalformedAudio { len: usize },

    /// Uploaded audio is not 16-bit mono PCM at 16kHz
    #[error("Unsupported audio format: {0}")]
    UnsupportedAudioFormat(String),

    /// A session tried to buffer more audio than it is allowed to hold
    #[error("Session buffer overflow: {attempted} bytes exceeds the limit of {limit} bytes")]
    BufferOverflow { limit: usize, attempted: usize },

    /// A text frame was not a recognized control message
    #[error("Invalid control message: {0}")]
    ControlParse(String),

    /// The transcription engine failed on one job
    #[error("Transcription engine error: {0}")]
    InferenceEngine(String),

    /// The inference worker thread is no longer running
    #[error("Inference worker is not running")]
    WorkerUnavailable,

    /// The gateway is already serving its maximum number of sessions
    #[error("Too many concurrent sessions (limit: {limit})")]
    TooManySessions { limit: usize },

    /// Audio or a commit arrived after the session was closed
    #[error("Session is closed")]
    SessionClosed,

    /// Client sent an invalid HTTP request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Model resolution or loading failed
    #[error("Model error: {0}")]
    Model(String),

    /// Configuration file or environment variable problems
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Machine-readable error type used in JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::MalformedAudio { .. } => "malformed_audio",
            GatewayError::UnsupportedAudioFormat(_) => "unsupported_audio_format",
            GatewayError::BufferOverflow { .. } => "buffer_overflow",
            GatewayError::ControlParse(_) => "control_parse_error",
            GatewayError::InferenceEngine(_) => "inference_engine_error",
            GatewayError::WorkerUnavailable => "worker_unavailable",
            GatewayError::TooManySessions { .. } => "too_many_sessions",
            GatewayError::SessionClosed => "session_closed",
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::Model(_) => "model_error",
            GatewayError::Config(_) => "config_error",
            GatewayError::Io(_) => "io_error",
        }
    }
}

/// Converts gateway errors into HTTP responses.
///
/// ## HTTP Status Code Mapping:
/// - MalformedAudio/UnsupportedAudioFormat/ControlParse/BadRequest → 400
/// - BufferOverflow → 413 (Payload Too Large)
/// - WorkerUnavailable/TooManySessions → 503 (Service Unavailable)
/// - SessionClosed → 409 (Conflict)
/// - everything else → 500
impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MalformedAudio { .. }
            | GatewayError::UnsupportedAudioFormat(_)
            | GatewayError::ControlParse(_)
            | GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::BufferOverflow { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::WorkerUnavailable | GatewayError::TooManySessions { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::SessionClosed => StatusCode::CONFLICT,
            GatewayError::InferenceEngine(_)
            | GatewayError::Model(_)
            | GatewayError::Config(_)
            | GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
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

/// Shorthand for results that use the gateway error type.
pub type GatewayResult<T> = Result<T, GatewayError>;
