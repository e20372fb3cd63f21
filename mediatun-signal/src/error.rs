//! Error types for the signaling client

use thiserror::Error;

/// Signaling error types
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Malformed or unexpected signaling traffic. Fatal to the owning
    /// session.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The signaling stream ended while a reply was still expected.
    #[error("signaling stream closed")]
    StreamClosed,

    /// Operation attempted outside the session state that allows it.
    /// Recoverable by the caller.
    #[error("invalid session state: {0}")]
    SessionState(&'static str),

    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type for signaling operations
pub type Result<T> = std::result::Result<T, SignalingError>;
