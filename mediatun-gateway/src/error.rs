//! Error types for the ingestion gateway

use thiserror::Error;

use crate::types::{CName, Ssrc};

/// Gateway error types
#[derive(Debug, Error)]
pub enum GatewayError {
    /// SSRC seen but no identity bound yet; the packet is dropped.
    #[error("no identity bound for ssrc {0}")]
    UnresolvedSsrc(Ssrc),

    #[error("no live client for {0}")]
    NoClient(CName),

    #[error("signaling error: {0}")]
    Signaling(#[from] mediatun_signal::SignalingError),

    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
