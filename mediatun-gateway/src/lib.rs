//! Media-tunnel ingestion gateway core.
//!
//! Accepts bare RTP/RTCP over UDP from anonymous senders, resolves each
//! SSRC to its CNAME identity via RTCP source description, and
//! republishes every resolved stream into a remote forwarding unit as a
//! pair of WebRTC tracks, relaying RTCP feedback back to the senders.

pub mod client_manager;
pub mod config;
pub mod error;
pub mod listener;
pub mod peer_manager;
pub mod pipeline;
pub mod router;
pub mod types;

pub use client_manager::{Client, ClientManager};
pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use listener::UdpListener;
pub use peer_manager::{PeerManager, SourceInfo};
pub use pipeline::{Pipeline, PipelineFactory, PipelineHandle, PipelineRegistry, PipelineSink};
pub use router::{DatagramSink, IngestRouter};
pub use types::{CName, MediaKind, Ssrc};
