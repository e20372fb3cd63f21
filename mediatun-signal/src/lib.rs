//! WebRTC signaling client for the mediatun gateway.
//!
//! Speaks the `rtc.Sfu/Signal` bidirectional stream against a remote
//! forwarding unit: join handshake, publisher renegotiation, remote
//! offers, and trickle ICE across a publisher/subscriber transport pair.

pub mod client;
pub mod error;
pub mod stream;
pub mod transport;

pub use client::{NegotiationErrorHandler, SignalingClient};
pub use error::{Result, SignalingError};
pub use stream::grpc::GrpcConnector;
pub use stream::{channel_pair, ChannelRemote, SignalConnector, SignalReceiver, SignalSender};
pub use transport::{Role, Transport, API_CHANNEL};
