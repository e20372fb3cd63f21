//! Signaling stream abstraction.
//!
//! A session talks to the forwarding unit through a [`SignalSender`] /
//! [`SignalReceiver`] pair. [`grpc::connect`] produces the tonic-backed
//! implementation over the `rtc.Sfu/Signal` bidirectional stream;
//! [`channel_pair`] produces an in-memory implementation used by tests and
//! in-process wiring.

use std::sync::Arc;

use async_trait::async_trait;
use mediatun_proto::{SignalReply, SignalRequest};
use tokio::sync::mpsc;

use crate::error::{Result, SignalingError};

/// Outbound half of a signaling stream. Cheap to clone behind an `Arc` and
/// safe to share across tasks.
#[async_trait]
pub trait SignalSender: Send + Sync {
    async fn send(&self, request: SignalRequest) -> Result<()>;
}

/// Inbound half of a signaling stream. Owned by the session receive loop.
#[async_trait]
pub trait SignalReceiver: Send {
    /// Next reply from the forwarding unit, or `None` once the stream has
    /// closed.
    async fn recv(&mut self) -> Option<SignalReply>;
}

/// Opens a fresh signaling stream per session.
#[async_trait]
pub trait SignalConnector: Send + Sync {
    async fn connect(&self) -> Result<(Arc<dyn SignalSender>, Box<dyn SignalReceiver>)>;
}

pub mod grpc {
    //! tonic-backed signaling stream.

    use std::sync::Arc;

    use async_trait::async_trait;
    use mediatun_proto::{SfuClient, SignalReply, SignalRequest};
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;
    use tracing::warn;

    use super::{SignalConnector, SignalReceiver, SignalSender};
    use crate::error::{Result, SignalingError};

    const OUTBOUND_BUFFER: usize = 64;

    struct GrpcSignalSender {
        tx: mpsc::Sender<SignalRequest>,
    }

    #[async_trait]
    impl SignalSender for GrpcSignalSender {
        async fn send(&self, request: SignalRequest) -> Result<()> {
            self.tx
                .send(request)
                .await
                .map_err(|_| SignalingError::StreamClosed)
        }
    }

    struct GrpcSignalReceiver {
        inner: tonic::codec::Streaming<SignalReply>,
    }

    #[async_trait]
    impl SignalReceiver for GrpcSignalReceiver {
        async fn recv(&mut self) -> Option<SignalReply> {
            match self.inner.message().await {
                Ok(reply) => reply,
                Err(status) => {
                    warn!(error = %status, "signaling stream error");
                    None
                }
            }
        }
    }

    /// Dial the forwarding unit and open the `Signal` bidirectional stream.
    pub async fn connect(endpoint: &str) -> Result<(Arc<dyn SignalSender>, Box<dyn SignalReceiver>)> {
        let uri = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("http://{endpoint}")
        };
        let mut client = SfuClient::connect(uri)
            .await
            .map_err(|e| SignalingError::Transport(e.to_string()))?;

        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let response = client
            .signal(tonic::Request::new(ReceiverStream::new(rx)))
            .await
            .map_err(|e| SignalingError::Transport(e.to_string()))?;

        Ok((
            Arc::new(GrpcSignalSender { tx }),
            Box::new(GrpcSignalReceiver {
                inner: response.into_inner(),
            }),
        ))
    }

    /// [`SignalConnector`] that dials the same endpoint for every session.
    pub struct GrpcConnector {
        endpoint: String,
    }

    impl GrpcConnector {
        pub fn new(endpoint: impl Into<String>) -> Self {
            Self {
                endpoint: endpoint.into(),
            }
        }
    }

    #[async_trait]
    impl SignalConnector for GrpcConnector {
        async fn connect(&self) -> Result<(Arc<dyn SignalSender>, Box<dyn SignalReceiver>)> {
            connect(&self.endpoint).await
        }
    }
}

struct ChannelSender {
    tx: mpsc::UnboundedSender<SignalRequest>,
}

#[async_trait]
impl SignalSender for ChannelSender {
    async fn send(&self, request: SignalRequest) -> Result<()> {
        self.tx.send(request).map_err(|_| SignalingError::StreamClosed)
    }
}

struct ChannelReceiver {
    rx: mpsc::UnboundedReceiver<SignalReply>,
}

#[async_trait]
impl SignalReceiver for ChannelReceiver {
    async fn recv(&mut self) -> Option<SignalReply> {
        self.rx.recv().await
    }
}

/// Far end of an in-memory signaling stream. Dropping either half closes
/// the stream for the session side.
pub struct ChannelRemote {
    pub requests: mpsc::UnboundedReceiver<SignalRequest>,
    pub replies: mpsc::UnboundedSender<SignalReply>,
}

/// In-memory signaling stream for tests and in-process forwarding units.
pub fn channel_pair() -> (Arc<dyn SignalSender>, Box<dyn SignalReceiver>, ChannelRemote) {
    let (req_tx, req_rx) = mpsc::unbounded_channel();
    let (rep_tx, rep_rx) = mpsc::unbounded_channel();
    (
        Arc::new(ChannelSender { tx: req_tx }),
        Box::new(ChannelReceiver { rx: rep_rx }),
        ChannelRemote {
            requests: req_rx,
            replies: rep_tx,
        },
    )
}
