//! Per-role WebRTC transport.
//!
//! A session owns two transports, one per [`Role`]. Each wraps a peer
//! connection, trickles its local candidates out through the signaling
//! stream, and buffers remote candidates that arrive before the remote
//! description has been applied.

use std::fmt;
use std::sync::Arc;

use mediatun_proto::{signal_request, trickle, SignalRequest, Trickle};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::error::Result;
use crate::stream::SignalSender;

/// Label of the session control channel. The publisher opens it; the
/// forwarding unit mirrors it back on the subscriber side.
pub const API_CHANNEL: &str = "mediatun-api";

/// Role of a transport within a signaling session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Publisher,
    Subscriber,
}

impl Role {
    pub fn as_target(self) -> trickle::Target {
        match self {
            Role::Publisher => trickle::Target::Publisher,
            Role::Subscriber => trickle::Target::Subscriber,
        }
    }

    pub fn from_target(target: trickle::Target) -> Self {
        match target {
            trickle::Target::Publisher => Role::Publisher,
            trickle::Target::Subscriber => Role::Subscriber,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Publisher => f.write_str("publisher"),
            Role::Subscriber => f.write_str("subscriber"),
        }
    }
}

#[derive(Default)]
struct CandidateQueue {
    /// Set once the remote description has landed and the backlog drained.
    applied: bool,
    pending: Vec<RTCIceCandidateInit>,
}

pub struct Transport {
    role: Role,
    pc: Arc<RTCPeerConnection>,
    queue: Mutex<CandidateQueue>,
    api_channel: parking_lot::Mutex<Option<Arc<RTCDataChannel>>>,
    /// Candidate application attempts, in order.
    #[cfg(test)]
    applied_log: parking_lot::Mutex<Vec<String>>,
}

impl Transport {
    /// Build a peer connection for `role` and wire candidate trickling into
    /// `signal`. Publisher transports open the control data channel up
    /// front so the join offer carries an m-line even before tracks exist.
    pub async fn new(
        role: Role,
        config: RTCConfiguration,
        signal: Arc<dyn SignalSender>,
    ) -> Result<Arc<Self>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        let pc = Arc::new(api.new_peer_connection(config).await?);

        let transport = Arc::new(Self {
            role,
            pc: Arc::clone(&pc),
            queue: Mutex::new(CandidateQueue::default()),
            api_channel: parking_lot::Mutex::new(None),
            #[cfg(test)]
            applied_log: parking_lot::Mutex::new(Vec::new()),
        });

        if role == Role::Publisher {
            let channel = pc.create_data_channel(API_CHANNEL, None).await?;
            *transport.api_channel.lock() = Some(channel);
        }

        let target = role.as_target() as i32;
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let signal = Arc::clone(&signal);
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                let init = match candidate.to_json() {
                    Ok(init) => init,
                    Err(e) => {
                        warn!(error = %e, "failed to encode local candidate");
                        return;
                    }
                };
                let init = match serde_json::to_string(&init) {
                    Ok(init) => init,
                    Err(e) => {
                        warn!(error = %e, "failed to encode local candidate");
                        return;
                    }
                };
                let request = SignalRequest {
                    id: String::new(),
                    payload: Some(signal_request::Payload::Trickle(Trickle { target, init })),
                };
                if let Err(e) = signal.send(request).await {
                    debug!(error = %e, "dropping local candidate, stream closed");
                }
            })
        }));

        pc.on_ice_connection_state_change(Box::new(move |state| {
            debug!(role = %role, state = %state, "ice connection state changed");
            Box::pin(async {})
        }));

        Ok(transport)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }

    /// Apply a remote candidate, or buffer it if the remote description has
    /// not been set yet. Buffered candidates are flushed in arrival order
    /// by [`Transport::set_remote_description`].
    pub async fn add_remote_candidate(&self, init: RTCIceCandidateInit) -> Result<()> {
        let mut queue = self.queue.lock().await;
        if queue.applied {
            self.apply_candidate(init).await?;
        } else {
            queue.pending.push(init);
        }
        Ok(())
    }

    /// Set the remote description, then drain the candidate backlog. The
    /// queue lock is held across both steps so a concurrently arriving
    /// candidate is either drained here or applied directly, never both.
    /// A candidate the peer connection rejects is logged and skipped; the
    /// rest of the backlog still applies.
    pub async fn set_remote_description(&self, description: RTCSessionDescription) -> Result<()> {
        let mut queue = self.queue.lock().await;
        self.pc.set_remote_description(description).await?;
        for init in queue.pending.drain(..) {
            if let Err(e) = self.apply_candidate(init).await {
                warn!(role = %self.role, error = %e, "failed to apply queued candidate");
            }
        }
        queue.applied = true;
        Ok(())
    }

    async fn apply_candidate(&self, init: RTCIceCandidateInit) -> Result<()> {
        #[cfg(test)]
        self.applied_log.lock().push(init.candidate.clone());
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    /// Adopt the control channel the forwarding unit opened toward us.
    pub fn set_api_channel(&self, channel: Arc<RTCDataChannel>) {
        *self.api_channel.lock() = Some(channel);
    }

    pub async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn pending_candidates(&self) -> usize {
        self.queue.lock().await.pending.len()
    }
}
