//! Signaling session against the remote forwarding unit.
//!
//! [`SignalingClient`] drives one `Signal` stream: join handshake,
//! publisher renegotiation when tracks are added, answering
//! subscriber-side offers, and trickle routing. One client per session;
//! the receive loop runs on its own task and is torn down with the
//! session.

use std::sync::Arc;

use mediatun_proto::{
    signal_reply, signal_request, trickle, JoinRequest, SignalReply, SignalRequest,
};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};
use uuid::Uuid;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::error::{Result, SignalingError};
use crate::stream::{SignalReceiver, SignalSender};
use crate::transport::{Role, Transport, API_CHANNEL};

/// Invoked when a background negotiation fails, tagged with the transport
/// role the failure belongs to.
pub type NegotiationErrorHandler = Box<dyn Fn(Role, SignalingError) + Send + Sync>;

type ReplySender = oneshot::Sender<Result<RTCSessionDescription>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Unjoined,
    Joining,
    Joined,
    Left,
}

pub struct SignalingClient {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: RTCConfiguration,
    signal: Arc<dyn SignalSender>,
    state: parking_lot::Mutex<SessionState>,
    transports: parking_lot::Mutex<Option<(Arc<Transport>, Arc<Transport>)>>,
    join_waiter: parking_lot::Mutex<Option<ReplySender>>,
    answer_waiter: parking_lot::Mutex<Option<ReplySender>>,
    /// Serializes publisher renegotiations; at most one offer in flight.
    negotiation: tokio::sync::Mutex<()>,
    on_negotiation_error: parking_lot::Mutex<Option<NegotiationErrorHandler>>,
}

impl SignalingClient {
    /// Wrap an open signaling stream. Spawns the receive loop; the loop
    /// exits when the stream closes or a protocol error tears the session
    /// down.
    pub fn new(
        config: RTCConfiguration,
        signal: Arc<dyn SignalSender>,
        receiver: Box<dyn SignalReceiver>,
    ) -> Self {
        let inner = Arc::new(SessionInner {
            config,
            signal,
            state: parking_lot::Mutex::new(SessionState::Unjoined),
            transports: parking_lot::Mutex::new(None),
            join_waiter: parking_lot::Mutex::new(None),
            answer_waiter: parking_lot::Mutex::new(None),
            negotiation: tokio::sync::Mutex::new(()),
            on_negotiation_error: parking_lot::Mutex::new(None),
        });
        let loop_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            SessionInner::recv_loop(loop_inner, receiver).await;
        });
        Self { inner }
    }

    /// Register the background negotiation failure handler. Replaces any
    /// previous handler.
    pub fn on_negotiation_error(&self, handler: NegotiationErrorHandler) {
        *self.inner.on_negotiation_error.lock() = Some(handler);
    }

    pub fn is_joined(&self) -> bool {
        *self.inner.state.lock() == SessionState::Joined
    }

    /// True once the session has been left or torn down. Terminal; a
    /// closed session rejects further joins.
    pub fn is_closed(&self) -> bool {
        *self.inner.state.lock() == SessionState::Left
    }

    /// Join session `sid` as `uid`: create both transports, send the
    /// publisher offer, await and apply the answer. On failure every
    /// partially created resource is released and the client returns to
    /// the unjoined state.
    pub async fn join(&self, sid: &str, uid: &str) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                SessionState::Unjoined => *state = SessionState::Joining,
                SessionState::Joining => {
                    return Err(SignalingError::SessionState("join already in progress"))
                }
                SessionState::Joined => {
                    return Err(SignalingError::SessionState("session already joined"))
                }
                SessionState::Left => return Err(SignalingError::SessionState("session left")),
            }
        }

        match SessionInner::join_inner(&self.inner, sid, uid).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let fatal = matches!(e, SignalingError::Protocol(_));
                SessionInner::abort_join(&self.inner, fatal).await;
                Err(e)
            }
        }
    }

    /// Publish a local track. Requires a joined session; the resulting
    /// renegotiation runs in the background.
    pub async fn add_track(
        &self,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Result<Arc<RTCRtpSender>> {
        if *self.inner.state.lock() != SessionState::Joined {
            return Err(SignalingError::SessionState("no active session"));
        }
        let publisher = self
            .inner
            .publisher()
            .ok_or(SignalingError::SessionState("no active session"))?;
        let sender = publisher.peer_connection().add_track(track).await?;
        Ok(sender)
    }

    /// Leave the session and close both transports. Idempotent.
    pub async fn leave(&self) -> Result<()> {
        let transports = {
            let mut state = self.inner.state.lock();
            if *state == SessionState::Left {
                return Ok(());
            }
            *state = SessionState::Left;
            self.inner.transports.lock().take()
        };
        self.inner.fail_waiters();
        if let Some((publisher, subscriber)) = transports {
            let first = publisher.close().await;
            subscriber.close().await?;
            first?;
        }
        Ok(())
    }
}

impl SessionInner {
    fn publisher(&self) -> Option<Arc<Transport>> {
        self.transports.lock().as_ref().map(|(p, _)| Arc::clone(p))
    }

    fn subscriber(&self) -> Option<Arc<Transport>> {
        self.transports.lock().as_ref().map(|(_, s)| Arc::clone(s))
    }

    fn transport(&self, role: Role) -> Option<Arc<Transport>> {
        match role {
            Role::Publisher => self.publisher(),
            Role::Subscriber => self.subscriber(),
        }
    }

    /// Drop any outstanding reply waiters; their holders observe
    /// `StreamClosed`.
    fn fail_waiters(&self) {
        let _ = self.join_waiter.lock().take();
        let _ = self.answer_waiter.lock().take();
    }

    fn report_negotiation_error(&self, role: Role, err: SignalingError) {
        warn!(role = %role, error = %err, "negotiation failed");
        if let Some(handler) = self.on_negotiation_error.lock().as_ref() {
            handler(role, err);
        }
    }

    async fn join_inner(inner: &Arc<Self>, sid: &str, uid: &str) -> Result<()> {
        let publisher =
            Transport::new(Role::Publisher, inner.config.clone(), Arc::clone(&inner.signal))
                .await?;
        let subscriber =
            Transport::new(Role::Subscriber, inner.config.clone(), Arc::clone(&inner.signal))
                .await?;

        // Stored before the join request goes out so early trickle from the
        // forwarding unit has somewhere to queue.
        *inner.transports.lock() = Some((Arc::clone(&publisher), Arc::clone(&subscriber)));

        subscriber.peer_connection().on_track(Box::new(
            |track: Arc<TrackRemote>, _receiver, _transceiver| {
                debug!(ssrc = track.ssrc(), kind = %track.kind(), "remote track");
                Box::pin(async {})
            },
        ));

        let pub_weak = Arc::downgrade(&publisher);
        let sub_weak = Arc::downgrade(&subscriber);
        subscriber
            .peer_connection()
            .on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
                let pub_weak = pub_weak.clone();
                let sub_weak = sub_weak.clone();
                Box::pin(async move {
                    if channel.label() != API_CHANNEL {
                        return;
                    }
                    channel.on_message(Box::new(|msg: DataChannelMessage| {
                        debug!(len = msg.data.len(), "control channel message");
                        Box::pin(async {})
                    }));
                    if let Some(t) = sub_weak.upgrade() {
                        t.set_api_channel(Arc::clone(&channel));
                    }
                    if let Some(t) = pub_weak.upgrade() {
                        t.set_api_channel(channel);
                    }
                })
            }));

        let offer = publisher.peer_connection().create_offer(None).await?;
        publisher
            .peer_connection()
            .set_local_description(offer.clone())
            .await?;
        let description = serde_json::to_vec(&offer)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        *inner.join_waiter.lock() = Some(reply_tx);

        inner
            .signal
            .send(SignalRequest {
                id: String::new(),
                payload: Some(signal_request::Payload::Join(JoinRequest {
                    sid: sid.to_string(),
                    uid: uid.to_string(),
                    description,
                })),
            })
            .await?;

        let answer = match reply_rx.await {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(SignalingError::StreamClosed),
        };
        publisher.set_remote_description(answer).await?;

        *inner.state.lock() = SessionState::Joined;

        // Armed only after the join handshake so the initial offer is not
        // raced by a renegotiation.
        let inner_weak = Arc::downgrade(inner);
        publisher
            .peer_connection()
            .on_negotiation_needed(Box::new(move || {
                let inner_weak = inner_weak.clone();
                Box::pin(async move {
                    let Some(inner) = inner_weak.upgrade() else { return };
                    tokio::spawn(async move {
                        if let Err(e) = SessionInner::negotiate(&inner).await {
                            inner.report_negotiation_error(Role::Publisher, e);
                        }
                    });
                })
            }));

        debug!(sid, uid, "session joined");
        Ok(())
    }

    /// Release everything `join_inner` may have created. A fatal failure
    /// closes the session for good. Any other failure returns it to the
    /// unjoined state, unless the receive loop already tore it down;
    /// `Left` stays terminal.
    async fn abort_join(inner: &Arc<Self>, fatal: bool) {
        inner.fail_waiters();
        let transports = inner.transports.lock().take();
        if let Some((publisher, subscriber)) = transports {
            if let Err(e) = publisher.close().await {
                debug!(error = %e, "closing publisher after failed join");
            }
            if let Err(e) = subscriber.close().await {
                debug!(error = %e, "closing subscriber after failed join");
            }
        }
        let mut state = inner.state.lock();
        if fatal {
            *state = SessionState::Left;
        } else if *state == SessionState::Joining {
            *state = SessionState::Unjoined;
        }
    }

    /// Publisher renegotiation: offer out, answer awaited, applied.
    async fn negotiate(inner: &Arc<Self>) -> Result<()> {
        let _guard = inner.negotiation.lock().await;
        let publisher = inner
            .publisher()
            .ok_or(SignalingError::SessionState("no active session"))?;

        let result = Self::negotiate_inner(inner, &publisher).await;
        if result.is_err() {
            let _ = inner.answer_waiter.lock().take();
        }
        result
    }

    async fn negotiate_inner(inner: &Arc<Self>, publisher: &Arc<Transport>) -> Result<()> {
        let offer = publisher.peer_connection().create_offer(None).await?;
        publisher
            .peer_connection()
            .set_local_description(offer.clone())
            .await?;
        let description = serde_json::to_vec(&offer)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        *inner.answer_waiter.lock() = Some(reply_tx);

        inner
            .signal
            .send(SignalRequest {
                id: Uuid::new_v4().to_string(),
                payload: Some(signal_request::Payload::Description(description)),
            })
            .await?;

        let answer = match reply_rx.await {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(SignalingError::StreamClosed),
        };
        publisher.set_remote_description(answer).await?;
        Ok(())
    }

    async fn recv_loop(inner: Arc<Self>, mut receiver: Box<dyn SignalReceiver>) {
        while let Some(reply) = receiver.recv().await {
            if let Err(e) = Self::dispatch(&inner, reply).await {
                error!(error = %e, "fatal signaling error, tearing down session");
                Self::teardown(&inner).await;
                return;
            }
        }
        debug!("signaling stream closed");
        inner.fail_waiters();
    }

    async fn dispatch(inner: &Arc<Self>, reply: SignalReply) -> Result<()> {
        let Some(payload) = reply.payload else {
            return Err(SignalingError::Protocol("empty signal reply".into()));
        };
        match payload {
            signal_reply::Payload::Join(join) => {
                let waiter = inner.join_waiter.lock().take().ok_or_else(|| {
                    SignalingError::Protocol("join reply with no outstanding join".into())
                })?;
                match serde_json::from_slice::<RTCSessionDescription>(&join.description) {
                    Ok(answer) => {
                        let _ = waiter.send(Ok(answer));
                        Ok(())
                    }
                    Err(e) => {
                        let msg = format!("malformed join answer: {e}");
                        let _ = waiter.send(Err(SignalingError::Protocol(msg.clone())));
                        Err(SignalingError::Protocol(msg))
                    }
                }
            }
            signal_reply::Payload::Description(bytes) => {
                let description: RTCSessionDescription = serde_json::from_slice(&bytes)
                    .map_err(|e| SignalingError::Protocol(format!("malformed description: {e}")))?;
                match description.sdp_type {
                    RTCSdpType::Offer => {
                        // Subscriber-side renegotiation initiated by the
                        // forwarding unit. Failures do not kill the stream.
                        if let Err(e) = Self::handle_remote_offer(inner, description).await {
                            inner.report_negotiation_error(Role::Subscriber, e);
                        }
                        Ok(())
                    }
                    RTCSdpType::Answer => {
                        let waiter = inner.answer_waiter.lock().take().ok_or_else(|| {
                            SignalingError::Protocol("answer with no outstanding offer".into())
                        })?;
                        let _ = waiter.send(Ok(description));
                        Ok(())
                    }
                    other => Err(SignalingError::Protocol(format!(
                        "unexpected sdp type: {other}"
                    ))),
                }
            }
            signal_reply::Payload::Trickle(t) => {
                let target = trickle::Target::try_from(t.target).map_err(|_| {
                    SignalingError::Protocol(format!("unknown trickle target {}", t.target))
                })?;
                let init: RTCIceCandidateInit = serde_json::from_str(&t.init)
                    .map_err(|e| SignalingError::Protocol(format!("malformed candidate: {e}")))?;
                let role = Role::from_target(target);
                let Some(transport) = inner.transport(role) else {
                    debug!(role = %role, "dropping candidate, no active session");
                    return Ok(());
                };
                if let Err(e) = transport.add_remote_candidate(init).await {
                    warn!(role = %role, error = %e, "failed to apply remote candidate");
                }
                Ok(())
            }
            signal_reply::Payload::IceConnectionState(state) => {
                debug!(state = %state, "forwarding unit ice state");
                Ok(())
            }
            signal_reply::Payload::Error(message) => Err(SignalingError::Protocol(format!(
                "forwarding unit error: {message}"
            ))),
        }
    }

    async fn handle_remote_offer(inner: &Arc<Self>, offer: RTCSessionDescription) -> Result<()> {
        let subscriber = inner
            .subscriber()
            .ok_or(SignalingError::SessionState("no active session"))?;
        subscriber.set_remote_description(offer).await?;
        let answer = subscriber.peer_connection().create_answer(None).await?;
        subscriber
            .peer_connection()
            .set_local_description(answer.clone())
            .await?;
        let description = serde_json::to_vec(&answer)?;
        inner
            .signal
            .send(SignalRequest {
                id: String::new(),
                payload: Some(signal_request::Payload::Description(description)),
            })
            .await
    }

    /// Fatal teardown after a protocol violation. The session is left
    /// permanently; callers observe `SessionState` errors from then on.
    async fn teardown(inner: &Arc<Self>) {
        inner.fail_waiters();
        let transports = inner.transports.lock().take();
        *inner.state.lock() = SessionState::Left;
        if let Some((publisher, subscriber)) = transports {
            if let Err(e) = publisher.close().await {
                debug!(error = %e, "closing publisher on teardown");
            }
            if let Err(e) = subscriber.close().await {
                debug!(error = %e, "closing subscriber on teardown");
            }
        }
    }
}
