//! Downstream publishing clients.
//!
//! One [`Client`] per resolved CNAME: a signaling session joined in
//! publish-only mode plus its video and audio tracks. Clients are created
//! lazily on first sample delivery and evicted after going idle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mediatun_signal::{SignalConnector, SignalingClient, SignalingError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::config::GatewayConfig;
use crate::error::Result;
use crate::types::{CName, MediaKind};

/// One published stream identity.
pub struct Client {
    session: SignalingClient,
    video: Arc<TrackLocalStaticSample>,
    audio: Arc<TrackLocalStaticSample>,
    last_used: parking_lot::Mutex<Instant>,
}

impl Client {
    pub async fn write_sample(&self, kind: MediaKind, sample: &Sample) -> Result<()> {
        let track = match kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
        };
        track.write_sample(sample).await?;
        Ok(())
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    fn idle_since(&self) -> Instant {
        *self.last_used.lock()
    }

    /// Leave the session; the transports close with it.
    pub async fn close(&self) -> Result<()> {
        self.session.leave().await?;
        Ok(())
    }
}

pub struct ClientManager {
    clients: tokio::sync::Mutex<HashMap<CName, Arc<Client>>>,
    connector: Arc<dyn SignalConnector>,
    rtc_config: RTCConfiguration,
    client_timeout: Duration,
}

impl ClientManager {
    pub fn new(config: &GatewayConfig, connector: Arc<dyn SignalConnector>) -> Arc<Self> {
        Arc::new(Self {
            clients: tokio::sync::Mutex::new(HashMap::new()),
            connector,
            rtc_config: config.rtc_configuration(),
            client_timeout: config.client_timeout,
        })
    }

    /// Spawn the idle sweep timer; stops when `shutdown` is cancelled.
    pub fn start(self: &Arc<Self>, config: &GatewayConfig, shutdown: CancellationToken) {
        let manager = Arc::clone(self);
        let interval = config.client_sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        let removed = manager.sweep_idle().await;
                        if removed > 0 {
                            debug!(removed, "evicted idle clients");
                        }
                    }
                }
            }
        });
    }

    /// Look up the client for `cname`, creating and joining it on first
    /// use. The map lock is held across creation so concurrent first
    /// users all observe the same client; creation is rare relative to
    /// lookups, so the contention is accepted.
    pub async fn get_or_create(&self, cname: &CName) -> Result<Arc<Client>> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(cname) {
            client.touch();
            return Ok(Arc::clone(client));
        }
        info!(cname = %cname, "publishing new stream");
        let client = self.create_client(cname).await?;
        clients.insert(cname.clone(), Arc::clone(&client));
        Ok(client)
    }

    async fn create_client(&self, cname: &CName) -> Result<Arc<Client>> {
        let (sender, receiver) = self.connector.connect().await?;
        let session = SignalingClient::new(self.rtc_config.clone(), sender, receiver);
        let uid = format!("mediatun-{}", Uuid::new_v4());
        session.join(cname.as_str(), &uid).await?;

        let video = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            cname.to_string(),
        ));
        let audio = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            cname.to_string(),
        ));

        let published = async {
            session
                .add_track(Arc::clone(&video) as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
            session
                .add_track(Arc::clone(&audio) as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
            Ok::<_, SignalingError>(())
        }
        .await;
        if let Err(e) = published {
            if let Err(leave) = session.leave().await {
                debug!(cname = %cname, error = %leave, "leaving after failed publish");
            }
            return Err(e.into());
        }

        Ok(Arc::new(Client {
            session,
            video,
            audio,
            last_used: parking_lot::Mutex::new(Instant::now()),
        }))
    }

    /// Remove clients idle past the timeout and close their sessions.
    /// Sessions are closed after the map lock is released.
    pub async fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(CName, Arc<Client>)> = {
            let mut clients = self.clients.lock().await;
            let dead: Vec<CName> = clients
                .iter()
                .filter(|(_, client)| {
                    now.duration_since(client.idle_since()) >= self.client_timeout
                })
                .map(|(cname, _)| cname.clone())
                .collect();
            dead.into_iter()
                .filter_map(|cname| clients.remove(&cname).map(|client| (cname, client)))
                .collect()
        };
        let removed = expired.len();
        for (cname, client) in expired {
            info!(cname = %cname, "evicting idle client");
            if let Err(e) = client.close().await {
                warn!(cname = %cname, error = %e, "failed to close idle client");
            }
        }
        removed
    }

    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Close every client. Used at process shutdown.
    pub async fn shutdown(&self) {
        let clients: Vec<(CName, Arc<Client>)> =
            self.clients.lock().await.drain().collect();
        for (cname, client) in clients {
            if let Err(e) = client.close().await {
                warn!(cname = %cname, error = %e, "failed to close client");
            }
        }
    }
}
