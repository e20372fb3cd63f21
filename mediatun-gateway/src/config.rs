//! Gateway configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

/// Tunables for the ingestion gateway. Defaults are production values;
/// tests shrink the timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Silence timeout after which a (peer, ssrc) mapping is considered
    /// dead.
    pub peer_timeout: Duration,
    /// Interval between eviction sweeps.
    pub sweep_interval: Duration,
    /// Bitrate reporting interval; also the tumbling window width.
    pub stats_interval: Duration,
    /// Idle timeout after which an unused client is evicted.
    pub client_timeout: Duration,
    /// Interval between client idle sweeps.
    pub client_sweep_interval: Duration,
    /// STUN/TURN servers handed to every peer connection.
    pub ice_servers: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            peer_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            stats_interval: Duration::from_secs(2),
            client_timeout: Duration::from_secs(60),
            client_sweep_interval: Duration::from_secs(10),
            ice_servers: vec!["stun:stun.l.google.com:19302".to_owned()],
        }
    }
}

impl GatewayConfig {
    pub fn rtc_configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = GatewayConfig::default();
        assert!(config.peer_timeout > config.sweep_interval);
        assert!(config.client_timeout > config.client_sweep_interval);
        assert!(!config.ice_servers.is_empty());
    }
}
