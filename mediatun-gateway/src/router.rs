//! Datagram classification and routing.
//!
//! [`IngestRouter`] is the single entry point for inbound datagrams on
//! one listener: it classifies RTP vs RTCP, keeps the peer manager
//! current, lazily creates pipelines, and implements the pipeline output
//! sink (sample delivery to clients, RTCP relay to senders). Transient
//! failures are logged and dropped; nothing here halts the read loop.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace, warn};
use webrtc::media::Sample;
use webrtc::rtcp;
use webrtc::rtcp::source_description::{SdesType, SourceDescription};
use webrtc::rtp;
use webrtc::util::Unmarshal;

use crate::client_manager::ClientManager;
use crate::peer_manager::PeerManager;
use crate::pipeline::{Pipeline, PipelineFactory, PipelineRegistry, PipelineSink};
use crate::types::{CName, MediaKind, Ssrc};

/// Sends raw bytes back out of the ingress socket.
#[async_trait]
pub trait DatagramSink: Send + Sync {
    async fn send_to(&self, payload: &[u8], addr: SocketAddr) -> crate::error::Result<()>;
}

/// RTCP payload types share the RTP header layout; RFC 5761 reserves
/// 64-95 on a muxed port.
fn is_rtcp(payload_type: u8) -> bool {
    (64..=95).contains(&payload_type)
}

pub struct IngestRouter {
    peers: Arc<PeerManager>,
    registry: Arc<PipelineRegistry>,
    factory: Arc<dyn PipelineFactory>,
    sink: Arc<RouterSink>,
}

impl IngestRouter {
    pub fn new(
        peers: Arc<PeerManager>,
        clients: Arc<ClientManager>,
        registry: Arc<PipelineRegistry>,
        factory: Arc<dyn PipelineFactory>,
        socket: Arc<dyn DatagramSink>,
    ) -> Self {
        let sink = Arc::new(RouterSink {
            peers: Arc::clone(&peers),
            clients,
            socket,
        });
        Self {
            peers,
            registry,
            factory,
            sink,
        }
    }

    /// Route one inbound datagram.
    pub async fn write(&self, addr: SocketAddr, datagram: &[u8]) {
        let mut buf = datagram;
        let header = match rtp::header::Header::unmarshal(&mut buf) {
            Ok(header) => header,
            Err(e) => {
                debug!(addr = %addr, error = %e, "dropping unparseable datagram");
                return;
            }
        };
        if is_rtcp(header.payload_type) {
            self.handle_rtcp(addr, datagram).await;
        } else {
            self.handle_rtp(addr, &header, datagram).await;
        }
    }

    /// RTP: refresh liveness and forward to the SSRC's pipeline. Packets
    /// arriving before identity resolution are dropped, not buffered;
    /// RTCP is expected promptly.
    async fn handle_rtp(&self, addr: SocketAddr, header: &rtp::header::Header, datagram: &[u8]) {
        let ssrc = Ssrc(header.ssrc);
        self.peers.mark_received(addr, ssrc, datagram.len());
        let Some(handle) = self.peers.pipeline(ssrc) else {
            trace!(ssrc = %ssrc, "dropping rtp before identity resolution");
            return;
        };
        let Some(pipeline) = self.registry.get(handle) else {
            return;
        };
        if let Err(e) = pipeline.write_rtp(Bytes::copy_from_slice(datagram)).await {
            warn!(ssrc = %ssrc, error = %e, "pipeline rejected rtp");
        }
    }

    /// RTCP: refresh liveness for every referenced SSRC, bind identities
    /// from SDES chunks, then feed the raw compound packet into each
    /// SSRC's pipeline, creating it lazily. Control traffic does not
    /// count toward the bitrate, and each SSRC is refreshed once per
    /// datagram however many packets of the compound reference it.
    async fn handle_rtcp(&self, addr: SocketAddr, datagram: &[u8]) {
        let mut buf = datagram;
        let packets = match rtcp::packet::unmarshal(&mut buf) {
            Ok(packets) => packets,
            Err(e) => {
                debug!(addr = %addr, error = %e, "dropping unparseable rtcp");
                return;
            }
        };

        let mut ssrcs: Vec<Ssrc> = Vec::new();
        for packet in &packets {
            for ssrc in packet.destination_ssrc() {
                let ssrc = Ssrc(ssrc);
                if !ssrcs.contains(&ssrc) {
                    self.peers.refresh(addr, ssrc);
                    ssrcs.push(ssrc);
                }
            }
        }
        for packet in &packets {
            if let Some(sdes) = packet.as_any().downcast_ref::<SourceDescription>() {
                for chunk in &sdes.chunks {
                    for item in &chunk.items {
                        if item.sdes_type == SdesType::SdesCname {
                            let cname = CName(String::from_utf8_lossy(&item.text).into_owned());
                            self.peers.set_cname(Ssrc(chunk.source), cname);
                        }
                    }
                }
            }
        }

        for ssrc in ssrcs {
            let Some(pipeline) = self.pipeline_for(ssrc).await else {
                continue;
            };
            if let Err(e) = pipeline.write_rtcp(Bytes::copy_from_slice(datagram)).await {
                warn!(ssrc = %ssrc, error = %e, "pipeline rejected rtcp");
            }
        }
    }

    /// Pipeline lookup with lazy creation. On a concurrent create the
    /// loser closes its own instance and adopts the winner's.
    async fn pipeline_for(&self, ssrc: Ssrc) -> Option<Arc<dyn Pipeline>> {
        if let Some(handle) = self.peers.pipeline(ssrc) {
            return self.registry.get(handle);
        }
        let sink = Arc::clone(&self.sink) as Arc<dyn PipelineSink>;
        let pipeline = match self.factory.create(ssrc, sink).await {
            Ok(pipeline) => pipeline,
            Err(e) => {
                warn!(ssrc = %ssrc, error = %e, "failed to create pipeline");
                return None;
            }
        };
        let handle = self.registry.insert(Arc::clone(&pipeline));
        if let Some(discard) = self.peers.install_pipeline(ssrc, handle) {
            if let Some(pipeline) = self.registry.remove(discard) {
                pipeline.close().await;
            }
            return self
                .peers
                .pipeline(ssrc)
                .and_then(|handle| self.registry.get(handle));
        }
        debug!(ssrc = %ssrc, handle = %handle, "pipeline created");
        Some(pipeline)
    }
}

/// Pipeline output sink backed by the managers: samples go to the bound
/// identity's client, RTCP fans out to the SSRC's live senders.
pub(crate) struct RouterSink {
    peers: Arc<PeerManager>,
    clients: Arc<ClientManager>,
    socket: Arc<dyn DatagramSink>,
}

#[async_trait]
impl PipelineSink for RouterSink {
    async fn deliver_sample(&self, ssrc: Ssrc, kind: MediaKind, sample: Sample) {
        let Some(cname) = self.peers.cname(ssrc) else {
            debug!(ssrc = %ssrc, "dropping sample, identity unresolved");
            return;
        };
        let client = match self.clients.get_or_create(&cname).await {
            Ok(client) => client,
            Err(e) => {
                warn!(cname = %cname, error = %e, "dropping sample, no client");
                return;
            }
        };
        if let Err(e) = client.write_sample(kind, &sample).await {
            warn!(cname = %cname, kind = %kind, error = %e, "failed to publish sample");
        }
    }

    async fn deliver_rtcp(&self, ssrc: Ssrc, packet: Bytes) {
        let peers = self.peers.peers_for_ssrc(ssrc);
        if peers.is_empty() {
            trace!(ssrc = %ssrc, "no live peers for rtcp relay");
            return;
        }
        for addr in peers {
            if let Err(e) = self.socket.send_to(&packet, addr).await {
                debug!(addr = %addr, error = %e, "rtcp relay failed");
            }
        }
    }
}
