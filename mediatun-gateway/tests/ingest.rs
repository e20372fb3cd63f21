//! End-to-end ingest routing tests: datagrams in, pipeline and client
//! state out. Signaling runs against a scripted forwarding unit over the
//! in-memory stream; everything stays in-process.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use mediatun_gateway::{
    CName, ClientManager, DatagramSink, GatewayConfig, IngestRouter, MediaKind, PeerManager,
    Pipeline, PipelineFactory, PipelineRegistry, PipelineSink, Ssrc,
};
use mediatun_proto::{signal_reply, signal_request, JoinReply, SignalReply};
use mediatun_signal::{channel_pair, ChannelRemote, SignalConnector, SignalReceiver, SignalSender};
use parking_lot::Mutex;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::receiver_report::ReceiverReport;
use webrtc::rtcp::reception_report::ReceptionReport;
use webrtc::rtcp::source_description::{
    SdesType, SourceDescription, SourceDescriptionChunk, SourceDescriptionItem,
};
use webrtc::rtp;
use webrtc::util::Marshal;

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

fn rtp_packet(ssrc: u32, seq: u16) -> Vec<u8> {
    let packet = rtp::packet::Packet {
        header: rtp::header::Header {
            version: 2,
            payload_type: 96,
            sequence_number: seq,
            timestamp: 1234,
            ssrc,
            ..Default::default()
        },
        payload: Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]),
    };
    packet.marshal().unwrap().to_vec()
}

fn rr_packet(ssrc: u32) -> Vec<u8> {
    let rr = ReceiverReport {
        ssrc: 1,
        reports: vec![ReceptionReport {
            ssrc,
            ..Default::default()
        }],
        ..Default::default()
    };
    rr.marshal().unwrap().to_vec()
}

fn sdes_packet(ssrc: u32, cname: &str) -> Vec<u8> {
    let sdes = SourceDescription {
        chunks: vec![SourceDescriptionChunk {
            source: ssrc,
            items: vec![SourceDescriptionItem {
                sdes_type: SdesType::SdesCname,
                text: Bytes::copy_from_slice(cname.as_bytes()),
            }],
        }],
    };
    sdes.marshal().unwrap().to_vec()
}

fn sample() -> Sample {
    Sample {
        data: Bytes::from_static(b"frame"),
        duration: Duration::from_millis(33),
        ..Default::default()
    }
}

#[derive(Default)]
struct PipelineLog {
    created: Mutex<Vec<Ssrc>>,
    rtp: Mutex<Vec<(Ssrc, Bytes)>>,
    rtcp: Mutex<Vec<(Ssrc, Bytes)>>,
    closed: Mutex<Vec<Ssrc>>,
    sinks: Mutex<Vec<Arc<dyn PipelineSink>>>,
}

struct FakePipeline {
    ssrc: Ssrc,
    log: Arc<PipelineLog>,
}

#[async_trait]
impl Pipeline for FakePipeline {
    async fn write_rtp(&self, packet: Bytes) -> mediatun_gateway::Result<()> {
        self.log.rtp.lock().push((self.ssrc, packet));
        Ok(())
    }
    async fn write_rtcp(&self, packet: Bytes) -> mediatun_gateway::Result<()> {
        self.log.rtcp.lock().push((self.ssrc, packet));
        Ok(())
    }
    async fn close(&self) {
        self.log.closed.lock().push(self.ssrc);
    }
}

struct FakeFactory {
    log: Arc<PipelineLog>,
}

#[async_trait]
impl PipelineFactory for FakeFactory {
    async fn create(
        &self,
        ssrc: Ssrc,
        sink: Arc<dyn PipelineSink>,
    ) -> mediatun_gateway::Result<Arc<dyn Pipeline>> {
        self.log.created.lock().push(ssrc);
        self.log.sinks.lock().push(sink);
        Ok(Arc::new(FakePipeline {
            ssrc,
            log: Arc::clone(&self.log),
        }))
    }
}

#[derive(Default)]
struct FakeSocket {
    sent: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
}

#[async_trait]
impl DatagramSink for FakeSocket {
    async fn send_to(&self, payload: &[u8], addr: SocketAddr) -> mediatun_gateway::Result<()> {
        self.sent.lock().push((addr, payload.to_vec()));
        Ok(())
    }
}

async fn new_pc() -> RTCPeerConnection {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs().unwrap();
    let api = APIBuilder::new().with_media_engine(media_engine).build();
    api.new_peer_connection(RTCConfiguration::default())
        .await
        .unwrap()
}

/// Forwarding unit that answers the join offer and every renegotiation
/// offer from one session peer connection.
fn spawn_unit(mut remote: ChannelRemote) {
    tokio::spawn(async move {
        let mut session: Option<RTCPeerConnection> = None;
        while let Some(request) = remote.requests.recv().await {
            let (offer, is_join) = match request.payload {
                Some(signal_request::Payload::Join(join)) => (
                    serde_json::from_slice::<RTCSessionDescription>(&join.description).unwrap(),
                    true,
                ),
                Some(signal_request::Payload::Description(bytes)) => {
                    let description: RTCSessionDescription =
                        serde_json::from_slice(&bytes).unwrap();
                    if description.sdp_type != RTCSdpType::Offer {
                        continue;
                    }
                    (description, false)
                }
                _ => continue,
            };
            if is_join {
                session = Some(new_pc().await);
            }
            let Some(pc) = &session else { continue };
            pc.set_remote_description(offer).await.unwrap();
            let answer = pc.create_answer(None).await.unwrap();
            pc.set_local_description(answer.clone()).await.unwrap();
            let description = serde_json::to_vec(&answer).unwrap();
            let payload = if is_join {
                signal_reply::Payload::Join(JoinReply { description })
            } else {
                signal_reply::Payload::Description(description)
            };
            if remote
                .replies
                .send(SignalReply {
                    id: request.id,
                    payload: Some(payload),
                })
                .is_err()
            {
                return;
            }
        }
    });
}

#[derive(Default)]
struct UnitConnector {
    connects: AtomicUsize,
}

#[async_trait]
impl SignalConnector for UnitConnector {
    async fn connect(
        &self,
    ) -> mediatun_signal::Result<(Arc<dyn SignalSender>, Box<dyn SignalReceiver>)> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver, remote) = channel_pair();
        spawn_unit(remote);
        Ok((sender, receiver))
    }
}

struct Harness {
    peers: Arc<PeerManager>,
    clients: Arc<ClientManager>,
    registry: Arc<PipelineRegistry>,
    router: IngestRouter,
    log: Arc<PipelineLog>,
    socket: Arc<FakeSocket>,
    connector: Arc<UnitConnector>,
}

fn harness(config: GatewayConfig) -> Harness {
    // Keep client transports off the network.
    let config = GatewayConfig {
        ice_servers: Vec::new(),
        ..config
    };
    let registry = Arc::new(PipelineRegistry::new());
    let peers = PeerManager::new(&config, Arc::clone(&registry));
    let connector = Arc::new(UnitConnector::default());
    let clients = ClientManager::new(
        &config,
        Arc::clone(&connector) as Arc<dyn SignalConnector>,
    );
    let log = Arc::new(PipelineLog::default());
    let socket = Arc::new(FakeSocket::default());
    let router = IngestRouter::new(
        Arc::clone(&peers),
        Arc::clone(&clients),
        Arc::clone(&registry),
        Arc::new(FakeFactory {
            log: Arc::clone(&log),
        }),
        Arc::clone(&socket) as Arc<dyn DatagramSink>,
    );
    Harness {
        peers,
        clients,
        registry,
        router,
        log,
        socket,
        connector,
    }
}

#[tokio::test]
async fn rtp_before_identity_is_dropped_then_forwarded() {
    let h = harness(GatewayConfig::default());
    let sender = addr(4000);
    let ssrc = Ssrc(1000);

    h.router.write(sender, &rtp_packet(1000, 1)).await;
    let source = h.peers.source(ssrc).unwrap();
    assert_eq!(source.peer_count, 1);
    assert_eq!(source.cname, None);
    assert!(h.log.created.lock().is_empty());
    assert!(h.log.rtp.lock().is_empty());

    h.router.write(sender, &sdes_packet(1000, "alice")).await;
    assert_eq!(h.peers.cname(ssrc), Some(CName::from("alice")));
    assert_eq!(h.log.created.lock().as_slice(), &[ssrc]);
    assert_eq!(h.log.rtcp.lock().len(), 1);

    h.router.write(sender, &rtp_packet(1000, 2)).await;
    let rtp = h.log.rtp.lock();
    assert_eq!(rtp.len(), 1);
    assert_eq!(rtp[0].0, ssrc);
    assert_eq!(rtp[0].1, Bytes::from(rtp_packet(1000, 2)));
}

#[tokio::test]
async fn rtcp_refreshes_liveness_without_bitrate() {
    let h = harness(GatewayConfig::default());
    let sender = addr(4010);
    let ssrc = Ssrc(1000);

    // Compound where two packets reference the same SSRC: one refresh,
    // nothing accumulated.
    let compound = [rr_packet(1000), sdes_packet(1000, "alice")].concat();
    h.router.write(sender, &compound).await;

    let source = h.peers.source(ssrc).unwrap();
    assert_eq!(source.peer_count, 1);
    assert_eq!(source.cname, Some(CName::from("alice")));
    assert_eq!(source.bytes, 0);

    // Media is what counts toward the bitrate window.
    let rtp = rtp_packet(1000, 1);
    h.router.write(sender, &rtp).await;
    assert_eq!(h.peers.source(ssrc).unwrap().bytes, rtp.len() as u64);
}

#[tokio::test]
async fn two_senders_one_source_one_client() {
    let h = harness(GatewayConfig::default());
    h.router.write(addr(4001), &sdes_packet(2000, "bob")).await;
    h.router.write(addr(4002), &sdes_packet(2000, "bob")).await;

    let source = h.peers.source(Ssrc(2000)).unwrap();
    assert_eq!(source.peer_count, 2);
    assert_eq!(source.cname, Some(CName::from("bob")));
    assert_eq!(h.log.created.lock().len(), 1);
    assert_eq!(h.registry.len(), 1);

    // Sample delivery resolves "bob" to exactly one downstream client.
    let sink = Arc::clone(&h.log.sinks.lock()[0]);
    sink.deliver_sample(Ssrc(2000), MediaKind::Video, sample())
        .await;
    sink.deliver_sample(Ssrc(2000), MediaKind::Audio, sample())
        .await;
    assert_eq!(h.clients.client_count().await, 1);
    assert_eq!(h.connector.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn silent_sender_evicts_source_and_closes_pipeline() {
    let h = harness(GatewayConfig {
        peer_timeout: Duration::from_millis(20),
        ..Default::default()
    });
    h.router.write(addr(4003), &sdes_packet(3000, "carol")).await;
    assert_eq!(h.registry.len(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.peers.sweep().await >= 1);

    assert!(h.peers.source(Ssrc(3000)).is_none());
    assert_eq!(h.log.closed.lock().as_slice(), &[Ssrc(3000)]);
    assert!(h.registry.is_empty());
    assert!(h.peers.peers_for_ssrc(Ssrc(3000)).is_empty());
}

#[tokio::test]
async fn rtcp_relay_fans_out_to_live_senders() {
    let h = harness(GatewayConfig::default());
    h.router.write(addr(4004), &sdes_packet(5000, "dave")).await;
    h.router.write(addr(4005), &sdes_packet(5000, "dave")).await;

    let sink = Arc::clone(&h.log.sinks.lock()[0]);
    sink.deliver_rtcp(Ssrc(5000), Bytes::from_static(b"feedback"))
        .await;

    let sent = h.socket.sent.lock();
    assert_eq!(sent.len(), 2);
    let addrs: Vec<_> = sent.iter().map(|(a, _)| *a).collect();
    assert!(addrs.contains(&addr(4004)));
    assert!(addrs.contains(&addr(4005)));
    assert!(sent.iter().all(|(_, payload)| payload == b"feedback"));
}

#[tokio::test]
async fn sample_for_unresolved_identity_is_dropped() {
    let h = harness(GatewayConfig::default());
    // RTCP without an SDES chunk: source tracked, pipeline created, but
    // no identity bound.
    h.router.write(addr(4006), &sdes_packet(6000, "erin")).await;

    let sink = Arc::clone(&h.log.sinks.lock()[0]);
    sink.deliver_sample(Ssrc(7777), MediaKind::Video, sample())
        .await;
    assert_eq!(h.clients.client_count().await, 0);
    assert_eq!(h.connector.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn concurrent_first_use_creates_single_client() {
    let h = harness(GatewayConfig::default());
    let mut handles = Vec::new();
    for _ in 0..5 {
        let clients = Arc::clone(&h.clients);
        handles.push(tokio::spawn(async move {
            clients.get_or_create(&CName::from("x")).await.unwrap()
        }));
    }
    let mut created = Vec::new();
    for handle in handles {
        created.push(handle.await.unwrap());
    }
    assert!(created.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(h.connector.connects.load(Ordering::SeqCst), 1);
    assert_eq!(h.clients.client_count().await, 1);
}

#[tokio::test]
async fn idle_client_is_evicted() {
    let h = harness(GatewayConfig {
        client_timeout: Duration::from_millis(20),
        ..Default::default()
    });
    h.clients.get_or_create(&CName::from("y")).await.unwrap();
    assert_eq!(h.clients.client_count().await, 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.clients.sweep_idle().await, 1);
    assert_eq!(h.clients.client_count().await, 0);
}

#[tokio::test]
async fn garbage_datagram_is_ignored() {
    let h = harness(GatewayConfig::default());
    h.router.write(addr(4007), &[0x00, 0x01]).await;
    h.router.write(addr(4007), &[]).await;
    assert!(h.log.created.lock().is_empty());
    assert!(h.socket.sent.lock().is_empty());
}
