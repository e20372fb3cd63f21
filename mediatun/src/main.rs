//! Media-tunnel ingestion gateway.
//!
//! Binds one UDP listener per media kind, routes RTP/RTCP into per-SSRC
//! pipelines, and republishes resolved streams into a remote forwarding
//! unit over gRPC signaling.

mod logging;
mod transcode;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use mediatun_gateway::{
    ClientManager, GatewayConfig, IngestRouter, MediaKind, PeerManager, PipelineRegistry,
    UdpListener,
};
use mediatun_signal::{GrpcConnector, SignalConnector};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::transcode::PassthroughFactory;

#[derive(Parser, Debug)]
#[command(name = "mediatun", about = "RTP/RTCP to WebRTC ingestion gateway")]
struct Args {
    /// UDP address for video RTP/RTCP ingress.
    #[arg(long, env = "MEDIATUN_VIDEO_ADDR", default_value = "0.0.0.0:5000")]
    video_addr: SocketAddr,

    /// UDP address for audio RTP/RTCP ingress.
    #[arg(long, env = "MEDIATUN_AUDIO_ADDR", default_value = "0.0.0.0:5001")]
    audio_addr: SocketAddr,

    /// gRPC endpoint of the forwarding unit.
    #[arg(long, env = "MEDIATUN_SFU_ENDPOINT", default_value = "http://127.0.0.1:50051")]
    sfu_endpoint: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "MEDIATUN_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit JSON logs instead of the pretty format.
    #[arg(long, env = "MEDIATUN_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_logging(&args.log_level, args.log_json)?;

    let config = GatewayConfig::default();
    let registry = Arc::new(PipelineRegistry::new());
    let peers = PeerManager::new(&config, Arc::clone(&registry));
    let connector: Arc<dyn SignalConnector> =
        Arc::new(GrpcConnector::new(args.sfu_endpoint.clone()));
    let clients = ClientManager::new(&config, connector);

    let shutdown = CancellationToken::new();
    peers.start(&config, shutdown.clone());
    clients.start(&config, shutdown.clone());

    let video = UdpListener::bind(args.video_addr).await?;
    let audio = UdpListener::bind(args.audio_addr).await?;

    let video_router = Arc::new(IngestRouter::new(
        Arc::clone(&peers),
        Arc::clone(&clients),
        Arc::clone(&registry),
        Arc::new(PassthroughFactory::new(MediaKind::Video)),
        video.sink(),
    ));
    let audio_router = Arc::new(IngestRouter::new(
        Arc::clone(&peers),
        Arc::clone(&clients),
        Arc::clone(&registry),
        Arc::new(PassthroughFactory::new(MediaKind::Audio)),
        audio.sink(),
    ));

    info!(
        video = %video.local_addr(),
        audio = %audio.local_addr(),
        sfu = %args.sfu_endpoint,
        "gateway starting"
    );

    let video_task = tokio::spawn(video.run(video_router, shutdown.clone()));
    let audio_task = tokio::spawn(audio.run(audio_router, shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    shutdown.cancel();
    let _ = video_task.await;
    let _ = audio_task.await;
    clients.shutdown().await;

    Ok(())
}
