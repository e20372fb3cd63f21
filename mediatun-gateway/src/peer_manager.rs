//! Sender, source, and identity bookkeeping.
//!
//! [`PeerManager`] tracks which network addresses send which SSRCs, binds
//! SSRCs to their CNAME identities, accumulates per-source bitrate, and
//! evicts everything that goes silent. One lock guards both maps; it is
//! never held across pipeline teardown.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::pipeline::{PipelineHandle, PipelineRegistry};
use crate::types::{CName, Ssrc};

struct Peer {
    /// Last time each SSRC was seen from this address.
    ssrcs: HashMap<Ssrc, Instant>,
}

struct Source {
    /// Count of distinct peers with a live mapping to this SSRC.
    peer_count: usize,
    cname: Option<CName>,
    /// Bytes accumulated in the current reporting window.
    bytes: u64,
    pipeline: Option<PipelineHandle>,
}

#[derive(Default)]
struct State {
    peers: HashMap<SocketAddr, Peer>,
    sources: HashMap<Ssrc, Source>,
}

/// Point-in-time view of a tracked source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub peer_count: usize,
    pub cname: Option<CName>,
    pub pipeline: Option<PipelineHandle>,
    /// Bytes accumulated in the current reporting window.
    pub bytes: u64,
}

pub struct PeerManager {
    state: parking_lot::Mutex<State>,
    registry: Arc<PipelineRegistry>,
    peer_timeout: Duration,
}

impl PeerManager {
    pub fn new(config: &GatewayConfig, registry: Arc<PipelineRegistry>) -> Arc<Self> {
        Arc::new(Self {
            state: parking_lot::Mutex::new(State::default()),
            registry,
            peer_timeout: config.peer_timeout,
        })
    }

    /// Spawn the eviction and bitrate reporting timers; both stop when
    /// `shutdown` is cancelled.
    pub fn start(self: &Arc<Self>, config: &GatewayConfig, shutdown: CancellationToken) {
        let manager = Arc::clone(self);
        let token = shutdown.clone();
        let sweep_interval = config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    () = token.cancelled() => return,
                    _ = ticker.tick() => {
                        let removed = manager.sweep().await;
                        if removed > 0 {
                            debug!(removed, "evicted idle mappings");
                        }
                    }
                }
            }
        });

        let manager = Arc::clone(self);
        let stats_interval = config.stats_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(stats_interval);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => return,
                    _ = ticker.tick() => manager.report_bitrates(stats_interval),
                }
            }
        });
    }

    /// Refresh liveness for a (peer, ssrc) pair and accumulate bitrate.
    /// The source's peer count grows only on the first observation of the
    /// pair.
    pub fn mark_received(&self, addr: SocketAddr, ssrc: Ssrc, bytes: usize) {
        self.observe(addr, ssrc, bytes as u64);
    }

    /// Liveness-only refresh for control traffic; nothing is added to the
    /// bitrate accumulator.
    pub fn refresh(&self, addr: SocketAddr, ssrc: Ssrc) {
        self.observe(addr, ssrc, 0);
    }

    fn observe(&self, addr: SocketAddr, ssrc: Ssrc, bytes: u64) {
        let now = Instant::now();
        let state = &mut *self.state.lock();
        let peer = state
            .peers
            .entry(addr)
            .or_insert_with(|| Peer { ssrcs: HashMap::new() });
        let newly_tracked = peer.ssrcs.insert(ssrc, now).is_none();
        let source = state.sources.entry(ssrc).or_insert_with(|| Source {
            peer_count: 0,
            cname: None,
            bytes: 0,
            pipeline: None,
        });
        if newly_tracked {
            source.peer_count += 1;
            debug!(ssrc = %ssrc, addr = %addr, peers = source.peer_count, "tracking sender");
        }
        source.bytes += bytes;
    }

    /// Bind an identity to a source. First assignment binds; a differing
    /// later value rebinds with a warning. Untracked SSRCs are ignored.
    pub fn set_cname(&self, ssrc: Ssrc, cname: CName) {
        let mut state = self.state.lock();
        match state.sources.get_mut(&ssrc) {
            Some(source) => match &source.cname {
                None => {
                    info!(ssrc = %ssrc, cname = %cname, "identity bound");
                    source.cname = Some(cname);
                }
                Some(existing) if *existing != cname => {
                    warn!(ssrc = %ssrc, old = %existing, new = %cname, "identity rebound");
                    source.cname = Some(cname);
                }
                Some(_) => {}
            },
            None => debug!(ssrc = %ssrc, cname = %cname, "identity for untracked source"),
        }
    }

    pub fn cname(&self, ssrc: Ssrc) -> Option<CName> {
        self.state
            .lock()
            .sources
            .get(&ssrc)
            .and_then(|s| s.cname.clone())
    }

    pub fn pipeline(&self, ssrc: Ssrc) -> Option<PipelineHandle> {
        self.state
            .lock()
            .sources
            .get(&ssrc)
            .and_then(|s| s.pipeline)
    }

    /// Install `handle` as the pipeline for `ssrc`. Returns a handle the
    /// caller must close instead of keeping: its own, when another
    /// pipeline got there first or the source vanished.
    pub fn install_pipeline(&self, ssrc: Ssrc, handle: PipelineHandle) -> Option<PipelineHandle> {
        let mut state = self.state.lock();
        match state.sources.get_mut(&ssrc) {
            Some(source) => {
                if source.pipeline.is_some() {
                    Some(handle)
                } else {
                    source.pipeline = Some(handle);
                    None
                }
            }
            None => Some(handle),
        }
    }

    /// Current non-expired fan-out set for an SSRC. Expired mappings are
    /// filtered here even if the sweep has not run yet.
    pub fn peers_for_ssrc(&self, ssrc: Ssrc) -> Vec<SocketAddr> {
        let now = Instant::now();
        let state = self.state.lock();
        state
            .peers
            .iter()
            .filter_map(|(addr, peer)| {
                peer.ssrcs
                    .get(&ssrc)
                    .filter(|seen| now.duration_since(**seen) < self.peer_timeout)
                    .map(|_| *addr)
            })
            .collect()
    }

    pub fn source(&self, ssrc: Ssrc) -> Option<SourceInfo> {
        let state = self.state.lock();
        state.sources.get(&ssrc).map(|s| SourceInfo {
            peer_count: s.peer_count,
            cname: s.cname.clone(),
            pipeline: s.pipeline,
            bytes: s.bytes,
        })
    }

    /// Evict every (peer, ssrc) mapping idle past the timeout; returns
    /// the number of mappings removed. Sources that lose their last peer
    /// are deleted and their pipelines closed after the lock is released.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0usize;
        let mut dead_pipelines = Vec::new();
        {
            let state = &mut *self.state.lock();
            let State { peers, sources } = state;
            peers.retain(|addr, peer| {
                peer.ssrcs.retain(|ssrc, seen| {
                    if now.duration_since(*seen) < self.peer_timeout {
                        return true;
                    }
                    removed += 1;
                    if let Some(source) = sources.get_mut(ssrc) {
                        source.peer_count = source.peer_count.saturating_sub(1);
                        if source.peer_count == 0 {
                            if let Some(source) = sources.remove(ssrc) {
                                if let Some(handle) = source.pipeline {
                                    dead_pipelines.push(handle);
                                }
                            }
                            debug!(ssrc = %ssrc, "source removed");
                        }
                    }
                    false
                });
                if peer.ssrcs.is_empty() {
                    debug!(addr = %addr, "peer removed");
                    false
                } else {
                    true
                }
            });
        }
        for handle in dead_pipelines {
            if let Some(pipeline) = self.registry.remove(handle) {
                pipeline.close().await;
            }
        }
        removed
    }

    /// Tumbling-window bitrate report: log each source's rate for the
    /// elapsed window, then reset the accumulator.
    fn report_bitrates(&self, interval: Duration) {
        let secs = interval.as_secs_f64();
        let mut state = self.state.lock();
        for (ssrc, source) in &mut state.sources {
            let bitrate = (source.bytes * 8) as f64 / secs;
            info!(
                ssrc = %ssrc,
                bitrate_bps = bitrate as u64,
                peers = source.peer_count,
                "source bitrate"
            );
            source.bytes = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::error::Result;
    use crate::pipeline::Pipeline;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn manager(peer_timeout: Duration) -> (Arc<PeerManager>, Arc<PipelineRegistry>) {
        let config = GatewayConfig {
            peer_timeout,
            ..Default::default()
        };
        let registry = Arc::new(PipelineRegistry::new());
        (PeerManager::new(&config, Arc::clone(&registry)), registry)
    }

    struct FlaggedPipeline {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Pipeline for FlaggedPipeline {
        async fn write_rtp(&self, _packet: Bytes) -> Result<()> {
            Ok(())
        }
        async fn write_rtcp(&self, _packet: Bytes) -> Result<()> {
            Ok(())
        }
        async fn close(&self) {
            self.closed.store(true, Ordering::Release);
        }
    }

    #[test]
    fn peer_count_tracks_distinct_peers() {
        let (manager, _registry) = manager(Duration::from_secs(30));
        let ssrc = Ssrc(1000);

        manager.mark_received(addr(1), ssrc, 100);
        manager.mark_received(addr(1), ssrc, 100);
        assert_eq!(manager.source(ssrc).unwrap().peer_count, 1);

        manager.mark_received(addr(2), ssrc, 100);
        assert_eq!(manager.source(ssrc).unwrap().peer_count, 2);
        assert_eq!(manager.peers_for_ssrc(ssrc).len(), 2);
    }

    #[test]
    fn refresh_keeps_liveness_without_bitrate() {
        let (manager, _registry) = manager(Duration::from_secs(30));
        let ssrc = Ssrc(11);

        manager.refresh(addr(1), ssrc);
        let source = manager.source(ssrc).unwrap();
        assert_eq!(source.peer_count, 1);
        assert_eq!(source.bytes, 0);

        manager.mark_received(addr(1), ssrc, 120);
        manager.refresh(addr(1), ssrc);
        assert_eq!(manager.source(ssrc).unwrap().bytes, 120);
        assert_eq!(manager.source(ssrc).unwrap().peer_count, 1);
    }

    #[tokio::test]
    async fn sweep_twice_is_noop_second_time() {
        let (manager, _registry) = manager(Duration::from_millis(10));
        manager.mark_received(addr(1), Ssrc(1), 10);
        manager.mark_received(addr(2), Ssrc(1), 10);
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(manager.sweep().await, 2);
        assert!(manager.source(Ssrc(1)).is_none());
        assert_eq!(manager.sweep().await, 0);
    }

    #[tokio::test]
    async fn expired_mapping_excluded_from_fanout_before_sweep() {
        let (manager, _registry) = manager(Duration::from_millis(10));
        let ssrc = Ssrc(7);
        manager.mark_received(addr(1), ssrc, 10);
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Source record still exists; the fan-out must be empty anyway.
        assert!(manager.source(ssrc).is_some());
        assert!(manager.peers_for_ssrc(ssrc).is_empty());
    }

    #[test]
    fn cname_binds_once_and_rebinds_on_change() {
        let (manager, _registry) = manager(Duration::from_secs(30));
        let ssrc = Ssrc(42);

        // Untracked: ignored.
        manager.set_cname(ssrc, CName::from("alice"));
        assert!(manager.source(ssrc).is_none());

        manager.mark_received(addr(1), ssrc, 10);
        manager.set_cname(ssrc, CName::from("alice"));
        assert_eq!(manager.cname(ssrc), Some(CName::from("alice")));

        manager.set_cname(ssrc, CName::from("bob"));
        assert_eq!(manager.cname(ssrc), Some(CName::from("bob")));
    }

    #[test]
    fn install_pipeline_loser_gets_own_handle_back() {
        let (manager, registry) = manager(Duration::from_secs(30));
        let ssrc = Ssrc(5);
        manager.mark_received(addr(1), ssrc, 10);

        let winner = registry.insert(Arc::new(FlaggedPipeline {
            closed: Arc::new(AtomicBool::new(false)),
        }));
        let loser = registry.insert(Arc::new(FlaggedPipeline {
            closed: Arc::new(AtomicBool::new(false)),
        }));

        assert_eq!(manager.install_pipeline(ssrc, winner), None);
        assert_eq!(manager.install_pipeline(ssrc, loser), Some(loser));
        assert_eq!(manager.pipeline(ssrc), Some(winner));

        // No source at all: handle comes straight back.
        assert_eq!(manager.install_pipeline(Ssrc(9999), winner), Some(winner));
    }

    #[tokio::test]
    async fn sweep_closes_pipeline_of_dead_source() {
        let (manager, registry) = manager(Duration::from_millis(10));
        let ssrc = Ssrc(3000);
        manager.mark_received(addr(1), ssrc, 10);

        let closed = Arc::new(AtomicBool::new(false));
        let handle = registry.insert(Arc::new(FlaggedPipeline {
            closed: Arc::clone(&closed),
        }));
        assert_eq!(manager.install_pipeline(ssrc, handle), None);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(manager.sweep().await, 1);

        assert!(closed.load(Ordering::Acquire));
        assert!(registry.is_empty());
        assert!(manager.peers_for_ssrc(ssrc).is_empty());
    }
}
