//! Transcode pipeline boundary.
//!
//! The pipeline is an external collaborator: it consumes raw RTP and RTCP
//! feedback for one SSRC and emits decoded samples plus RTCP of its own.
//! The gateway only sees the traits here; running pipelines live in a
//! process-wide [`PipelineRegistry`] keyed by opaque handles so nothing
//! else holds a live reference.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use webrtc::media::Sample;

use crate::error::Result;
use crate::types::{MediaKind, Ssrc};

/// Opaque handle to a registered pipeline. Handles are never reused
/// before their removal completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(u64);

impl fmt::Display for PipelineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Output side of a pipeline: where decoded samples and generated RTCP
/// go. Implemented by the router.
#[async_trait]
pub trait PipelineSink: Send + Sync {
    async fn deliver_sample(&self, ssrc: Ssrc, kind: MediaKind, sample: Sample);
    async fn deliver_rtcp(&self, ssrc: Ssrc, packet: Bytes);
}

/// Input side of a pipeline.
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn write_rtp(&self, packet: Bytes) -> Result<()>;
    async fn write_rtcp(&self, packet: Bytes) -> Result<()>;
    async fn close(&self);
}

/// Builds a pipeline for an SSRC, wired to `sink` for its outputs.
#[async_trait]
pub trait PipelineFactory: Send + Sync {
    async fn create(&self, ssrc: Ssrc, sink: Arc<dyn PipelineSink>) -> Result<Arc<dyn Pipeline>>;
}

/// Process-wide pipeline table.
pub struct PipelineRegistry {
    next: AtomicU64,
    pipelines: parking_lot::Mutex<HashMap<PipelineHandle, Arc<dyn Pipeline>>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            pipelines: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, pipeline: Arc<dyn Pipeline>) -> PipelineHandle {
        let handle = PipelineHandle(self.next.fetch_add(1, Ordering::Relaxed));
        self.pipelines.lock().insert(handle, pipeline);
        handle
    }

    pub fn get(&self, handle: PipelineHandle) -> Option<Arc<dyn Pipeline>> {
        self.pipelines.lock().get(&handle).cloned()
    }

    /// Remove a pipeline. Succeeds at most once per handle; later calls
    /// return `None`.
    pub fn remove(&self, handle: PipelineHandle) -> Option<Arc<dyn Pipeline>> {
        self.pipelines.lock().remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.pipelines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.lock().is_empty()
    }
}

impl Default for PipelineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullPipeline;

    #[async_trait]
    impl Pipeline for NullPipeline {
        async fn write_rtp(&self, _packet: Bytes) -> Result<()> {
            Ok(())
        }
        async fn write_rtcp(&self, _packet: Bytes) -> Result<()> {
            Ok(())
        }
        async fn close(&self) {}
    }

    #[test]
    fn handles_are_unique() {
        let registry = PipelineRegistry::new();
        let a = registry.insert(Arc::new(NullPipeline));
        let b = registry.insert(Arc::new(NullPipeline));
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn remove_succeeds_once() {
        let registry = PipelineRegistry::new();
        let handle = registry.insert(Arc::new(NullPipeline));
        assert!(registry.remove(handle).is_some());
        assert!(registry.remove(handle).is_none());
        assert!(registry.get(handle).is_none());
        assert!(registry.is_empty());
    }
}
