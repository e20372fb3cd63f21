//! Passthrough transcode stage.
//!
//! Forwards RTP payloads downstream as fixed-duration samples without
//! decoding. A real transcoder slots in behind the same pipeline traits;
//! this stage exists so the gateway runs end to end without one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use mediatun_gateway::error::GatewayError;
use mediatun_gateway::pipeline::{Pipeline, PipelineFactory, PipelineSink};
use mediatun_gateway::types::{MediaKind, Ssrc};
use mediatun_gateway::Result;
use tracing::debug;
use webrtc::media::Sample;
use webrtc::rtp;
use webrtc::util::Unmarshal;

const VIDEO_SAMPLE_DURATION: Duration = Duration::from_millis(33);
const AUDIO_SAMPLE_DURATION: Duration = Duration::from_millis(20);

pub struct PassthroughPipeline {
    ssrc: Ssrc,
    kind: MediaKind,
    sink: Arc<dyn PipelineSink>,
    sample_duration: Duration,
    closed: AtomicBool,
}

#[async_trait]
impl Pipeline for PassthroughPipeline {
    async fn write_rtp(&self, packet: Bytes) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut buf = &packet[..];
        let parsed = rtp::packet::Packet::unmarshal(&mut buf)
            .map_err(|e| GatewayError::MalformedPacket(e.to_string()))?;
        if parsed.payload.is_empty() {
            return Ok(());
        }
        let sample = Sample {
            data: parsed.payload,
            duration: self.sample_duration,
            ..Default::default()
        };
        self.sink.deliver_sample(self.ssrc, self.kind, sample).await;
        Ok(())
    }

    /// Nothing to steer without a decoder; feedback is accepted and
    /// dropped.
    async fn write_rtcp(&self, _packet: Bytes) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        debug!(ssrc = %self.ssrc, kind = %self.kind, "passthrough pipeline closed");
    }
}

pub struct PassthroughFactory {
    kind: MediaKind,
}

impl PassthroughFactory {
    pub fn new(kind: MediaKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl PipelineFactory for PassthroughFactory {
    async fn create(&self, ssrc: Ssrc, sink: Arc<dyn PipelineSink>) -> Result<Arc<dyn Pipeline>> {
        let sample_duration = match self.kind {
            MediaKind::Video => VIDEO_SAMPLE_DURATION,
            MediaKind::Audio => AUDIO_SAMPLE_DURATION,
        };
        Ok(Arc::new(PassthroughPipeline {
            ssrc,
            kind: self.kind,
            sink,
            sample_duration,
            closed: AtomicBool::new(false),
        }))
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use webrtc::util::Marshal;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        samples: Mutex<Vec<(Ssrc, MediaKind, Sample)>>,
    }

    #[async_trait]
    impl PipelineSink for RecordingSink {
        async fn deliver_sample(&self, ssrc: Ssrc, kind: MediaKind, sample: Sample) {
            self.samples.lock().push((ssrc, kind, sample));
        }
        async fn deliver_rtcp(&self, _ssrc: Ssrc, _packet: Bytes) {}
    }

    fn rtp_bytes(payload: &'static [u8]) -> Bytes {
        let packet = rtp::packet::Packet {
            header: rtp::header::Header {
                version: 2,
                payload_type: 96,
                ssrc: 77,
                ..Default::default()
            },
            payload: Bytes::from_static(payload),
        };
        packet.marshal().unwrap()
    }

    #[tokio::test]
    async fn forwards_payload_as_sample() {
        let sink = Arc::new(RecordingSink::default());
        let factory = PassthroughFactory::new(MediaKind::Video);
        let pipeline = factory
            .create(Ssrc(77), Arc::clone(&sink) as Arc<dyn PipelineSink>)
            .await
            .unwrap();

        pipeline.write_rtp(rtp_bytes(b"frame")).await.unwrap();

        let samples = sink.samples.lock();
        assert_eq!(samples.len(), 1);
        let (ssrc, kind, sample) = &samples[0];
        assert_eq!(*ssrc, Ssrc(77));
        assert_eq!(*kind, MediaKind::Video);
        assert_eq!(sample.data, Bytes::from_static(b"frame"));
        assert_eq!(sample.duration, VIDEO_SAMPLE_DURATION);
    }

    #[tokio::test]
    async fn closed_pipeline_drops_input() {
        let sink = Arc::new(RecordingSink::default());
        let factory = PassthroughFactory::new(MediaKind::Audio);
        let pipeline = factory
            .create(Ssrc(5), Arc::clone(&sink) as Arc<dyn PipelineSink>)
            .await
            .unwrap();

        pipeline.close().await;
        pipeline.write_rtp(rtp_bytes(b"late")).await.unwrap();
        assert!(sink.samples.lock().is_empty());
    }

    #[tokio::test]
    async fn malformed_rtp_is_an_error() {
        let sink = Arc::new(RecordingSink::default());
        let factory = PassthroughFactory::new(MediaKind::Video);
        let pipeline = factory
            .create(Ssrc(1), Arc::clone(&sink) as Arc<dyn PipelineSink>)
            .await
            .unwrap();

        assert!(pipeline
            .write_rtp(Bytes::from_static(&[0x00]))
            .await
            .is_err());
    }
}
