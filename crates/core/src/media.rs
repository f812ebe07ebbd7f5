//! Media seams: local capture and remote playback.
//!
//! The core never touches audio devices itself. A `MediaCapture` hands it a
//! local track to attach to the peer connection, and a `PlaybackSink` is
//! given the remote track to render.

use crate::error::MediaAcquisitionError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use webrtc::api::media_engine::MIME_TYPE_PCMU;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

/// Sample rate of the G.711 codec negotiated for both directions.
pub const PCMU_CLOCK_RATE: u32 = 8000;

/// Creates a mono PCMU sample track for the given stream id.
pub fn pcmu_track(stream_id: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_PCMU.to_string(),
            clock_rate: PCMU_CLOCK_RATE,
            channels: 0,
            ..Default::default()
        },
        "audio".to_string(),
        stream_id.to_string(),
    ))
}

type ReleaseHook = Box<dyn FnOnce() + Send + Sync>;

/// A captured microphone track.
///
/// The release hook runs exactly once, when the value is dropped.
pub struct LocalAudio {
    track: Arc<dyn TrackLocal + Send + Sync>,
    on_release: Option<ReleaseHook>,
}

impl LocalAudio {
    pub fn new(track: Arc<dyn TrackLocal + Send + Sync>) -> Self {
        Self {
            track,
            on_release: None,
        }
    }

    /// Registers the action that stops the underlying capture.
    pub fn with_release(mut self, hook: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_release = Some(Box::new(hook));
        self
    }

    pub fn track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.track)
    }
}

impl Drop for LocalAudio {
    fn drop(&mut self) {
        if let Some(hook) = self.on_release.take() {
            hook();
        }
    }
}

impl fmt::Debug for LocalAudio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalAudio")
            .field("track_id", &self.track.id())
            .field("stream_id", &self.track.stream_id())
            .finish()
    }
}

/// The inbound audio stream from the remote model.
#[derive(Clone)]
pub struct RemoteAudio {
    pub track: Arc<TrackRemote>,
}

impl fmt::Debug for RemoteAudio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteAudio")
            .field("ssrc", &self.track.ssrc())
            .finish()
    }
}

/// Source of the learner's microphone audio.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    async fn acquire(&self) -> Result<LocalAudio, MediaAcquisitionError>;
}

/// Renders the remote audio stream for the Active lifetime of a session.
pub trait PlaybackSink: Send + Sync {
    fn attach(&self, remote: RemoteAudio);
    fn detach(&self);
}

/// A sink that drops remote audio, for text-only callers.
pub struct SilentPlayback;

impl PlaybackSink for SilentPlayback {
    fn attach(&self, remote: RemoteAudio) {
        tracing::debug!(?remote, "Remote audio ignored by silent playback");
    }

    fn detach(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_release_hook_runs_once_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let audio = LocalAudio::new(pcmu_track("test")).with_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(audio);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pcmu_track_identity() {
        let track = pcmu_track("tutor-mic");
        assert_eq!(track.id(), "audio");
        assert_eq!(track.stream_id(), "tutor-mic");
    }
}
