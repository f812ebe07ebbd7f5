//! The peer transport seam used by `SessionController`.
//!
//! Connection and channel callbacks are not exposed directly. They are turned
//! into `PeerEvent` values and pushed onto a queue the controller drains, so
//! every state transition happens in one place.

use crate::media::RemoteAudio;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::track::track_local::TrackLocal;

/// Label of the data channel the realtime endpoint listens on.
pub const EVENTS_CHANNEL_LABEL: &str = "oai-events";

/// Something that happened on a peer connection.
#[derive(Debug)]
pub enum PeerEvent {
    /// The data channel is open and ready for sending.
    ChannelOpen,
    /// A text payload arrived on the data channel.
    ChannelMessage(String),
    /// The remote side started sending audio.
    RemoteAudio(RemoteAudio),
    /// The data channel was closed.
    ChannelClosed,
    /// The underlying connection failed or was torn down.
    ConnectionLost,
}

pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;
pub type PeerEventReceiver = mpsc::UnboundedReceiver<PeerEvent>;

/// Failure inside the local peer connection machinery.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct PeerError(pub String);

impl From<anyhow::Error> for PeerError {
    fn from(err: anyhow::Error) -> Self {
        Self(format!("{:#}", err))
    }
}

/// One live peer connection with its data channel.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Generates the local offer, applies it, and returns its SDP text.
    async fn create_offer(&self) -> Result<String, PeerError>;
    /// Applies the remote answer SDP.
    async fn apply_answer(&self, sdp: String) -> Result<(), PeerError>;
    /// Writes one text payload to the data channel.
    async fn send_text(&self, payload: String) -> Result<(), PeerError>;
    /// Closes the connection, which also closes the channel and stops media.
    async fn close(&self);
}

/// Creates peer connections.
#[async_trait]
pub trait PeerFactory: Send + Sync {
    /// Opens a connection with a data channel named `label`, sending
    /// `local_track`, and reporting everything that happens to `events`.
    async fn open(
        &self,
        label: &str,
        local_track: Arc<dyn TrackLocal + Send + Sync>,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerLink>, PeerError>;
}
