//! `PeerFactory` backed by webrtc-rs.

use crate::{
    media::{PCMU_CLOCK_RATE, RemoteAudio},
    peer::{PeerError, PeerEvent, PeerEventSender, PeerFactory, PeerLink},
};
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_PCMU, MediaEngine};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::track::track_local::TrackLocal;

/// Opens webrtc-rs peer connections restricted to PCMU audio.
#[derive(Default)]
pub struct RtcPeerFactory {
    ice_servers: Vec<RTCIceServer>,
}

impl RtcPeerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ice_servers(ice_servers: Vec<RTCIceServer>) -> Self {
        Self { ice_servers }
    }

    async fn build_connection(&self) -> anyhow::Result<Arc<RTCPeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: RTCRtpCodecCapability {
                        mime_type: MIME_TYPE_PCMU.to_string(),
                        clock_rate: PCMU_CLOCK_RATE,
                        channels: 0,
                        sdp_fmtp_line: String::new(),
                        rtcp_feedback: vec![],
                    },
                    payload_type: 0,
                    ..Default::default()
                },
                RTPCodecType::Audio,
            )
            .context("Failed to register PCMU codec")?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .context("Failed to register interceptors")?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let pc = api
            .new_peer_connection(config)
            .await
            .context("Failed to create peer connection")?;
        Ok(Arc::new(pc))
    }
}

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    async fn open(
        &self,
        label: &str,
        local_track: Arc<dyn TrackLocal + Send + Sync>,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerLink>, PeerError> {
        let pc = self.build_connection().await?;

        let channel = pc
            .create_data_channel(label, None)
            .await
            .context("Failed to create data channel")?;

        let sender = pc
            .add_track(local_track)
            .await
            .context("Failed to add local audio track")?;

        // RTCP has to be read for the interceptors to run.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        register_handlers(&pc, &channel, events);
        info!(label, "Peer connection created");

        Ok(Arc::new(RtcPeerLink { pc, channel }))
    }
}

/// Routes connection callbacks into the event queue.
fn register_handlers(pc: &RTCPeerConnection, channel: &RTCDataChannel, events: PeerEventSender) {
    let tx = events.clone();
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        info!(ssrc = track.ssrc(), "Remote audio track received");
        let _ = tx.send(PeerEvent::RemoteAudio(RemoteAudio { track }));
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        info!(?state, "Peer connection state changed");
        if matches!(
            state,
            RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
        ) {
            let _ = tx.send(PeerEvent::ConnectionLost);
        }
        Box::pin(async {})
    }));

    let tx = events.clone();
    channel.on_open(Box::new(move || {
        debug!("Data channel open");
        let _ = tx.send(PeerEvent::ChannelOpen);
        Box::pin(async {})
    }));

    let tx = events.clone();
    channel.on_message(Box::new(move |msg: DataChannelMessage| {
        match String::from_utf8(msg.data.to_vec()) {
            Ok(text) => {
                let _ = tx.send(PeerEvent::ChannelMessage(text));
            }
            Err(e) => warn!(error = %e, "Dropping non UTF-8 channel payload"),
        }
        Box::pin(async {})
    }));

    channel.on_close(Box::new(move || {
        debug!("Data channel closed");
        let _ = events.send(PeerEvent::ChannelClosed);
        Box::pin(async {})
    }));
}

struct RtcPeerLink {
    pc: Arc<RTCPeerConnection>,
    channel: Arc<RTCDataChannel>,
}

#[async_trait]
impl PeerLink for RtcPeerLink {
    async fn create_offer(&self) -> Result<String, PeerError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .context("Failed to create offer")?;

        // The endpoint does not accept trickled candidates, so the offer is
        // only handed out once gathering has finished.
        let mut gathering_complete = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(offer)
            .await
            .context("Failed to set local description")?;
        let _ = gathering_complete.recv().await;

        let local = self
            .pc
            .local_description()
            .await
            .context("Local description missing after gathering")?;
        Ok(local.sdp)
    }

    async fn apply_answer(&self, sdp: String) -> Result<(), PeerError> {
        let answer = RTCSessionDescription::answer(sdp).context("Malformed answer")?;
        self.pc
            .set_remote_description(answer)
            .await
            .context("Failed to set remote description")?;
        Ok(())
    }

    async fn send_text(&self, payload: String) -> Result<(), PeerError> {
        self.channel
            .send_text(payload)
            .await
            .context("Failed to write to data channel")?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "Error while closing peer connection");
        }
    }
}
