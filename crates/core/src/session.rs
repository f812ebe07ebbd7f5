//! Realtime Session Lifecycle
//!
//! `SessionController` owns one tutoring connection and moves it through
//! `Idle -> Negotiating -> Active -> Idle`. All transitions happen under one
//! state lock. Peer callbacks arrive as `PeerEvent`s on a queue drained by a
//! per-connection driver task, and every attempt carries a generation number
//! so results from a superseded attempt are discarded.

use crate::{
    error::{SessionError, SignalingError},
    media::{LocalAudio, MediaCapture, PlaybackSink, RemoteAudio},
    observer::TutorObserver,
    peer::{EVENTS_CHANNEL_LABEL, PeerEvent, PeerEventReceiver, PeerFactory, PeerLink},
    protocol::{MessageRouter, ProtocolEvent},
    signaling::Signaling,
};
use std::sync::Arc;
use tokio::{
    sync::{Mutex, MutexGuard, Notify, mpsc},
    task::JoinHandle,
};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

/// Where a tutoring connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection. A session can be started.
    Idle,
    /// Media acquired and the offer/answer exchange is in progress, or the
    /// data channel has not opened yet.
    Negotiating,
    /// The data channel is open and priming has been sent.
    Active,
}

/// The tutoring parameters for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub system_prompt: String,
    pub topic: String,
}

impl Session {
    pub fn new(system_prompt: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            topic: topic.into(),
        }
    }

    /// The priming instructions sent once the channel opens.
    pub fn instructions(&self) -> String {
        format!("{}\nТема: {}", self.system_prompt, self.topic)
    }
}

/// The external collaborators a controller drives.
pub struct SessionDeps {
    pub signaling: Arc<dyn Signaling>,
    pub peers: Arc<dyn PeerFactory>,
    pub media: Arc<dyn MediaCapture>,
    pub playback: Arc<dyn PlaybackSink>,
    pub observer: Arc<dyn TutorObserver>,
}


/// Resources held from the moment a start is reserved until the session
/// returns to Idle.
///
/// The microphone and peer are parked here as soon as they are acquired, so
/// `stop` can release them even while the offer/answer exchange is pending.
struct Connection {
    id: Uuid,
    session: Session,
    peer: Option<Arc<dyn PeerLink>>,
    // Held for its release-on-drop behaviour.
    audio: Option<LocalAudio>,
    // Remote audio that arrived before the channel opened.
    remote: Option<RemoteAudio>,
    cancel: Arc<Notify>,
    driver: Option<JoinHandle<()>>,
}

impl Connection {
    fn new(id: Uuid, session: Session) -> Self {
        Self {
            id,
            session,
            peer: None,
            audio: None,
            remote: None,
            cancel: Arc::new(Notify::new()),
            driver: None,
        }
    }
}

struct Inner {
    state: SessionState,
    generation: u64,
    connection: Option<Connection>,
}

impl Inner {
    /// The connection reserved by `generation`, unless it has been stopped.
    fn pending(&mut self, generation: u64) -> Option<&mut Connection> {
        if self.generation == generation {
            self.connection.as_mut()
        } else {
            None
        }
    }
}

struct Shared {
    deps: SessionDeps,
    inner: Mutex<Inner>,
}

/// Owns the realtime connection and exposes the session entry points.
pub struct SessionController {
    shared: Arc<Shared>,
}

impl SessionController {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            shared: Arc::new(Shared {
                deps,
                inner: Mutex::new(Inner {
                    state: SessionState::Idle,
                    generation: 0,
                    connection: None,
                }),
            }),
        }
    }

    pub async fn state(&self) -> SessionState {
        self.shared.inner.lock().await.state
    }

    /// The parameters of the current connection, if any.
    pub async fn session(&self) -> Option<Session> {
        let inner = self.shared.inner.lock().await;
        inner.connection.as_ref().map(|c| c.session.clone())
    }

    /// Acquires the microphone, negotiates a peer connection and waits for
    /// the data channel in the background.
    ///
    /// Returns once the remote description is applied; the session becomes
    /// Active when the channel opens. On failure every acquired resource is
    /// released and the state returns to Idle. If `stop` is called while
    /// negotiating, the attempt is abandoned and `Ok(())` is returned.
    pub async fn start(&self, api_key: &str, session: Session) -> Result<(), SessionError> {
        if api_key.is_empty() {
            warn!("Refusing to start a session without an API key");
            return Err(SessionError::MissingApiKey);
        }

        let id = Uuid::new_v4();
        let span = info_span!("tutor_session", session_id = %id, topic = %session.topic);
        let (generation, cancel) = {
            let mut inner = self.shared.inner.lock().await;
            if inner.state != SessionState::Idle {
                return Err(SessionError::AlreadyStarted);
            }
            let connection = Connection::new(id, session);
            let cancel = Arc::clone(&connection.cancel);
            inner.state = SessionState::Negotiating;
            inner.generation += 1;
            inner.connection = Some(connection);
            (inner.generation, cancel)
        };
        self.shared
            .deps
            .observer
            .on_state_changed(SessionState::Negotiating);

        let outcome = tokio::select! {
            outcome = self.shared.negotiate(generation, api_key).instrument(span.clone()) => outcome,
            _ = cancel.notified() => Ok(None),
        };

        let mut inner = self.shared.inner.lock().await;
        let current = inner.generation == generation;
        match outcome {
            Ok(Some(events)) if current => {
                let driver = tokio::spawn(
                    Shared::drive(Arc::clone(&self.shared), generation, events)
                        .instrument(span.clone()),
                );
                if let Some(connection) = inner.connection.as_mut() {
                    connection.driver = Some(driver);
                }
                span.in_scope(|| info!("Negotiation complete; waiting for the event channel"));
                Ok(())
            }
            Err(e) if current => {
                inner.state = SessionState::Idle;
                let connection = inner.connection.take();
                drop(inner);
                if let Some(connection) = connection {
                    self.shared.release(connection).await;
                }
                span.in_scope(|| error!(error = %e, "Session start failed"));
                self.shared.deps.observer.on_state_changed(SessionState::Idle);
                Err(e)
            }
            _ => {
                drop(inner);
                span.in_scope(|| info!("Negotiation abandoned after stop"));
                Ok(())
            }
        }
    }

    /// Closes the connection and returns to Idle. Safe to call at any time.
    ///
    /// A negotiation in progress is cancelled, and whatever it has acquired
    /// is released before this returns.
    pub async fn stop(&self) {
        let connection = {
            let mut inner = self.shared.inner.lock().await;
            if inner.state == SessionState::Idle {
                return;
            }
            inner.state = SessionState::Idle;
            inner.generation += 1;
            inner.connection.take()
        };

        if let Some(mut connection) = connection {
            connection.cancel.notify_one();
            if let Some(driver) = connection.driver.take() {
                driver.abort();
            }
            self.shared.release(connection).await;
        }
        info!("Session stopped");
        self.shared.deps.observer.on_state_changed(SessionState::Idle);
    }

    /// Sends a learner turn followed by the reply trigger.
    ///
    /// Does nothing for empty text or when the channel is not open. Replies
    /// arrive later through `TutorObserver::on_event`.
    pub async fn send_user_message(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        let inner = self.shared.inner.lock().await;
        let result = match Shared::active_peer(&inner) {
            Ok(peer) => {
                let user = ProtocolEvent::UserMessage {
                    text: text.to_string(),
                };
                match Shared::send_event(peer, &user).await {
                    Ok(()) => Shared::send_event(peer, &ProtocolEvent::ResponseRequest).await,
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        };
        drop(inner);

        match result {
            Ok(()) => debug!("User message sent"),
            Err(SessionError::ChannelUnavailable) => {
                debug!("Ignoring user message: channel not open")
            }
            Err(e) => warn!(error = %e, "Failed to send user message"),
        }
    }
}

/// Attaches remote audio right away once Active. Before that the stream is
/// held in `pending` and handed back when the channel opens.
fn hold_until_active<T>(state: SessionState, pending: &mut Option<T>, remote: T) -> Option<T> {
    if state == SessionState::Active {
        Some(remote)
    } else {
        *pending = Some(remote);
        None
    }
}

impl Shared {
    /// Runs the fallible part of `start` without holding the state lock.
    ///
    /// Returns `Ok(None)` when the attempt was stopped along the way; any
    /// resource acquired after that point is released here.
    async fn negotiate(
        &self,
        generation: u64,
        api_key: &str,
    ) -> Result<Option<PeerEventReceiver>, SessionError> {
        let audio = self.deps.media.acquire().await?;
        info!(?audio, "Microphone acquired");
        let track = audio.track();
        {
            let mut inner = self.inner.lock().await;
            let Some(connection) = inner.pending(generation) else {
                return Ok(None);
            };
            connection.audio = Some(audio);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let peer = self
            .deps
            .peers
            .open(EVENTS_CHANNEL_LABEL, track, tx)
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;
        let parked = {
            let mut inner = self.inner.lock().await;
            match inner.pending(generation) {
                Some(connection) => {
                    connection.peer = Some(Arc::clone(&peer));
                    true
                }
                None => false,
            }
        };
        if !parked {
            peer.close().await;
            return Ok(None);
        }

        self.exchange_descriptions(peer.as_ref(), api_key).await?;
        Ok(Some(rx))
    }

    async fn exchange_descriptions(
        &self,
        peer: &dyn PeerLink,
        api_key: &str,
    ) -> Result<(), SessionError> {
        let offer = peer
            .create_offer()
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;
        let answer = self.deps.signaling.negotiate(api_key, &offer).await?;
        peer.apply_answer(answer)
            .await
            .map_err(|e| SignalingError::InvalidDescription(e.to_string()))?;
        Ok(())
    }

    /// Drains peer events for one connection until it is superseded.
    async fn drive(shared: Arc<Shared>, generation: u64, mut events: PeerEventReceiver) {
        while let Some(event) = events.recv().await {
            if !shared.handle_event(generation, event).await {
                break;
            }
        }
        debug!("Peer event driver finished");
    }

    /// Applies one peer event. Returns `false` once the connection is gone.
    async fn handle_event(&self, generation: u64, event: PeerEvent) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            return false;
        }

        match event {
            PeerEvent::ChannelOpen => {
                if inner.state != SessionState::Negotiating {
                    return true;
                }
                let Some(connection) = inner.connection.as_ref() else {
                    return true;
                };
                let Some(peer) = connection.peer.clone() else {
                    return true;
                };
                let id = connection.id;
                let priming = ProtocolEvent::SessionInstruction {
                    instructions: connection.session.instructions(),
                };
                // Sent before the lock is released, so no user turn can
                // reach the channel ahead of it.
                if let Err(e) = Self::send_event(peer.as_ref(), &priming).await {
                    error!(session_id = %id, error = %e, "Failed to send priming instructions");
                    self.tear_down(inner).await;
                    return false;
                }
                inner.state = SessionState::Active;
                let remote = inner.connection.as_mut().and_then(|c| c.remote.take());
                drop(inner);
                info!(session_id = %id, "Session active");
                self.deps.observer.on_state_changed(SessionState::Active);
                if let Some(remote) = remote {
                    self.deps.playback.attach(remote);
                }
                true
            }
            PeerEvent::ChannelMessage(raw) => {
                drop(inner);
                let event = MessageRouter::decode(&raw);
                self.deps.observer.on_event(&event);
                true
            }
            PeerEvent::RemoteAudio(remote) => {
                let state = inner.state;
                let Some(connection) = inner.connection.as_mut() else {
                    return true;
                };
                let ready = hold_until_active(state, &mut connection.remote, remote);
                drop(inner);
                match ready {
                    Some(remote) => self.deps.playback.attach(remote),
                    None => debug!("Holding remote audio until the channel opens"),
                }
                true
            }
            PeerEvent::ChannelClosed | PeerEvent::ConnectionLost => {
                warn!("Connection closed by the remote side");
                self.tear_down(inner).await;
                false
            }
        }
    }

    /// Returns to Idle after a failure on the peer side.
    ///
    /// Only called from the driver task, which ends once this returns.
    async fn tear_down(&self, mut inner: MutexGuard<'_, Inner>) {
        inner.state = SessionState::Idle;
        inner.generation += 1;
        let connection = inner.connection.take();
        drop(inner);
        if let Some(connection) = connection {
            self.release(connection).await;
        }
        self.deps.observer.on_state_changed(SessionState::Idle);
    }

    /// Closes the peer, detaches playback and releases the microphone.
    async fn release(&self, connection: Connection) {
        if let Some(peer) = connection.peer.as_ref() {
            peer.close().await;
        }
        self.deps.playback.detach();
        drop(connection);
    }

    fn active_peer(inner: &Inner) -> Result<&dyn PeerLink, SessionError> {
        match (&inner.state, &inner.connection) {
            (
                SessionState::Active,
                Some(Connection {
                    peer: Some(peer), ..
                }),
            ) => Ok(peer.as_ref()),
            _ => Err(SessionError::ChannelUnavailable),
        }
    }

    async fn send_event(peer: &dyn PeerLink, event: &ProtocolEvent) -> Result<(), SessionError> {
        let payload =
            MessageRouter::encode(event).map_err(|e| SessionError::Connection(e.to_string()))?;
        peer.send_text(payload)
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))
    }
}
