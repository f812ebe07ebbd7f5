//! Core of the realtime language tutor.
//!
//! The `SessionController` owns a WebRTC connection to a realtime model and
//! exchanges JSON events with it over a data channel. The `QuizEngine` runs
//! stateless quiz generation and grading against a chat completion endpoint.
//! Audio devices and rendering stay outside this crate, behind the
//! `MediaCapture`, `PlaybackSink` and `TutorObserver` seams.

pub mod error;
pub mod llm_client;
pub mod media;
pub mod observer;
pub mod peer;
pub mod prompts;
pub mod protocol;
pub mod quiz;
pub mod rtc;
pub mod session;
pub mod signaling;

pub use error::{
    CompletionRequestError, MediaAcquisitionError, QuizError, SessionError, SignalingError,
};
pub use observer::{NoopObserver, TutorObserver};
pub use protocol::{InboundEvent, MessageRouter, ProtocolEvent, UnknownEvent};
pub use quiz::{Quiz, QuizEngine};
pub use session::{Session, SessionController, SessionDeps, SessionState};
