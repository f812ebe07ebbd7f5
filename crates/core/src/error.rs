//! Error taxonomy for the tutoring core.
//!
//! Each failure domain gets its own type so callers can tell a denied
//! microphone from a rejected offer or a failed completion request. None of
//! these are retried by the core.

/// The local microphone could not be opened (denied, missing, or busy).
#[derive(Debug, thiserror::Error)]
#[error("Media acquisition failed: {0}")]
pub struct MediaAcquisitionError(pub String);

impl MediaAcquisitionError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// The offer/answer exchange with the realtime endpoint failed.
#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("Signaling endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Signaling endpoint returned an empty session description")]
    EmptyDescription,
    #[error("Remote session description was rejected: {0}")]
    InvalidDescription(String),
    #[error("Signaling request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Failures reported by `SessionController` entry points.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("An API key is required to start a session")]
    MissingApiKey,
    #[error("A session is already running")]
    AlreadyStarted,
    #[error(transparent)]
    MediaAcquisition(#[from] MediaAcquisitionError),
    #[error(transparent)]
    Signaling(#[from] SignalingError),
    #[error("Peer connection setup failed: {0}")]
    Connection(String),
    #[error("The event channel is not open")]
    ChannelUnavailable,
}

/// A completion request did not produce a usable HTTP response.
#[derive(Debug, thiserror::Error)]
pub enum CompletionRequestError {
    #[error("Completion endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Completion request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Completion request could not be built: {0}")]
    Request(#[from] async_openai::error::OpenAIError),
}

/// Failures reported by `QuizEngine` operations.
#[derive(Debug, thiserror::Error)]
pub enum QuizError {
    #[error("An API key is required for quiz requests")]
    MissingApiKey,
    #[error(transparent)]
    Completion(#[from] CompletionRequestError),
}
