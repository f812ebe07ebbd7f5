use crate::{protocol::InboundEvent, quiz::Quiz, session::SessionState};

/// The caller's view into the core, registered once at construction.
///
/// Every method has a no-op default so a caller only implements the
/// notifications it renders.
pub trait TutorObserver: Send + Sync {
    /// The session moved to a new lifecycle state.
    fn on_state_changed(&self, _state: SessionState) {}

    /// A payload arrived from the remote model.
    fn on_event(&self, _event: &InboundEvent) {}

    /// A fresh quiz replaced the previous one.
    fn on_quiz_generated(&self, _quiz: &Quiz) {}

    /// Feedback for the submitted answers arrived.
    fn on_quiz_graded(&self, _feedback: &str) {}
}

/// An observer that ignores everything.
pub struct NoopObserver;

impl TutorObserver for NoopObserver {}
