//! Conversational session state machine over a [`boba_stream::StreamTransport`].
mod events;
mod session;

pub use events::{
    SessionEvent, SessionPhase, SessionSnapshot, TurnInput, TurnOutcome, TurnSummary, TurnTarget,
};
pub use session::{ChatSession, SessionCancelHandle, SessionConfig, SessionEventHandler};
