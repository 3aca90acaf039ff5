use boba_stream::{DecodeResult, DecodeShapeError, Endpoint, ExpectedShape, StreamError, TurnExtras};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Enumerates the lifecycle phases of a session's current turn.
pub enum SessionPhase {
    #[default]
    NotStarted,
    Active,
    Streaming,
    Done,
    Aborted,
    Failed,
}

impl SessionPhase {
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Active | Self::Streaming)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Active => "active",
            Self::Streaming => "streaming",
            Self::Done => "done",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
/// Read-only projection of the session handed to collaborators.
pub struct SessionSnapshot {
    pub session_id: Option<String>,
    pub turn_count: u64,
    pub phase: SessionPhase,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
/// User-supplied input for one turn.
pub struct TurnInput {
    pub text: String,
    pub image_description: Option<String>,
    pub extras: TurnExtras,
    /// Sends this turn somewhere other than the session's configured endpoint.
    pub target: Option<TurnTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Endpoint and reply shape for a single turn. Multi-step flows such as story
/// validation keep one session id across endpoints this way.
pub struct TurnTarget {
    pub endpoint: Endpoint,
    pub expected_shape: ExpectedShape,
}

impl TurnInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_extras(mut self, extras: TurnExtras) -> Self {
        self.extras = extras;
        self
    }

    pub fn with_image_description(mut self, description: impl Into<String>) -> Self {
        self.image_description = Some(description.into());
        self
    }

    pub fn with_target(mut self, endpoint: Endpoint, expected_shape: ExpectedShape) -> Self {
        self.target = Some(TurnTarget {
            endpoint,
            expected_shape,
        });
        self
    }
}

impl From<&str> for TurnInput {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for TurnInput {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// Lifecycle and value notifications emitted to subscribers.
///
/// `attempt` identifies the request attempt within the session, so a
/// superseded turn's notifications cannot be mistaken for the current one.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    TurnStarted {
        attempt: u64,
        continuation: bool,
    },
    SessionEstablished {
        attempt: u64,
        session_id: String,
    },
    Streaming {
        attempt: u64,
    },
    Decoded {
        attempt: u64,
        result: DecodeResult,
    },
    ShapeWarning {
        attempt: u64,
        error: DecodeShapeError,
    },
    Finished {
        attempt: u64,
        result: DecodeResult,
        reliable: bool,
    },
    Aborted {
        attempt: u64,
    },
    Failed {
        attempt: u64,
        error: StreamError,
    },
}

impl SessionEvent {
    pub fn attempt(&self) -> u64 {
        match self {
            Self::TurnStarted { attempt, .. }
            | Self::SessionEstablished { attempt, .. }
            | Self::Streaming { attempt }
            | Self::Decoded { attempt, .. }
            | Self::ShapeWarning { attempt, .. }
            | Self::Finished { attempt, .. }
            | Self::Aborted { attempt }
            | Self::Failed { attempt, .. } => *attempt,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Result of a turn that reached `Done`.
pub struct TurnSummary {
    pub result: DecodeResult,
    /// False when a shape mismatch was observed during the turn.
    pub reliable: bool,
    pub chunks: u64,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
/// Terminal outcome of one submitted turn.
pub enum TurnOutcome {
    Completed(TurnSummary),
    Aborted,
    Failed(StreamError),
}
