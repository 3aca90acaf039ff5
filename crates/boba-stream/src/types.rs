use std::pin::Pin;

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CancellationToken, PayloadFormat, RequestEnvelope};

/// Generic message used when a failed handshake carries no usable `detail`.
pub const UNKNOWN_ERROR_DETAIL: &str = "An unknown error occurred.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates the request body encodings understood by the service.
pub enum EndpointKind {
    /// Prompt-driven exchange (`userinput` / `promptid` / `chatSessionId`).
    Prompt,
    /// Free-form exploration of a previously generated item (`input` / `context`).
    Explore,
    /// Two-step story validation (`input` / `chat_session_id` / `answers`).
    StoryValidation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Streaming endpoint a session talks to.
pub struct Endpoint {
    pub path: String,
    pub kind: EndpointKind,
    /// Overrides the transport's event payload format for this endpoint.
    pub payload_format: Option<PayloadFormat>,
}

impl Endpoint {
    pub fn prompt() -> Self {
        Self {
            path: "/api/prompt".to_string(),
            kind: EndpointKind::Prompt,
            payload_format: None,
        }
    }

    /// Exploration endpoint for a generated item type, e.g. `threat-modelling`.
    pub fn explore(item_type: &str) -> Self {
        Self {
            path: format!("/api/{}/explore", item_type.trim().trim_matches('/')),
            kind: EndpointKind::Explore,
            payload_format: None,
        }
    }

    /// First story validation step: clarifying questions for a user story.
    pub fn story_questions() -> Self {
        Self {
            path: "/api/story-validation/questions".to_string(),
            kind: EndpointKind::StoryValidation,
            payload_format: None,
        }
    }

    /// Second story validation step: scenarios built from the answered
    /// questions. Its events carry bare text rather than `{"data": ...}`.
    pub fn story_scenarios() -> Self {
        Self {
            path: "/api/story-validation/scenarios".to_string(),
            kind: EndpointKind::StoryValidation,
            payload_format: Some(PayloadFormat::Text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One ordered unit of received text.
pub struct StreamChunk {
    pub sequence: u64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
/// Metadata surfaced once, right after a successful handshake.
pub struct ResponseMetadata {
    pub status: u16,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Terminal failures reported by a transport.
pub enum StreamError {
    #[error("request rejected with status {status}: {detail}")]
    Request { status: u16, detail: String },
    #[error("transport error: {0}")]
    Transport(String),
}

impl StreamError {
    /// Human-readable detail suitable for direct display.
    pub fn detail(&self) -> &str {
        match self {
            Self::Request { detail, .. } => detail,
            Self::Transport(detail) => detail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Typed events produced by [`StreamTransport::open`].
pub enum TransportEvent {
    Connected(ResponseMetadata),
    Chunk(StreamChunk),
    Finished,
    Aborted,
    Errored(StreamError),
}

impl TransportEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Aborted | Self::Errored(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Everything a transport needs to issue one request attempt.
pub struct TransportRequest {
    pub endpoint: Endpoint,
    pub envelope: RequestEnvelope,
}

pub type TransportEventStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// Trait contract for transports that stream a reply as typed events.
///
/// Implementations must yield exactly one terminal event, must check `token`
/// at connect time and before every chunk, and must never deliver a chunk
/// once the token is cancelled.
pub trait StreamTransport: Send + Sync {
    fn open(&self, request: TransportRequest, token: CancellationToken) -> TransportEventStream;
}

impl<T: StreamTransport + ?Sized> StreamTransport for std::sync::Arc<T> {
    fn open(&self, request: TransportRequest, token: CancellationToken) -> TransportEventStream {
        (**self).open(request, token)
    }
}
