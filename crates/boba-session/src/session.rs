use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use boba_stream::{
    build_envelope, compose_user_input, decode, CancellationToken, DecodeResult, DecodeShapeError,
    Endpoint, EnvelopeError, EnvelopePolicy, ExpectedShape, RequestEnvelope, StreamError,
    StreamTransport, TransportEvent, TransportRequest,
};
use futures_util::StreamExt;

use crate::{
    SessionEvent, SessionPhase, SessionSnapshot, TurnInput, TurnOutcome, TurnSummary, TurnTarget,
};

pub type SessionEventHandler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Per-session settings fixed at construction.
pub struct SessionConfig {
    pub endpoint: Endpoint,
    pub expected_shape: ExpectedShape,
    pub envelope: EnvelopePolicy,
    /// Cancels a turn that has not finished within this many milliseconds.
    pub turn_deadline_ms: Option<u64>,
}

impl SessionConfig {
    pub fn prompt() -> Self {
        Self::for_endpoint(Endpoint::prompt())
    }

    pub fn explore(item_type: &str) -> Self {
        Self::for_endpoint(Endpoint::explore(item_type))
    }

    pub fn for_endpoint(endpoint: Endpoint) -> Self {
        Self {
            envelope: EnvelopePolicy::for_endpoint(endpoint.kind),
            endpoint,
            expected_shape: ExpectedShape::default(),
            turn_deadline_ms: None,
        }
    }

    pub fn with_shape(mut self, shape: ExpectedShape) -> Self {
        self.expected_shape = shape;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::prompt()
    }
}

#[derive(Debug, Default)]
struct SessionState {
    session_id: Option<String>,
    turn_count: u64,
    phase: SessionPhase,
    /// Identity of the newest attempt. Anything older is superseded.
    attempt: u64,
    in_flight: Option<CancellationToken>,
}

fn lock_state(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn cancel_in_flight(state: &Mutex<SessionState>) -> bool {
    let mut state = lock_state(state);
    let Some(token) = state.in_flight.take() else {
        return false;
    };
    token.cancel();
    if state.phase.is_in_flight() {
        state.phase = SessionPhase::Aborted;
    }
    tracing::debug!(attempt = state.attempt, "cancelled in-flight turn");
    true
}

#[derive(Debug, Clone)]
/// Cancels the session's in-flight turn from another task or a signal handler.
pub struct SessionCancelHandle {
    state: Arc<Mutex<SessionState>>,
}

impl SessionCancelHandle {
    /// Returns false when no turn was in flight.
    pub fn cancel(&self) -> bool {
        cancel_in_flight(&self.state)
    }
}

enum Terminal {
    Finished(TurnSummary),
    Aborted,
    Failed(StreamError),
}

struct TurnProgress {
    shape: ExpectedShape,
    buffer: String,
    last_forwarded: Option<DecodeResult>,
    shape_error: Option<DecodeShapeError>,
    chunks: u64,
}

/// One conversational session against a streaming endpoint.
///
/// At most one turn is in flight: submitting while a turn streams cancels the
/// older turn first, and nothing the older turn receives afterwards reaches
/// subscribers or session state.
pub struct ChatSession<T> {
    transport: T,
    config: SessionConfig,
    state: Arc<Mutex<SessionState>>,
    handlers: Vec<SessionEventHandler>,
}

impl<T: StreamTransport> ChatSession<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            state: Arc::new(Mutex::new(SessionState::default())),
            handlers: Vec::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn subscribe<F>(&mut self, handler: F)
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.handlers.push(Arc::new(handler));
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = lock_state(&self.state);
        SessionSnapshot {
            session_id: state.session_id.clone(),
            turn_count: state.turn_count,
            phase: state.phase,
        }
    }

    pub fn session_id(&self) -> Option<String> {
        lock_state(&self.state).session_id.clone()
    }

    pub fn cancel_handle(&self) -> SessionCancelHandle {
        SessionCancelHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Cancels the in-flight turn. Returns false when nothing was in flight.
    pub fn cancel(&self) -> bool {
        cancel_in_flight(&self.state)
    }

    /// Cancels any in-flight turn and forgets the session id so the next
    /// submission starts a new conversation.
    pub fn reset(&self) {
        let mut state = lock_state(&self.state);
        if let Some(token) = state.in_flight.take() {
            token.cancel();
        }
        state.attempt += 1;
        state.session_id = None;
        state.turn_count = 0;
        state.phase = SessionPhase::NotStarted;
        tracing::debug!("session reset");
    }

    /// Submits one turn and drives it to a terminal outcome.
    ///
    /// Envelope validation failures are returned before any request is made
    /// and leave the session untouched.
    pub async fn submit(
        &self,
        input: impl Into<TurnInput>,
    ) -> Result<TurnOutcome, EnvelopeError> {
        let input = input.into();
        let user_input = compose_user_input(&input.text, input.image_description.as_deref());
        let target = input.target.clone().unwrap_or_else(|| TurnTarget {
            endpoint: self.config.endpoint.clone(),
            expected_shape: self.config.expected_shape,
        });

        let (attempt, token, envelope) = {
            let mut state = lock_state(&self.state);
            let envelope = build_envelope(
                &user_input,
                state.session_id.as_deref(),
                &input.extras,
                &self.config.envelope,
            )?;
            if let Some(stale) = state.in_flight.take() {
                if stale.cancel() {
                    tracing::debug!(
                        attempt = state.attempt,
                        "cancelled in-flight turn before submitting a new one"
                    );
                }
            }
            state.attempt += 1;
            state.phase = SessionPhase::Active;
            let token = CancellationToken::new();
            state.in_flight = Some(token.clone());
            (state.attempt, token, envelope)
        };

        self.emit(SessionEvent::TurnStarted {
            attempt,
            continuation: envelope.is_continuation(),
        });

        let deadline = self
            .config
            .turn_deadline_ms
            .map(|ms| token.cancel_after(Duration::from_millis(ms)));
        let outcome = self.drive_turn(attempt, &token, envelope, target).await;
        if let Some(deadline) = deadline {
            deadline.abort();
        }
        Ok(outcome)
    }

    async fn drive_turn(
        &self,
        attempt: u64,
        token: &CancellationToken,
        envelope: RequestEnvelope,
        target: TurnTarget,
    ) -> TurnOutcome {
        let continuation = envelope.is_continuation();
        let request = TransportRequest {
            endpoint: target.endpoint,
            envelope,
        };
        let mut events = self.transport.open(request, token.clone());
        let mut progress = TurnProgress {
            shape: target.expected_shape,
            buffer: String::new(),
            last_forwarded: None,
            shape_error: None,
            chunks: 0,
        };

        while let Some(event) = events.next().await {
            // Once cancellation is observed nothing else from this stream counts.
            if token.is_cancelled() {
                return self.settle(attempt, token, Terminal::Aborted);
            }
            match event {
                TransportEvent::Connected(metadata) => {
                    self.capture_session_id(attempt, metadata.session_id);
                }
                TransportEvent::Chunk(chunk) => {
                    if progress.chunks == 0 {
                        self.begin_streaming(attempt);
                    }
                    progress.chunks += 1;
                    progress.buffer.push_str(&chunk.text);
                    self.apply_decode(attempt, &mut progress);
                }
                TransportEvent::Finished => {
                    let summary = self.summarize(progress);
                    if !continuation && summary.session_id.is_none() {
                        tracing::warn!(attempt, "first turn finished without a session id");
                    }
                    return self.settle(attempt, token, Terminal::Finished(summary));
                }
                TransportEvent::Aborted => return self.settle(attempt, token, Terminal::Aborted),
                TransportEvent::Errored(error) => {
                    return self.settle(attempt, token, Terminal::Failed(error));
                }
            }
        }

        if token.is_cancelled() {
            return self.settle(attempt, token, Terminal::Aborted);
        }
        let error = StreamError::Transport("stream closed without a terminal event".to_string());
        self.settle(attempt, token, Terminal::Failed(error))
    }

    fn capture_session_id(&self, attempt: u64, candidate: Option<String>) {
        let established = {
            let mut state = lock_state(&self.state);
            if state.attempt != attempt {
                return;
            }
            match (state.session_id.as_deref(), candidate) {
                (None, Some(session_id)) => {
                    state.session_id = Some(session_id.clone());
                    Some(session_id)
                }
                (Some(existing), Some(session_id)) if existing != session_id => {
                    tracing::debug!(
                        attempt,
                        "ignoring differing session id on continuation response"
                    );
                    None
                }
                _ => None,
            }
        };
        if let Some(session_id) = established {
            tracing::debug!(attempt, session_id = %session_id, "session established");
            self.emit(SessionEvent::SessionEstablished {
                attempt,
                session_id,
            });
        }
    }

    fn begin_streaming(&self, attempt: u64) {
        {
            let mut state = lock_state(&self.state);
            if state.attempt != attempt {
                return;
            }
            state.phase = SessionPhase::Streaming;
        }
        self.emit(SessionEvent::Streaming { attempt });
    }

    fn apply_decode(&self, attempt: u64, progress: &mut TurnProgress) {
        match decode(&progress.buffer, progress.shape) {
            Ok(result) => {
                let changed = progress
                    .last_forwarded
                    .as_ref()
                    .map(|previous| previous.value != result.value)
                    .unwrap_or(true);
                if changed {
                    progress.last_forwarded = Some(result.clone());
                    self.emit(SessionEvent::Decoded { attempt, result });
                }
            }
            Err(error) => {
                if progress.shape_error.is_none() {
                    tracing::warn!(attempt, error = %error, "streamed reply has an unexpected shape");
                    self.emit(SessionEvent::ShapeWarning {
                        attempt,
                        error: error.clone(),
                    });
                }
                progress.shape_error = Some(error);
            }
        }
    }

    fn summarize(&self, progress: TurnProgress) -> TurnSummary {
        let result = match decode(&progress.buffer, progress.shape) {
            Ok(result) => result,
            Err(_) => progress
                .last_forwarded
                .unwrap_or_else(DecodeResult::empty_records),
        };
        TurnSummary {
            result,
            reliable: progress.shape_error.is_none(),
            chunks: progress.chunks,
            session_id: self.session_id(),
        }
    }

    /// Applies a terminal transition for `attempt` and emits its single
    /// terminal event. Superseded attempts never write session state.
    fn settle(&self, attempt: u64, token: &CancellationToken, terminal: Terminal) -> TurnOutcome {
        let terminal = {
            let mut state = lock_state(&self.state);
            let current = state.attempt == attempt;
            let terminal = if token.is_cancelled() || !current {
                Terminal::Aborted
            } else {
                terminal
            };
            if current {
                state.in_flight = None;
                state.phase = match &terminal {
                    Terminal::Finished(_) => {
                        state.turn_count += 1;
                        SessionPhase::Done
                    }
                    Terminal::Aborted => SessionPhase::Aborted,
                    Terminal::Failed(_) => SessionPhase::Failed,
                };
            }
            terminal
        };

        match terminal {
            Terminal::Finished(summary) => {
                tracing::debug!(
                    attempt,
                    chunks = summary.chunks,
                    reliable = summary.reliable,
                    "turn finished"
                );
                self.emit(SessionEvent::Finished {
                    attempt,
                    result: summary.result.clone(),
                    reliable: summary.reliable,
                });
                TurnOutcome::Completed(summary)
            }
            Terminal::Aborted => {
                tracing::debug!(attempt, "turn aborted");
                self.emit(SessionEvent::Aborted { attempt });
                TurnOutcome::Aborted
            }
            Terminal::Failed(error) => {
                tracing::warn!(attempt, error = %error, "turn failed");
                self.emit(SessionEvent::Failed {
                    attempt,
                    error: error.clone(),
                });
                TurnOutcome::Failed(error)
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        for handler in &self.handlers {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(&event)));
        }
    }
}
