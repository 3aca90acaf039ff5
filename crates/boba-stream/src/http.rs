use std::{
    collections::VecDeque,
    pin::Pin,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use futures_util::{stream, Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::Value;

use crate::{
    sse::{SseFrameDecoder, Utf8ChunkDecoder, DONE_SENTINEL},
    CancellationToken, Endpoint, ResponseMetadata, StreamChunk, StreamError, StreamTransport,
    TransportEvent, TransportEventStream, TransportRequest, UNKNOWN_ERROR_DETAIL,
};

pub const DEFAULT_API_BASE: &str = "http://localhost:8080";
pub const DEFAULT_SESSION_HEADER: &str = "X-Chat-ID";
pub const REQUEST_ID_HEADER: &str = "x-boba-request-id";

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Encoding of each server-sent event payload.
pub enum PayloadFormat {
    /// `{"data": "<delta>"}`
    #[default]
    JsonEnvelope,
    /// The payload is the delta.
    Text,
}

#[derive(Debug, Clone)]
/// Public struct `HttpTransportConfig` used to reach the streaming service.
pub struct HttpTransportConfig {
    pub api_base: String,
    pub session_header: String,
    pub payload_format: PayloadFormat,
    pub request_timeout_ms: Option<u64>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            session_header: DEFAULT_SESSION_HEADER.to_string(),
            payload_format: PayloadFormat::default(),
            request_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone)]
/// [`StreamTransport`] over HTTP POST with a streamed response body.
pub struct HttpStreamTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
    session_header: HeaderName,
}

impl HttpStreamTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, StreamError> {
        let session_header =
            HeaderName::from_bytes(config.session_header.trim().as_bytes()).map_err(|error| {
                StreamError::Transport(format!(
                    "invalid session header name '{}': {error}",
                    config.session_header
                ))
            })?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout_ms) = config.request_timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms.max(1)));
        }
        let client = builder.build().map_err(|error| {
            StreamError::Transport(format!("failed to build http client: {error}"))
        })?;

        Ok(Self {
            client,
            config,
            session_header,
        })
    }

    pub fn config(&self) -> &HttpTransportConfig {
        &self.config
    }

    fn endpoint_url(&self, endpoint: &Endpoint) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        let path = endpoint.path.trim_start_matches('/');
        format!("{base}/{path}")
    }
}

impl StreamTransport for HttpStreamTransport {
    fn open(&self, request: TransportRequest, token: CancellationToken) -> TransportEventStream {
        let request_id = new_request_id();
        let url = self.endpoint_url(&request.endpoint);
        let body = request.envelope.to_wire_body(request.endpoint.kind);
        tracing::debug!(
            url = %url,
            request_id = %request_id,
            continuation = request.envelope.is_continuation(),
            "opening streaming request"
        );

        let builder = self
            .client
            .post(url)
            .header(REQUEST_ID_HEADER, request_id.as_str())
            .json(&body);

        let state = HttpEventStream {
            phase: Phase::Connecting(builder),
            token,
            session_header: self.session_header.clone(),
            payload_format: request
                .endpoint
                .payload_format
                .unwrap_or(self.config.payload_format),
            sequence: 0,
        };

        Box::pin(stream::unfold(state, |mut state| async move {
            let event = state.next_event().await?;
            if event.is_terminal() {
                state.phase = Phase::Closed;
            }
            Some((event, state))
        }))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>;

enum BodyFraming {
    EventStream(SseFrameDecoder),
    RawText(Utf8ChunkDecoder),
}

impl BodyFraming {
    fn for_content_type(content_type: Option<&str>) -> Self {
        let is_event_stream = content_type
            .map(|value| value.to_ascii_lowercase().contains("text/event-stream"))
            .unwrap_or(false);
        if is_event_stream {
            Self::EventStream(SseFrameDecoder::new())
        } else {
            Self::RawText(Utf8ChunkDecoder::new())
        }
    }

    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        match self {
            Self::EventStream(decoder) => decoder.push(bytes),
            Self::RawText(decoder) => vec![decoder.push(bytes)],
        }
    }

    fn finish(&mut self) -> Vec<String> {
        match self {
            Self::EventStream(decoder) => decoder.finish(),
            Self::RawText(decoder) => vec![decoder.finish()],
        }
    }
}

enum Phase {
    Connecting(reqwest::RequestBuilder),
    Receiving {
        body: Option<ByteStream>,
        framing: BodyFraming,
        queued: VecDeque<String>,
    },
    Closed,
}

enum Delta {
    Text(String),
    Done,
}

struct HttpEventStream {
    phase: Phase,
    token: CancellationToken,
    session_header: HeaderName,
    payload_format: PayloadFormat,
    sequence: u64,
}

impl HttpEventStream {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Closed) {
                Phase::Closed => return None,
                Phase::Connecting(request) => return Some(self.connect(request).await),
                Phase::Receiving {
                    mut body,
                    mut framing,
                    mut queued,
                } => {
                    if self.token.is_cancelled() {
                        return Some(TransportEvent::Aborted);
                    }

                    if let Some(payload) = queued.pop_front() {
                        let delta = match self.decode_payload(payload, &framing) {
                            Ok(delta) => delta,
                            Err(error) => return Some(TransportEvent::Errored(error)),
                        };
                        let text = match delta {
                            Delta::Done => return Some(TransportEvent::Finished),
                            Delta::Text(text) => text,
                        };
                        self.phase = Phase::Receiving {
                            body,
                            framing,
                            queued,
                        };
                        if text.is_empty() {
                            continue;
                        }
                        let sequence = self.sequence;
                        self.sequence += 1;
                        return Some(TransportEvent::Chunk(StreamChunk { sequence, text }));
                    }

                    let Some(mut reader) = body.take() else {
                        return Some(TransportEvent::Finished);
                    };
                    let next = tokio::select! {
                        biased;
                        _ = self.token.cancelled() => return Some(TransportEvent::Aborted),
                        next = reader.next() => next,
                    };
                    match next {
                        Some(Ok(bytes)) => {
                            queued.extend(framing.push(&bytes));
                            body = Some(reader);
                        }
                        Some(Err(error)) => {
                            return Some(TransportEvent::Errored(StreamError::Transport(format!(
                                "stream interrupted: {error}"
                            ))));
                        }
                        None => queued.extend(framing.finish()),
                    }
                    self.phase = Phase::Receiving {
                        body,
                        framing,
                        queued,
                    };
                }
            }
        }
    }

    async fn connect(&mut self, request: reqwest::RequestBuilder) -> TransportEvent {
        if self.token.is_cancelled() {
            return TransportEvent::Aborted;
        }

        let response = tokio::select! {
            biased;
            _ = self.token.cancelled() => return TransportEvent::Aborted,
            response = request.send() => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(error) => {
                return TransportEvent::Errored(StreamError::Transport(format!(
                    "failed to reach streaming endpoint: {error}"
                )));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let raw = tokio::select! {
                biased;
                _ = self.token.cancelled() => return TransportEvent::Aborted,
                raw = response.text() => raw.unwrap_or_default(),
            };
            return TransportEvent::Errored(StreamError::Request {
                status: status.as_u16(),
                detail: extract_error_detail(&raw),
            });
        }

        let session_id = response
            .headers()
            .get(&self.session_header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let framing = BodyFraming::for_content_type(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
        );
        let body: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec())),
        );

        self.phase = Phase::Receiving {
            body: Some(body),
            framing,
            queued: VecDeque::new(),
        };
        TransportEvent::Connected(ResponseMetadata {
            status: status.as_u16(),
            session_id,
        })
    }

    fn decode_payload(&self, payload: String, framing: &BodyFraming) -> Result<Delta, StreamError> {
        if matches!(framing, BodyFraming::RawText(_)) {
            return Ok(Delta::Text(payload));
        }
        if payload.trim() == DONE_SENTINEL {
            return Ok(Delta::Done);
        }
        match self.payload_format {
            PayloadFormat::Text => Ok(Delta::Text(payload)),
            PayloadFormat::JsonEnvelope => unwrap_json_envelope(&payload).map(Delta::Text),
        }
    }
}

fn unwrap_json_envelope(payload: &str) -> Result<String, StreamError> {
    let value: Value = serde_json::from_str(payload).map_err(|error| {
        StreamError::Transport(format!("malformed event payload: {error}"))
    })?;
    match value.get("data") {
        Some(Value::String(delta)) => Ok(delta.clone()),
        Some(Value::Null) => Ok(String::new()),
        Some(other) => Ok(other.to_string()),
        None => Err(StreamError::Transport(
            "event payload is missing the `data` field".to_string(),
        )),
    }
}

/// Extracts the human-readable `detail` from an error response body.
pub fn extract_error_detail(raw: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(raw) else {
        return UNKNOWN_ERROR_DETAIL.to_string();
    };
    match value.get("detail") {
        Some(Value::String(detail)) if !detail.trim().is_empty() => detail.trim().to_string(),
        Some(Value::Array(entries)) => {
            let messages = entries
                .iter()
                .filter_map(|entry| {
                    entry
                        .get("msg")
                        .and_then(Value::as_str)
                        .or_else(|| entry.as_str())
                })
                .collect::<Vec<_>>();
            if messages.is_empty() {
                UNKNOWN_ERROR_DETAIL.to_string()
            } else {
                messages.join("; ")
            }
        }
        _ => UNKNOWN_ERROR_DETAIL.to_string(),
    }
}

pub fn new_request_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let count = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("boba-rs-{millis}-{count}")
}

#[cfg(test)]
mod tests {
    use super::{
        extract_error_detail, new_request_id, unwrap_json_envelope, HttpStreamTransport,
        HttpTransportConfig,
    };
    use crate::{Endpoint, StreamError, UNKNOWN_ERROR_DETAIL};

    #[test]
    fn unit_error_detail_prefers_string_detail() {
        assert_eq!(
            extract_error_detail(r#"{"detail":"invalid context"}"#),
            "invalid context"
        );
    }

    #[test]
    fn unit_error_detail_joins_validation_messages() {
        let raw = r#"{"detail":[{"loc":["body","userinput"],"msg":"field required"},{"msg":"bad id"}]}"#;
        assert_eq!(extract_error_detail(raw), "field required; bad id");
    }

    #[test]
    fn unit_error_detail_falls_back_to_generic_message() {
        assert_eq!(extract_error_detail("<html>502</html>"), UNKNOWN_ERROR_DETAIL);
        assert_eq!(extract_error_detail(r#"{"error":"x"}"#), UNKNOWN_ERROR_DETAIL);
        assert_eq!(extract_error_detail(r#"{"detail":"  "}"#), UNKNOWN_ERROR_DETAIL);
    }

    #[test]
    fn unit_json_envelope_unwraps_data_field() {
        assert_eq!(
            unwrap_json_envelope(r#"{"data":"[{\"title\""}"#),
            Ok("[{\"title\"".to_string())
        );
        assert_eq!(unwrap_json_envelope(r#"{"data":7}"#), Ok("7".to_string()));
        assert_eq!(unwrap_json_envelope(r#"{"data":null}"#), Ok(String::new()));
        assert!(matches!(
            unwrap_json_envelope(r#"{"delta":"x"}"#),
            Err(StreamError::Transport(_))
        ));
        assert!(matches!(
            unwrap_json_envelope("not json"),
            Err(StreamError::Transport(_))
        ));
    }

    #[test]
    fn unit_endpoint_url_joins_base_and_path() {
        let transport = HttpStreamTransport::new(HttpTransportConfig {
            api_base: "http://localhost:8080/".to_string(),
            ..HttpTransportConfig::default()
        })
        .expect("transport");
        assert_eq!(
            transport.endpoint_url(&Endpoint::explore("requirements")),
            "http://localhost:8080/api/requirements/explore"
        );
    }

    #[test]
    fn regression_invalid_session_header_is_rejected() {
        let error = HttpStreamTransport::new(HttpTransportConfig {
            session_header: "bad header".to_string(),
            ..HttpTransportConfig::default()
        })
        .expect_err("header with a space should be rejected");
        assert!(error.to_string().contains("invalid session header name"));
    }

    #[test]
    fn request_ids_are_unique() {
        let a = new_request_id();
        let b = new_request_id();
        assert_ne!(a, b);
        assert!(a.starts_with("boba-rs-"));
    }
}
