//! Streaming transport, request envelopes and best-effort decoding for Boba
//! chat sessions.
mod cancellation;
mod decoder;
mod envelope;
mod http;
pub mod sse;
mod types;

pub use cancellation::CancellationToken;
pub use decoder::{decode, DecodeResult, DecodeShapeError, ExpectedShape};
pub use envelope::{
    build_envelope, compose_user_input, EnvelopeError, EnvelopePolicy, QuestionAnswer,
    RequestEnvelope, TurnExtras, DEFAULT_SELECTION,
};
pub use http::{
    extract_error_detail, new_request_id, HttpStreamTransport, HttpTransportConfig,
    PayloadFormat, DEFAULT_API_BASE, DEFAULT_SESSION_HEADER, REQUEST_ID_HEADER,
};
pub use types::{
    Endpoint, EndpointKind, ResponseMetadata, StreamChunk, StreamError, StreamTransport,
    TransportEvent, TransportEventStream, TransportRequest, UNKNOWN_ERROR_DETAIL,
};
