use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use boba_session::SessionConfig;
use boba_stream::{
    Endpoint, EnvelopePolicy, ExpectedShape, HttpTransportConfig, PayloadFormat, TurnExtras,
    DEFAULT_API_BASE, DEFAULT_SESSION_HEADER,
};
use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum CliEndpoint {
    Prompt,
    Explore,
    StoryValidation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum CliShape {
    Records,
    Text,
}

impl From<CliShape> for ExpectedShape {
    fn from(value: CliShape) -> Self {
        match value {
            CliShape::Records => ExpectedShape::RecordArray,
            CliShape::Text => ExpectedShape::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum CliPayloadFormat {
    JsonEnvelope,
    Text,
}

impl From<CliPayloadFormat> for PayloadFormat {
    fn from(value: CliPayloadFormat) -> Self {
        match value {
            CliPayloadFormat::JsonEnvelope => PayloadFormat::JsonEnvelope,
            CliPayloadFormat::Text => PayloadFormat::Text,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "boba",
    about = "Streaming chat client for Boba prompt, exploration and story validation endpoints",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long,
        env = "BOBA_API_BASE",
        default_value = DEFAULT_API_BASE,
        help = "Base URL of the Boba backend"
    )]
    pub(crate) api_base: String,

    #[arg(
        long,
        env = "BOBA_ENDPOINT",
        value_enum,
        default_value = "prompt",
        help = "Streaming endpoint: prompt (/api/prompt), explore (/api/<kind>/explore) \
                or story-validation (/api/story-validation/questions, then /scenarios)"
    )]
    pub(crate) endpoint: CliEndpoint,

    #[arg(
        long,
        env = "BOBA_EXPLORE_KIND",
        help = "Item type for --endpoint explore, e.g. threat-modelling or requirements"
    )]
    pub(crate) explore_kind: Option<String>,

    #[arg(long, env = "BOBA_PROMPT_ID", help = "Prompt template id sent on the first turn")]
    pub(crate) prompt_id: Option<String>,

    #[arg(
        long,
        env = "BOBA_CONTEXT",
        help = "Knowledge context sent on the first turn; 'base' means none"
    )]
    pub(crate) context: Option<String>,

    #[arg(
        long,
        env = "BOBA_DOCUMENT",
        help = "Document reference sent on the first turn; 'base' means none"
    )]
    pub(crate) document: Option<String>,

    #[arg(
        long,
        env = "BOBA_IMAGE_DESCRIPTION_FILE",
        help = "File whose text is appended to the first input of each conversation"
    )]
    pub(crate) image_description_file: Option<PathBuf>,

    #[arg(
        long,
        env = "BOBA_SHAPE",
        value_enum,
        default_value = "records",
        help = "Expected reply shape: records (JSON array of objects) or text"
    )]
    pub(crate) shape: CliShape,

    #[arg(
        long,
        env = "BOBA_PAYLOAD",
        value_enum,
        default_value = "json-envelope",
        help = "Event payload encoding: json-envelope ({\"data\": ...}) or text"
    )]
    pub(crate) payload: CliPayloadFormat,

    #[arg(
        long,
        env = "BOBA_SESSION_HEADER",
        default_value = DEFAULT_SESSION_HEADER,
        help = "Response header carrying the session id"
    )]
    pub(crate) session_header: String,

    #[arg(
        long,
        env = "BOBA_REQUEST_TIMEOUT_MS",
        help = "Overall HTTP request timeout in milliseconds"
    )]
    pub(crate) request_timeout_ms: Option<u64>,

    #[arg(
        long,
        env = "BOBA_TURN_DEADLINE_MS",
        help = "Cancel a turn that has not finished within this many milliseconds"
    )]
    pub(crate) turn_deadline_ms: Option<u64>,

    #[arg(
        long,
        env = "BOBA_ALLOW_EMPTY_INPUT",
        default_value_t = false,
        help = "Submit blank input instead of rejecting it"
    )]
    pub(crate) allow_empty_input: bool,

    #[arg(long, env = "BOBA_INPUT", help = "Submit one turn and exit")]
    pub(crate) input: Option<String>,
}

impl Cli {
    pub(crate) fn transport_config(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            api_base: self.api_base.clone(),
            session_header: self.session_header.clone(),
            payload_format: self.payload.into(),
            request_timeout_ms: self.request_timeout_ms,
        }
    }

    pub(crate) fn session_config(&self) -> Result<SessionConfig> {
        let endpoint = match self.endpoint {
            CliEndpoint::Prompt => Endpoint::prompt(),
            CliEndpoint::Explore => {
                let Some(kind) = self
                    .explore_kind
                    .as_deref()
                    .map(str::trim)
                    .filter(|kind| !kind.is_empty())
                else {
                    bail!("--explore-kind is required when using --endpoint explore");
                };
                Endpoint::explore(kind)
            }
            CliEndpoint::StoryValidation => Endpoint::story_questions(),
        };
        let envelope = EnvelopePolicy {
            require_non_empty_input: !self.allow_empty_input,
            ..EnvelopePolicy::for_endpoint(endpoint.kind)
        };
        Ok(SessionConfig {
            endpoint,
            expected_shape: self.shape.into(),
            envelope,
            turn_deadline_ms: self.turn_deadline_ms,
        })
    }

    pub(crate) fn turn_extras(&self) -> TurnExtras {
        TurnExtras {
            prompt_id: self.prompt_id.clone(),
            context: self.context.clone(),
            document: self.document.clone(),
            ..TurnExtras::default()
        }
    }

    pub(crate) fn image_description(&self) -> Result<Option<String>> {
        let Some(path) = self.image_description_file.as_ref() else {
            return Ok(None);
        };
        let description = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Some(description))
    }
}
