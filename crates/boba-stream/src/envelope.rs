use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::EndpointKind;

/// Selection value meaning "nothing selected" for contexts and documents.
pub const DEFAULT_SELECTION: &str = "base";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Logical request payload for one turn.
pub struct RequestEnvelope {
    pub user_input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub answers: Vec<QuestionAnswer>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// A clarifying question with the answer the user settled on.
pub struct QuestionAnswer {
    pub question: String,
    pub answer: String,
}

impl QuestionAnswer {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

impl RequestEnvelope {
    pub fn is_continuation(&self) -> bool {
        self.session_id.is_some()
    }

    /// Encodes the envelope with the field names the endpoint kind expects.
    pub fn to_wire_body(&self, kind: EndpointKind) -> Value {
        let mut body = match kind {
            EndpointKind::Prompt => json!({ "userinput": self.user_input }),
            EndpointKind::Explore => json!({ "input": self.user_input }),
            EndpointKind::StoryValidation => return self.story_validation_body(),
        };
        if let Some(session_id) = &self.session_id {
            body["chatSessionId"] = json!(session_id);
        }
        if let Some(context) = &self.context {
            body["context"] = json!(context);
        }
        if kind == EndpointKind::Prompt {
            if let Some(prompt_id) = &self.prompt_id {
                body["promptid"] = json!(prompt_id);
            }
            if let Some(document) = &self.document {
                body["document"] = json!(document);
            }
        }
        body
    }

    fn story_validation_body(&self) -> Value {
        let mut body = json!({ "input": self.user_input });
        if let Some(session_id) = &self.session_id {
            body["chat_session_id"] = json!(session_id);
        }
        if !self.answers.is_empty() {
            body["answers"] = json!(self.answers);
        }
        body
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// First-turn configuration supplied by the caller alongside the input.
pub struct TurnExtras {
    pub prompt_id: Option<String>,
    pub context: Option<String>,
    pub document: Option<String>,
    /// Answered clarifying questions; sent on whichever turn supplies them.
    pub answers: Vec<QuestionAnswer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Envelope construction rules.
pub struct EnvelopePolicy {
    pub require_non_empty_input: bool,
    /// Keep the context on continuation turns (exploration endpoints render
    /// their prompt from it every turn).
    pub carry_context_on_continuation: bool,
}

impl Default for EnvelopePolicy {
    fn default() -> Self {
        Self {
            require_non_empty_input: true,
            carry_context_on_continuation: false,
        }
    }
}

impl EnvelopePolicy {
    pub fn for_endpoint(kind: EndpointKind) -> Self {
        Self {
            carry_context_on_continuation: kind == EndpointKind::Explore,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Enumerates supported `EnvelopeError` values.
pub enum EnvelopeError {
    #[error("user input cannot be empty")]
    EmptyUserInput,
}

/// Builds the request envelope for the next turn.
///
/// Without a known `session_id` the turn opens a session and carries the
/// non-default extras; otherwise only the input and session id are sent.
pub fn build_envelope(
    user_input: &str,
    session_id: Option<&str>,
    extras: &TurnExtras,
    policy: &EnvelopePolicy,
) -> Result<RequestEnvelope, EnvelopeError> {
    if policy.require_non_empty_input && user_input.trim().is_empty() {
        return Err(EnvelopeError::EmptyUserInput);
    }

    let Some(session_id) = session_id else {
        return Ok(RequestEnvelope {
            user_input: user_input.to_string(),
            session_id: None,
            prompt_id: non_blank(extras.prompt_id.as_deref()),
            context: non_default_selection(extras.context.as_deref()),
            document: non_default_selection(extras.document.as_deref()),
            answers: extras.answers.clone(),
        });
    };

    Ok(RequestEnvelope {
        user_input: user_input.to_string(),
        session_id: Some(session_id.to_string()),
        prompt_id: None,
        context: if policy.carry_context_on_continuation {
            non_default_selection(extras.context.as_deref())
        } else {
            None
        },
        document: None,
        answers: extras.answers.clone(),
    })
}

/// Appends an optional image description to the typed input.
pub fn compose_user_input(text: &str, image_description: Option<&str>) -> String {
    match image_description.map(str::trim) {
        Some(description) if !description.is_empty() => format!("{text}\n\n{description}"),
        _ => text.to_string(),
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn non_default_selection(value: Option<&str>) -> Option<String> {
    non_blank(value).filter(|value| value != DEFAULT_SELECTION)
}
