//! Best-effort decoding of a growing response buffer.
//!
//! Every call re-parses the whole buffer. A buffer that is not yet valid JSON
//! is reduced to its longest prefix of complete array elements, so callers see
//! the records received so far and never a half-built one.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const CODE_FENCE: &str = "```";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Shape the application expects the streamed reply to take.
pub enum ExpectedShape {
    /// A JSON array of objects, e.g. generated scenarios or user stories.
    #[default]
    RecordArray,
    /// Free-form text such as markdown.
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Latest value recovered from the buffer.
pub struct DecodeResult {
    pub value: Value,
    /// True when the whole buffer was well-formed at decode time.
    pub complete: bool,
}

impl DecodeResult {
    pub fn empty_records() -> Self {
        Self {
            value: Value::Array(Vec::new()),
            complete: false,
        }
    }

    pub fn record_count(&self) -> usize {
        self.value.as_array().map(Vec::len).unwrap_or_default()
    }

    pub fn as_text(&self) -> Option<&str> {
        self.value.as_str()
    }

    /// Deserializes the recovered records, skipping entries that do not fit `T`.
    pub fn records<T: DeserializeOwned>(&self) -> Vec<T> {
        let Some(items) = self.value.as_array() else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| T::deserialize(item).ok())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Well-formed (or recoverable) data of the wrong structure.
pub enum DecodeShapeError {
    #[error("expected an array of records but found {found}")]
    NotAnArray { found: &'static str },
    #[error("expected an array of records but element {index} is {found}")]
    NonRecordElement { index: usize, found: &'static str },
}

/// Decodes `buffer` into the most complete value of `shape` available.
///
/// Never fails on syntax: truncated or malformed input degrades to the
/// longest valid prefix with `complete = false`. Only a structural mismatch
/// is reported as an error.
pub fn decode(buffer: &str, shape: ExpectedShape) -> Result<DecodeResult, DecodeShapeError> {
    match shape {
        ExpectedShape::Text => Ok(DecodeResult {
            value: Value::String(buffer.to_string()),
            complete: true,
        }),
        ExpectedShape::RecordArray => decode_record_array(buffer),
    }
}

fn decode_record_array(buffer: &str) -> Result<DecodeResult, DecodeShapeError> {
    let body = strip_code_fence(buffer);
    if body.is_empty() {
        return Ok(DecodeResult::empty_records());
    }

    if let Ok(value) = serde_json::from_str::<Value>(body) {
        ensure_record_array(&value)?;
        return Ok(DecodeResult {
            value,
            complete: true,
        });
    }

    if !body.starts_with('[') {
        let found = if body.starts_with('{') {
            "an object"
        } else {
            "text"
        };
        return Err(DecodeShapeError::NotAnArray { found });
    }

    for end in complete_element_offsets(body).into_iter().rev() {
        let candidate = format!("{}]", &body[..end]);
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            ensure_record_array(&value)?;
            return Ok(DecodeResult {
                value,
                complete: false,
            });
        }
    }

    Ok(DecodeResult::empty_records())
}

fn strip_code_fence(buffer: &str) -> &str {
    let mut body = buffer.trim();
    if CODE_FENCE.starts_with(body) {
        return "";
    }
    if let Some(rest) = body.strip_prefix(CODE_FENCE) {
        body = match rest.find('\n') {
            Some(pos) => rest[pos + 1..].trim_start(),
            // Single-line fence: drop the language tag, keep the rest.
            None => rest
                .trim_start_matches(|c: char| c.is_ascii_alphanumeric())
                .trim_start(),
        };
    }
    if let Some(rest) = body.strip_suffix(CODE_FENCE) {
        body = rest.trim_end();
    }
    body
}

/// Offsets `end` such that `body[..end]` holds only complete top-level array
/// elements. `body` must start with `[`; the first offset is always `1`.
fn complete_element_offsets(body: &str) -> Vec<usize> {
    let mut offsets = vec![1];
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (index, byte) in body.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
                if depth == 1 {
                    offsets.push(index + 1);
                }
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                let Some(next) = depth.checked_sub(1) else {
                    break;
                };
                depth = next;
                match depth {
                    0 => {
                        offsets.push(index);
                        break;
                    }
                    1 => offsets.push(index + 1),
                    _ => {}
                }
            }
            // Scalars are only known to be complete once a delimiter follows.
            b',' if depth == 1 => offsets.push(index),
            _ => {}
        }
    }

    offsets
}

fn ensure_record_array(value: &Value) -> Result<(), DecodeShapeError> {
    let Value::Array(items) = value else {
        return Err(DecodeShapeError::NotAnArray {
            found: json_kind(value),
        });
    };
    match items.iter().position(|item| !item.is_object()) {
        Some(index) => Err(DecodeShapeError::NonRecordElement {
            index,
            found: json_kind(&items[index]),
        }),
        None => Ok(()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
