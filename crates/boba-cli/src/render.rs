use std::{io::Write, sync::Mutex};

use boba_session::SessionEvent;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RenderedOutput {
    Stdout(String),
    Stderr(String),
}

/// Turns session events into terminal output, printing each record once as
/// soon as it is complete and text as it grows. Record arrays and text are
/// told apart by the decoded value, so one session can mix both.
#[derive(Debug, Default)]
pub(crate) struct TurnRenderer {
    attempt: u64,
    records_printed: usize,
    text_printed: usize,
}

impl TurnRenderer {
    pub(crate) fn render(&mut self, event: &SessionEvent) -> Vec<RenderedOutput> {
        if let SessionEvent::TurnStarted { attempt, .. } = event {
            self.attempt = *attempt;
            self.records_printed = 0;
            self.text_printed = 0;
            return Vec::new();
        }
        if event.attempt() != self.attempt {
            return Vec::new();
        }

        match event {
            SessionEvent::Decoded { result, .. } => self.render_value(&result.value),
            SessionEvent::ShapeWarning { error, .. } => {
                vec![RenderedOutput::Stderr(format!("warning: {error}"))]
            }
            SessionEvent::Finished {
                result, reliable, ..
            } => {
                let mut output = self.render_value(&result.value);
                if result.value.is_string() {
                    output.push(RenderedOutput::Stdout("\n".to_string()));
                }
                if !reliable {
                    output.push(RenderedOutput::Stderr(
                        "warning: reply did not match the expected shape".to_string(),
                    ));
                }
                output
            }
            _ => Vec::new(),
        }
    }

    fn render_value(&mut self, value: &Value) -> Vec<RenderedOutput> {
        match value {
            Value::Array(records) => {
                let fresh = records
                    .iter()
                    .enumerate()
                    .skip(self.records_printed)
                    .map(|(index, record)| RenderedOutput::Stdout(format_record(index, record)))
                    .collect::<Vec<_>>();
                self.records_printed = self.records_printed.max(records.len());
                fresh
            }
            Value::String(text) => {
                let delta = text.get(self.text_printed..).unwrap_or_default();
                self.text_printed = text.len();
                if delta.is_empty() {
                    Vec::new()
                } else {
                    vec![RenderedOutput::Stdout(delta.to_string())]
                }
            }
            _ => Vec::new(),
        }
    }
}

fn format_record(index: usize, record: &Value) -> String {
    if let Some(question) = record.get("question").and_then(Value::as_str) {
        let answer = record.get("answer").and_then(Value::as_str).unwrap_or_default();
        return format!("{}. {question}\n   answer: {answer}\n", index + 1);
    }
    match record.get("title").and_then(Value::as_str) {
        Some(title) => format!("{}. {title}\n", index + 1),
        None => format!("{}. {record}\n", index + 1),
    }
}

/// Renders through a renderer shared with the event callback. A panic in an
/// earlier render poisons the lock but leaves the counters usable.
pub(crate) fn render_shared(
    renderer: &Mutex<TurnRenderer>,
    event: &SessionEvent,
) -> Vec<RenderedOutput> {
    let mut renderer = renderer
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    renderer.render(event)
}

pub(crate) fn write_rendered(output: &[RenderedOutput]) {
    let mut stdout = std::io::stdout().lock();
    for item in output {
        match item {
            RenderedOutput::Stdout(text) => {
                let _ = stdout.write_all(text.as_bytes());
            }
            RenderedOutput::Stderr(text) => eprintln!("{text}"),
        }
    }
    let _ = stdout.flush();
}
