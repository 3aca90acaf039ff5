//! Byte-level framing for streamed response bodies.
//!
//! [`SseFrameDecoder`] turns `text/event-stream` bytes into event payloads;
//! [`Utf8ChunkDecoder`] turns a raw body into text without splitting
//! multi-byte characters across reads.

/// Payload that ends an event stream early.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Default)]
/// Incremental server-sent-events parser.
pub struct SseFrameDecoder {
    pending: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw body bytes and returns the payloads of every event completed
    /// by them, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(pos) = self.pending.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(line.as_ref());
            self.apply_line(line, &mut payloads);
        }
        payloads
    }

    /// Flushes an unterminated trailing line and any undispatched event.
    pub fn finish(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        if !self.pending.is_empty() {
            let raw = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&raw);
            let line = line.strip_suffix('\r').unwrap_or(line.as_ref());
            self.apply_line(line, &mut payloads);
        }
        self.dispatch(&mut payloads);
        payloads
    }

    fn apply_line(&mut self, line: &str, payloads: &mut Vec<String>) {
        if line.is_empty() {
            self.dispatch(payloads);
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data_lines.push(value.to_string());
        }
    }

    fn dispatch(&mut self, payloads: &mut Vec<String>) {
        if self.data_lines.is_empty() {
            return;
        }
        payloads.push(self.data_lines.join("\n"));
        self.data_lines.clear();
    }
}

#[derive(Debug, Default)]
/// Incremental UTF-8 decoder for raw text bodies.
pub struct Utf8ChunkDecoder {
    carry: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the text completed by `bytes`; an incomplete trailing
    /// character is held back until the next call.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.carry) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.carry.clear();
                    return text;
                }
                Err(error) => {
                    let valid = error.valid_up_to();
                    let Some(invalid) = error.error_len() else {
                        text.push_str(&String::from_utf8_lossy(&self.carry[..valid]));
                        self.carry.drain(..valid);
                        return text;
                    };
                    text.push_str(&String::from_utf8_lossy(&self.carry[..valid + invalid]));
                    self.carry.drain(..valid + invalid);
                }
            }
        }
    }

    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        text
    }
}
