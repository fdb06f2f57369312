//! Incremental JSON extraction
//!
//! Backends wrap structured payloads in prose or markdown fences and stream
//! them a few characters at a time. Extraction is attempted against the whole
//! buffer: direct parse, then a fenced block, then the first balanced
//! `{...}` span.

use serde_json::Value;
use tracing::debug;

use super::{DecodeError, Emission, Progress};

/// Try to pull one JSON object out of free-form text
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed)
        && value.is_object()
    {
        return Some(value);
    }

    if let Some(block) = fenced_block(trimmed)
        && let Ok(value) = serde_json::from_str::<Value>(block)
        && value.is_object()
    {
        return Some(value);
    }

    balanced_object(trimmed)
}

/// Body of the first closed ```json (or bare ```) block
fn fenced_block(text: &str) -> Option<&str> {
    let (start, skip) = match text.find("```json") {
        Some(i) => (i, 7),
        None => (text.find("```")?, 3),
    };
    let body = &text[start + skip..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

/// First `{...}` span that balances and parses as an object
///
/// A `{` not followed by `"` or `}` cannot open an object and is skipped. An
/// unbalanced object opener means everything after it is nested inside an
/// object that has not closed yet, so the scan stops there.
fn balanced_object(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut from = 0;

    while let Some(offset) = text[from..].find('{') {
        let start = from + offset;
        from = start + 1;
        if !opens_object(&text[from..]) {
            continue;
        }
        let end = matching_brace(&bytes[start..])? + start;
        if let Ok(value) = serde_json::from_str::<Value>(&text[start..=end])
            && value.is_object()
        {
            return Some(value);
        }
    }
    None
}

/// Whether the text after a `{` can continue a JSON object
///
/// Trailing whitespace counts, since a streamed key may not have arrived yet.
fn opens_object(rest: &str) -> bool {
    match rest.trim_start().chars().next() {
        Some(c) => c == '"' || c == '}',
        None => true,
    }
}

/// Index of the brace closing the one at position 0, respecting string literals
fn matching_brace(bytes: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Decoder for a streamed JSON object gated by a readiness key
#[derive(Debug)]
pub struct JsonDecoder {
    ready_key: String,
    buffer: String,
    last: Option<Value>,
    progress: Progress,
}

impl JsonDecoder {
    pub fn new(ready_key: impl Into<String>, expected_len: usize) -> Self {
        Self {
            ready_key: ready_key.into(),
            buffer: String::new(),
            last: None,
            progress: Progress::new(expected_len),
        }
    }

    /// Append a chunk; returns a snapshot when a new usable object appeared
    pub fn push(&mut self, chunk: &str) -> Option<Emission> {
        self.buffer.push_str(chunk);
        let progress = self.progress.update(self.buffer.len());

        // No object can have closed without a closing brace in this chunk
        if !chunk.contains('}') {
            return None;
        }

        let value = extract_json(&self.buffer)?;
        if value.get(&self.ready_key).is_none() {
            return None;
        }
        if self.last.as_ref() == Some(&value) {
            return None;
        }

        debug!(ready_key = %self.ready_key, progress, "JsonDecoder::push: snapshot");
        self.last = Some(value.clone());
        Some(Emission::Snapshot { value, progress })
    }

    /// Resolve the final value against the full buffer
    pub fn finish(&mut self) -> Result<Value, DecodeError> {
        debug!(len = self.buffer.len(), "JsonDecoder::finish: called");
        extract_json(&self.buffer).ok_or_else(|| DecodeError::MalformedOutput {
            reason: if self.buffer.trim().is_empty() {
                "empty response".to_string()
            } else {
                "no JSON object found in response".to_string()
            },
        })
    }

    pub fn raw(&self) -> &str {
        &self.buffer
    }

    pub fn progress(&self) -> u8 {
        self.progress.current()
    }
}
