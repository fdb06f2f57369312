//! Stream decoder
//!
//! Turns the text deltas of a generation call into structured values as soon
//! as they become usable. Two targets are supported: a JSON object gated by a
//! readiness key, and a fenced code block.

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::llm::StreamChunk;

mod fence;
mod json;

pub use fence::{FenceOutput, FenceState, FencedDecoder, step};
pub use json::{JsonDecoder, extract_json};

/// Size hint used for progress when the caller gives none
pub const DEFAULT_EXPECTED_LEN: usize = 4096;

/// Highest progress reported before the final value resolves
pub const STREAMING_PROGRESS_CAP: u8 = 90;

/// Shape the caller expects the stream to resolve to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A JSON object; snapshots only once `ready_key` is present
    Json { ready_key: String },
    /// A single fenced code block
    FencedCode,
}

impl Target {
    pub fn json(ready_key: impl Into<String>) -> Self {
        Target::Json {
            ready_key: ready_key.into(),
        }
    }
}

/// One decoder output
#[derive(Debug, Clone, PartialEq)]
pub enum Emission {
    /// A usable partial value
    Snapshot { value: Value, progress: u8 },
    /// The resolved value; always the last emission
    Final { value: Value },
}

impl Emission {
    pub fn progress(&self) -> u8 {
        match self {
            Emission::Snapshot { progress, .. } => *progress,
            Emission::Final { .. } => 100,
        }
    }

    pub fn value(&self) -> &Value {
        match self {
            Emission::Snapshot { value, .. } | Emission::Final { value } => value,
        }
    }
}

/// Errors that can occur while decoding a stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed output: {reason}")]
    MalformedOutput { reason: String },

    #[error("stream aborted")]
    Aborted,
}

/// Length-based progress estimate
///
/// Approximate: the true length is unknown until the stream ends.
#[derive(Debug, Clone)]
pub struct Progress {
    expected_len: usize,
    current: u8,
}

impl Progress {
    pub fn new(expected_len: usize) -> Self {
        Self {
            expected_len: expected_len.max(1),
            current: 0,
        }
    }

    /// Fold in the buffer length; never decreases and never passes the cap
    pub fn update(&mut self, len: usize) -> u8 {
        let estimate = (len.saturating_mul(100) / self.expected_len).min(STREAMING_PROGRESS_CAP as usize) as u8;
        self.current = self.current.max(estimate);
        self.current
    }

    pub fn current(&self) -> u8 {
        self.current
    }
}

/// Decoder for either target
#[derive(Debug)]
pub enum Decoder {
    Json(JsonDecoder),
    Fenced(FencedDecoder),
}

impl Decoder {
    pub fn new(target: &Target, expected_len: usize) -> Self {
        debug!(?target, expected_len, "Decoder::new: called");
        match target {
            Target::Json { ready_key } => Decoder::Json(JsonDecoder::new(ready_key.clone(), expected_len)),
            Target::FencedCode => Decoder::Fenced(FencedDecoder::new(expected_len)),
        }
    }

    pub fn push(&mut self, chunk: &str) -> Option<Emission> {
        match self {
            Decoder::Json(d) => d.push(chunk),
            Decoder::Fenced(d) => d.push(chunk),
        }
    }

    pub fn finish(&mut self) -> Result<Value, DecodeError> {
        match self {
            Decoder::Json(d) => d.finish(),
            Decoder::Fenced(d) => d.finish(),
        }
    }

    pub fn raw(&self) -> &str {
        match self {
            Decoder::Json(d) => d.raw(),
            Decoder::Fenced(d) => d.raw(),
        }
    }

    pub fn progress(&self) -> u8 {
        match self {
            Decoder::Json(d) => d.progress(),
            Decoder::Fenced(d) => d.progress(),
        }
    }

    /// Decode a complete, non-streamed response in one go
    pub fn decode_all(target: &Target, text: &str) -> Result<Value, DecodeError> {
        let mut decoder = Decoder::new(target, text.len());
        if let Some(Emission::Final { value }) = decoder.push(text) {
            return Ok(value);
        }
        decoder.finish()
    }
}

/// Drive a decoder from a chunk channel until the value resolves
///
/// Resolves early when a fenced block closes; otherwise when the sender side
/// closes. Once `cancel` fires nothing more is emitted and the call returns
/// `DecodeError::Aborted`.
pub async fn decode_stream<F>(
    decoder: &mut Decoder,
    chunks: &mut mpsc::Receiver<StreamChunk>,
    cancel: &CancellationToken,
    mut on_emission: F,
) -> Result<Value, DecodeError>
where
    F: FnMut(&Emission),
{
    debug!("decode_stream: called");
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("decode_stream: cancelled");
                return Err(DecodeError::Aborted);
            }
            chunk = chunks.recv() => chunk,
        };

        match chunk {
            Some(StreamChunk::TextDelta(text)) => match decoder.push(&text) {
                Some(Emission::Final { value }) => {
                    debug!("decode_stream: resolved before end of stream");
                    on_emission(&Emission::Final { value: value.clone() });
                    return Ok(value);
                }
                Some(snapshot) => on_emission(&snapshot),
                None => {}
            },
            Some(StreamChunk::MessageDone { .. }) | None => break,
            Some(StreamChunk::MessageStart { .. }) | Some(StreamChunk::Error(_)) => {}
        }
    }

    if cancel.is_cancelled() {
        return Err(DecodeError::Aborted);
    }
    let value = decoder.finish()?;
    debug!(len = decoder.raw().len(), "decode_stream: resolved at end of stream");
    on_emission(&Emission::Final { value: value.clone() });
    Ok(value)
}
