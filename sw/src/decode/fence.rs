//! Fenced-code state machine
//!
//! `step` is pure: it takes the current state and one chunk and returns the
//! next state plus at most one output. Fence markers may be split across
//! chunks, so each state keeps the unconsumed tail it still needs to look at.

use serde_json::Value;
use tracing::debug;

use super::{DecodeError, Emission, Progress};

const FENCE: &str = "```";

/// Decoder state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FenceState {
    /// No fence seen yet; everything received so far
    Idle { seen: String },
    /// Inside a fence
    InFence {
        /// Code accepted so far
        code: String,
        /// Whether the opening line (language tag) has been consumed
        header_done: bool,
        /// Text held back: the partial header line, or trailing backticks
        /// that might be the start of the closing fence
        pending: String,
    },
    /// Closing fence seen; further input is discarded
    Resolved { code: String },
}

impl Default for FenceState {
    fn default() -> Self {
        FenceState::Idle { seen: String::new() }
    }
}

/// What one step produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FenceOutput {
    /// More code arrived inside the fence
    Partial(String),
    /// The fence closed; this is the final code
    Closed(String),
}

/// Advance the machine by one chunk
pub fn step(state: FenceState, chunk: &str) -> (FenceState, Option<FenceOutput>) {
    match state {
        FenceState::Idle { mut seen } => {
            // A marker split across chunks can start at most two bytes back
            let mut from = seen.len().saturating_sub(FENCE.len() - 1);
            while !seen.is_char_boundary(from) {
                from -= 1;
            }
            seen.push_str(chunk);

            match seen[from..].find(FENCE) {
                Some(offset) => {
                    let rest = seen[from + offset + FENCE.len()..].to_string();
                    let opened = FenceState::InFence {
                        code: String::new(),
                        header_done: false,
                        pending: String::new(),
                    };
                    step(opened, &rest)
                }
                None => (FenceState::Idle { seen }, None),
            }
        }
        FenceState::InFence {
            mut code,
            header_done,
            mut pending,
        } => {
            pending.push_str(chunk);

            if !header_done {
                let Some(nl) = pending.find('\n') else {
                    // Fence closed on its opening line: ```inline```
                    if let Some(end) = pending.find(FENCE) {
                        let code = pending[..end].trim().to_string();
                        return (FenceState::Resolved { code: code.clone() }, Some(FenceOutput::Closed(code)));
                    }
                    return (
                        FenceState::InFence {
                            code,
                            header_done: false,
                            pending,
                        },
                        None,
                    );
                };
                let header = pending[..nl].trim();
                let body = if is_language_tag(header) {
                    pending[nl + 1..].to_string()
                } else {
                    // Code started on the fence line itself
                    pending.trim_start_matches([' ', '\t']).to_string()
                };
                let opened = FenceState::InFence {
                    code,
                    header_done: true,
                    pending: String::new(),
                };
                return step(opened, &body);
            }

            if let Some(end) = pending.find(FENCE) {
                code.push_str(&pending[..end]);
                let code = strip_final_newline(code);
                debug!(len = code.len(), "step: fence closed");
                return (FenceState::Resolved { code: code.clone() }, Some(FenceOutput::Closed(code)));
            }

            // Hold back trailing backticks; they may begin the closing fence
            let held = pending.len() - pending.trim_end_matches('`').len();
            let split = pending.len() - held.min(FENCE.len() - 1);
            let grew = split > 0;
            code.push_str(&pending[..split]);
            let pending = pending[split..].to_string();

            let output = grew.then(|| FenceOutput::Partial(code.clone()));
            (
                FenceState::InFence {
                    code,
                    header_done: true,
                    pending,
                },
                output,
            )
        }
        resolved @ FenceState::Resolved { .. } => (resolved, None),
    }
}

/// Whether the text after an opening fence is a language tag
fn is_language_tag(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-' | '.' | '#'))
}

fn strip_final_newline(mut code: String) -> String {
    if code.ends_with('\n') {
        code.pop();
        if code.ends_with('\r') {
            code.pop();
        }
    }
    code
}

/// Trim blank lines around unfenced output, keeping indentation
fn trim_blank_lines(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let first = lines.iter().position(|l| !l.trim().is_empty());
    let last = lines.iter().rposition(|l| !l.trim().is_empty());
    match (first, last) {
        (Some(first), Some(last)) => lines[first..=last].join("\n"),
        _ => String::new(),
    }
}

/// Decoder for a streamed fenced code block
#[derive(Debug)]
pub struct FencedDecoder {
    state: FenceState,
    raw: String,
    progress: Progress,
}

impl FencedDecoder {
    pub fn new(expected_len: usize) -> Self {
        Self {
            state: FenceState::default(),
            raw: String::new(),
            progress: Progress::new(expected_len),
        }
    }

    pub fn push(&mut self, chunk: &str) -> Option<Emission> {
        if matches!(self.state, FenceState::Resolved { .. }) {
            return None;
        }
        self.raw.push_str(chunk);
        let progress = self.progress.update(self.raw.len());

        let (next, output) = step(std::mem::take(&mut self.state), chunk);
        self.state = next;
        match output? {
            FenceOutput::Partial(code) => Some(Emission::Snapshot {
                value: Value::String(code),
                progress,
            }),
            FenceOutput::Closed(code) => Some(Emission::Final {
                value: Value::String(code),
            }),
        }
    }

    /// Resolve the final code
    ///
    /// Unfenced output is taken as code-only. A fence that never closed
    /// yields whatever was inside it.
    pub fn finish(&mut self) -> Result<Value, DecodeError> {
        let code = match &self.state {
            FenceState::Resolved { code } => code.clone(),
            FenceState::Idle { seen } => trim_blank_lines(seen),
            FenceState::InFence {
                code,
                header_done,
                pending,
            } => {
                if *header_done {
                    strip_final_newline(format!("{}{}", code, pending))
                } else {
                    String::new()
                }
            }
        };
        if code.trim().is_empty() {
            return Err(DecodeError::MalformedOutput {
                reason: "no code in response".to_string(),
            });
        }
        Ok(Value::String(code))
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, FenceState::Resolved { .. })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn progress(&self) -> u8 {
        self.progress.current()
    }
}
