//! Embedded prompts
//!
//! These are compiled into the binary from .pmt files at build time.

use tracing::debug;

pub const REQUIREMENTS: &str = include_str!("../../prompts/requirements.pmt");

pub const VALIDATE: &str = include_str!("../../prompts/validate.pmt");

pub const DIAGRAM: &str = include_str!("../../prompts/diagram.pmt");

pub const STRUCTURE: &str = include_str!("../../prompts/structure.pmt");

/// Single source file generation
pub const FILE: &str = include_str!("../../prompts/file.pmt");

pub const REVIEW: &str = include_str!("../../prompts/review.pmt");

pub const FIX: &str = include_str!("../../prompts/fix.pmt");

/// Get the embedded prompt by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    match name {
        "requirements" => Some(REQUIREMENTS),
        "validate" => Some(VALIDATE),
        "diagram" => Some(DIAGRAM),
        "structure" => Some(STRUCTURE),
        "file" => Some(FILE),
        "review" => Some(REVIEW),
        "fix" => Some(FIX),
        _ => {
            debug!("get_embedded: no match found");
            None
        }
    }
}
