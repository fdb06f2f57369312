//! Prompt Template System
//!
//! Loads and renders `.pmt` (prompt template) files for the façades.
//!
//! Template loading chain:
//! 1. `.specweaver/prompts/{name}.pmt` (user override)
//! 2. `prompts/{name}.pmt` (repo default)
//! 3. Embedded fallback in code
//!
//! Templates use Handlebars syntax for variable substitution.

pub mod embedded;
mod loader;

pub use loader::{PromptLoader, Template};
