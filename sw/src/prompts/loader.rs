//! Prompt Loader
//!
//! Loads prompt templates from files or falls back to embedded defaults.

use std::path::{Path, PathBuf};

use eyre::{Result, eyre};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use super::embedded;

/// The templates façades render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Requirements,
    Validate,
    Diagram,
    Structure,
    File,
    Review,
    Fix,
}

impl Template {
    pub const ALL: [Template; 7] = [
        Template::Requirements,
        Template::Validate,
        Template::Diagram,
        Template::Structure,
        Template::File,
        Template::Review,
        Template::Fix,
    ];

    /// File stem of the template
    pub fn name(&self) -> &'static str {
        match self {
            Self::Requirements => "requirements",
            Self::Validate => "validate",
            Self::Diagram => "diagram",
            Self::Structure => "structure",
            Self::File => "file",
            Self::Review => "review",
            Self::Fix => "fix",
        }
    }
}

impl std::fmt::Display for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Loads and renders prompt templates
pub struct PromptLoader {
    /// Handlebars template engine
    hbs: Handlebars<'static>,
    /// User override directory (e.g., `.specweaver/prompts/`)
    user_dir: Option<PathBuf>,
    /// Repo default directory (e.g., `prompts/`)
    repo_dir: Option<PathBuf>,
}

fn engine() -> Handlebars<'static> {
    let mut hbs = Handlebars::new();
    // Prompts are plain text, not HTML
    hbs.register_escape_fn(handlebars::no_escape);
    hbs
}

impl PromptLoader {
    /// Create a new prompt loader rooted at a project directory
    ///
    /// # Arguments
    /// * `root` - The project root (used to find `.specweaver/prompts/` and `prompts/`)
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        debug!(?root, "PromptLoader::new: called");
        let user_dir = root.join(".specweaver/prompts");
        let repo_dir = root.join("prompts");

        let user_dir_exists = user_dir.exists();
        let repo_dir_exists = repo_dir.exists();
        debug!(
            ?user_dir,
            %user_dir_exists,
            ?repo_dir,
            %repo_dir_exists,
            "PromptLoader::new: checking directories"
        );

        Self {
            hbs: engine(),
            user_dir: if user_dir_exists { Some(user_dir) } else { None },
            repo_dir: if repo_dir_exists { Some(repo_dir) } else { None },
        }
    }

    /// Create a loader that only uses embedded prompts (for testing)
    pub fn embedded_only() -> Self {
        debug!("PromptLoader::embedded_only: called");
        Self {
            hbs: engine(),
            user_dir: None,
            repo_dir: None,
        }
    }

    /// Load a template by name
    ///
    /// Checks in order:
    /// 1. User override: `.specweaver/prompts/{name}.pmt`
    /// 2. Repo default: `prompts/{name}.pmt`
    /// 3. Embedded fallback
    fn load_template(&self, name: &str) -> Result<String> {
        debug!(%name, "PromptLoader::load_template: called");
        for dir in [&self.user_dir, &self.repo_dir].into_iter().flatten() {
            let path = dir.join(format!("{}.pmt", name));
            if path.exists() {
                debug!(?path, "PromptLoader::load_template: found on disk");
                return std::fs::read_to_string(&path)
                    .map_err(|e| eyre!("Failed to read prompt {}: {}", path.display(), e));
            }
        }

        if let Some(content) = embedded::get_embedded(name) {
            debug!(%name, "PromptLoader::load_template: found in embedded");
            return Ok(content.to_string());
        }

        debug!(%name, "PromptLoader::load_template: not found anywhere");
        Err(eyre!("Prompt template not found: {}", name))
    }

    /// Render a template with the given context
    pub fn render<T: Serialize>(&self, template: Template, context: &T) -> Result<String> {
        debug!(%template, "PromptLoader::render: called");
        let source = self.load_template(template.name())?;
        self.hbs
            .render_template(&source, context)
            .map_err(|e| eyre!("Failed to render template {}: {}", template, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_render_embedded_requirements() {
        let loader = PromptLoader::embedded_only();
        let prompt = loader
            .render(Template::Requirements, &json!({"text": "Build a login form"}))
            .unwrap();
        assert!(prompt.contains("Build a login form"));
        assert!(prompt.contains("FR-1"));
    }

    #[test]
    fn test_render_does_not_escape() {
        let loader = PromptLoader::embedded_only();
        let prompt = loader
            .render(
                Template::Fix,
                &json!({
                    "path": "src/a.ts",
                    "content": "if (a < b && c) {}",
                    "issues": [{"line": 3, "message": "x"}, {"message": "y"}],
                }),
            )
            .unwrap();
        assert!(prompt.contains("if (a < b && c) {}"));
        assert!(prompt.contains("line 3: x"));
        assert!(prompt.contains("- y"));
    }

    #[test]
    fn test_all_templates_render() {
        let loader = PromptLoader::embedded_only();
        for template in Template::ALL {
            assert!(loader.render(template, &json!({})).is_ok(), "{} failed", template);
        }
    }

    #[test]
    fn test_user_override_wins() {
        let temp = tempdir().unwrap();
        let user = temp.path().join(".specweaver/prompts");
        let repo = temp.path().join("prompts");
        std::fs::create_dir_all(&user).unwrap();
        std::fs::create_dir_all(&repo).unwrap();
        std::fs::write(user.join("review.pmt"), "user {{n}}").unwrap();
        std::fs::write(repo.join("review.pmt"), "repo {{n}}").unwrap();
        std::fs::write(repo.join("fix.pmt"), "repo fix").unwrap();

        let loader = PromptLoader::new(temp.path());
        assert_eq!(loader.render(Template::Review, &json!({"n": 1})).unwrap(), "user 1");
        assert_eq!(loader.render(Template::Fix, &json!({})).unwrap(), "repo fix");
        // Falls through to embedded
        assert!(loader.render(Template::Validate, &json!({})).unwrap().contains("issues"));
    }

    #[test]
    fn test_unknown_template() {
        let loader = PromptLoader::embedded_only();
        assert!(loader.load_template("nonexistent-template").is_err());
    }
}
