//! Code-generation façade
//!
//! Plans a source tree, classifies every planned file once from its path,
//! then generates files one task at a time into a map keyed by path.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::generator::{Call, Generator};
use super::requirements::brief;
use super::{Facade, PhaseOutcome, RunOptions};
use crate::cache::Cached;
use crate::decode::Target;
use crate::error::{PersistenceError, PipelineError};
use crate::orchestrator::Phase;
use crate::prompts::Template;

const NAME: &str = "codegen";
const STRUCTURE: &str = "codegen.structure";
const FILE: &str = "codegen.file";

const SYSTEM_PROMPT: &str = "You are a senior software engineer. Follow the requested output format exactly.";

/// What a file is, decided once from its path when it is planned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileKind {
    Component,
    ApiRoute,
    Model,
    Config,
    Test,
    Style,
    Other,
}

const TEST_DIRS: &[&str] = &["test", "tests", "__tests__", "spec", "specs"];
const API_DIRS: &[&str] = &["api", "routes", "handlers", "controllers", "endpoints"];
const MODEL_DIRS: &[&str] = &["model", "models", "schema", "schemas", "entities", "types"];
const STYLE_EXTS: &[&str] = &["css", "scss", "sass", "less", "styl"];
const CONFIG_EXTS: &[&str] = &["toml", "yaml", "yml", "ini", "json", "env", "lock"];
const COMPONENT_EXTS: &[&str] = &["tsx", "jsx", "vue", "svelte"];
const COMPONENT_DIRS: &[&str] = &["components", "views", "pages"];

impl FileKind {
    /// Classify a normalised relative path
    ///
    /// Rules apply in order: test, style, config, api route, model, component.
    pub fn classify(path: &str) -> Self {
        let lower = path.to_ascii_lowercase();
        let segments: Vec<&str> = lower.split('/').collect();
        let (file, dirs) = match segments.split_last() {
            Some((file, dirs)) => (*file, dirs),
            None => return FileKind::Other,
        };
        let (stem, ext) = match file.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, ext),
            _ => (file, ""),
        };
        let in_dir = |names: &[&str]| dirs.iter().any(|d| names.contains(d));

        if in_dir(TEST_DIRS)
            || stem.ends_with(".test")
            || stem.ends_with(".spec")
            || stem.starts_with("test_")
            || stem.ends_with("_test")
        {
            FileKind::Test
        } else if STYLE_EXTS.contains(&ext) {
            FileKind::Style
        } else if CONFIG_EXTS.contains(&ext) || stem.ends_with(".config") || file.starts_with(".env") || file == "dockerfile" {
            FileKind::Config
        } else if in_dir(API_DIRS) {
            FileKind::ApiRoute
        } else if in_dir(MODEL_DIRS) {
            FileKind::Model
        } else if COMPONENT_EXTS.contains(&ext) || in_dir(COMPONENT_DIRS) {
            FileKind::Component
        } else {
            FileKind::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Component => "component",
            FileKind::ApiRoute => "api-route",
            FileKind::Model => "model",
            FileKind::Config => "config",
            FileKind::Test => "test",
            FileKind::Style => "style",
            FileKind::Other => "other",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalise a model-supplied path to a relative forward-slash path
///
/// Returns `None` for empty paths and paths escaping the project root.
pub(crate) fn normalize_path(raw: &str) -> Option<String> {
    let cleaned = raw.trim().replace('\\', "/");
    let mut segments = Vec::new();
    for segment in cleaned.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedFile {
    pub path: String,
    pub purpose: String,
    pub kind: FileKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub content: String,
    pub kind: FileKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenState {
    pub plan: Vec<PlannedFile>,
    pub dependencies: BTreeMap<String, String>,
    pub files: BTreeMap<String, GeneratedFile>,
}

impl CodegenState {
    /// Planned paths without generated content
    pub fn pending(&self) -> Vec<String> {
        self.plan
            .iter()
            .filter(|f| !self.files.contains_key(&f.path))
            .map(|f| f.path.clone())
            .collect()
    }

    /// Plain path -> content map
    pub fn file_map(&self) -> BTreeMap<String, String> {
        self.files.iter().map(|(path, f)| (path.clone(), f.content.clone())).collect()
    }

    fn merge_plan(&mut self, files: Vec<PlannedFile>, dependencies: BTreeMap<String, String>) -> usize {
        let before = self.plan.len();
        let mut known: HashSet<String> = self.plan.iter().map(|f| f.path.clone()).collect();
        for file in files {
            if known.insert(file.path.clone()) {
                self.plan.push(file);
            }
        }
        for (name, version) in dependencies {
            self.dependencies.entry(name).or_insert(version);
        }
        self.plan.len() - before
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPlanned {
    path: String,
    purpose: String,
}

fn parse_plan(value: &Value) -> (Vec<PlannedFile>, BTreeMap<String, String>) {
    let files = value
        .get("files")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|item| match item {
                    Value::String(path) => Some(RawPlanned {
                        path: path.clone(),
                        purpose: String::new(),
                    }),
                    Value::Object(_) => serde_json::from_value::<RawPlanned>(item.clone()).ok(),
                    _ => None,
                })
                .filter_map(|raw| {
                    let path = normalize_path(&raw.path)?;
                    Some(PlannedFile {
                        kind: FileKind::classify(&path),
                        purpose: raw.purpose.trim().to_string(),
                        path,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let dependencies = value
        .get("dependencies")
        .and_then(Value::as_object)
        .map(|deps| {
            deps.iter()
                .map(|(name, version)| {
                    let version = match version {
                        Value::String(v) => v.clone(),
                        other => other.to_string(),
                    };
                    (name.clone(), version)
                })
                .collect()
        })
        .unwrap_or_default();

    (files, dependencies)
}

fn check_plan(value: &Value) -> Result<(), String> {
    match value.get("files") {
        Some(Value::Array(_)) => Ok(()),
        _ => Err("\"files\" must be a list".to_string()),
    }
}

fn check_code(value: &Value) -> Result<(), String> {
    match value.as_str() {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err("generated file is empty".to_string()),
    }
}

/// Render the design phase's diagrams as prompt notes
fn design_notes(input: &Value) -> Option<String> {
    let diagrams = input.get("diagrams")?.as_object()?;
    let notes: Vec<String> = diagrams
        .iter()
        .filter_map(|(kind, source)| Some(format!("{} diagram:\n{}", kind, source.as_str()?)))
        .collect();
    if notes.is_empty() { None } else { Some(notes.join("\n\n")) }
}

pub struct CodegenFacade {
    generator: Arc<Generator>,
    state: RwLock<CodegenState>,
}

impl CodegenFacade {
    pub fn new(generator: Arc<Generator>) -> Self {
        Self {
            generator,
            state: RwLock::new(CodegenState::default()),
        }
    }

    pub async fn state(&self) -> CodegenState {
        self.state.read().await.clone()
    }

    /// Plan the source tree; planned paths merge first-write-wins
    pub async fn plan_structure(
        &self,
        requirements: &str,
        design: Option<&str>,
        options: &RunOptions,
    ) -> Result<Vec<PlannedFile>, PipelineError> {
        debug!(has_design = design.is_some(), "plan_structure: called");
        let prompt = self.generator.render(
            STRUCTURE,
            Template::Structure,
            &json!({ "requirements": requirements, "design": design }),
        )?;
        let call = Call::new(STRUCTURE, Phase::Codegen, SYSTEM_PROMPT, prompt, Target::json("files"))
            .with_expected_len(2048)
            .with_check(check_plan);

        self.generator
            .generate(call, options, |value| async move {
                let (files, dependencies) = parse_plan(&value);
                let total = files.len();
                let added = self.state.write().await.merge_plan(files, dependencies);
                self.save().await;
                format!("{} files planned ({} new)", total, added)
            })
            .await?;

        Ok(self.state.read().await.plan.clone())
    }

    /// Generate one planned file; replaces any earlier content for the path
    pub async fn generate_file(&self, path: &str, requirements: &str, options: &RunOptions) -> Result<Cached, PipelineError> {
        debug!(%path, "generate_file: called");
        let (planned, siblings) = {
            let state = self.state.read().await;
            let planned = state.plan.iter().find(|f| f.path == path).cloned();
            let siblings: Vec<String> = state
                .plan
                .iter()
                .filter(|f| f.path != path)
                .map(|f| f.path.clone())
                .collect();
            (planned, siblings)
        };
        let planned = planned.ok_or_else(|| PipelineError::Internal {
            operation: FILE.to_string(),
            message: format!("{} is not in the structure plan", path),
        })?;

        let context = json!({
            "path": planned.path,
            "kind": planned.kind.as_str(),
            "purpose": planned.purpose,
            "siblings": siblings,
            "requirements": requirements,
        });
        let prompt = self.generator.render(FILE, Template::File, &context)?;
        let call = Call::new(FILE, Phase::Codegen, SYSTEM_PROMPT, prompt, Target::FencedCode)
            .with_expected_len(3072)
            .with_check(check_code);

        let kind = planned.kind;
        let path = planned.path.clone();
        self.generator
            .generate(call, options, |value| async move {
                let content = value.as_str().unwrap_or_default().to_string();
                let lines = content.lines().count();
                self.state
                    .write()
                    .await
                    .files
                    .insert(path.clone(), GeneratedFile { content, kind });
                self.save().await;
                format!("{} ({} lines)", path, lines)
            })
            .await
    }

    async fn save(&self) {
        let snapshot = self.snapshot().await;
        self.generator.persist(NAME, snapshot).await;
    }
}

#[async_trait]
impl Facade for CodegenFacade {
    fn phase(&self) -> Phase {
        Phase::Codegen
    }

    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, input: Value, options: &RunOptions) -> Result<PhaseOutcome, PipelineError> {
        let requirements_input = input.get("requirements").cloned().unwrap_or_else(|| input.clone());
        let requirements = brief(&requirements_input);
        if requirements_input.is_null() || requirements.trim().is_empty() {
            return Err(PipelineError::Internal {
                operation: STRUCTURE.to_string(),
                message: "code generation needs the requirements as input".to_string(),
            });
        }
        let design = design_notes(&input);

        let plan = self.plan_structure(&requirements, design.as_deref(), options).await?;
        if plan.is_empty() {
            warn!("Structure plan has no files");
            return Ok(PhaseOutcome::Incomplete {
                summary: "structure plan has no files".to_string(),
                output: json!({ "files": {}, "requirements": requirements_input }),
            });
        }

        for file in &plan {
            self.generate_file(&file.path, &requirements, options).await?;
        }

        let state = self.state.read().await;
        let pending = state.pending();
        let output = json!({
            "files": state.file_map(),
            "dependencies": state.dependencies,
            "requirements": requirements_input,
        });
        info!(files = state.files.len(), pending = pending.len(), "Codegen phase ran");

        if pending.is_empty() {
            Ok(PhaseOutcome::Completed {
                summary: format!("{} files generated", state.files.len()),
                output,
            })
        } else {
            Ok(PhaseOutcome::Incomplete {
                summary: format!("{} files pending", pending.len()),
                output,
            })
        }
    }

    async fn snapshot(&self) -> Value {
        serde_json::to_value(&*self.state.read().await).unwrap_or_default()
    }

    async fn restore(&self, snapshot: Value) -> Result<(), PipelineError> {
        let restored: CodegenState = serde_json::from_value(snapshot).map_err(|e| PipelineError::Persistence {
            operation: format!("{}.restore", NAME),
            source: PersistenceError::Serde(e),
        })?;
        *self.state.write().await = restored;
        Ok(())
    }
}
