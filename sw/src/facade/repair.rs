//! Code-repair façade: review generated files, then fix the flagged ones

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::codegen::normalize_path;
use super::generator::{Call, Generator};
use super::{Facade, PhaseOutcome, RunOptions};
use crate::decode::Target;
use crate::error::{PersistenceError, PipelineError};
use crate::orchestrator::Phase;
use crate::prompts::Template;

const NAME: &str = "repair";
const REVIEW: &str = "repair.review";
const FIX: &str = "repair.fix";

const SYSTEM_PROMPT: &str = "You are a meticulous code reviewer. Follow the requested output format exactly.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairState {
    pub findings: Vec<Finding>,
    /// Fixed content by path; a later fix replaces an earlier one
    pub fixes: BTreeMap<String, String>,
    pub reviewed: bool,
}

impl RepairState {
    /// Flagged paths that have no fix yet
    pub fn unfixed(&self) -> BTreeSet<String> {
        self.findings
            .iter()
            .filter(|f| !self.fixes.contains_key(&f.path))
            .map(|f| f.path.clone())
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFinding {
    path: String,
    line: Option<Value>,
    message: String,
}

fn parse_findings(value: &Value) -> Vec<Finding> {
    let Some(list) = value.get("issues").and_then(Value::as_array) else {
        return Vec::new();
    };
    list.iter()
        .filter(|item| item.is_object())
        .filter_map(|item| serde_json::from_value::<RawFinding>(item.clone()).ok())
        .filter(|raw| !raw.message.trim().is_empty())
        .filter_map(|raw| {
            let line = match raw.line {
                Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
                Some(Value::String(s)) => s.trim().parse().ok(),
                _ => None,
            };
            Some(Finding {
                path: normalize_path(&raw.path)?,
                line,
                message: raw.message.trim().to_string(),
            })
        })
        .collect()
}

fn check_issues(value: &Value) -> Result<(), String> {
    match value.get("issues") {
        Some(Value::Array(_)) => Ok(()),
        _ => Err("\"issues\" must be a list".to_string()),
    }
}

fn check_code(value: &Value) -> Result<(), String> {
    match value.as_str() {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err("fixed file is empty".to_string()),
    }
}

/// Read a path -> content map; values may be strings or `{content}` objects
fn input_files(input: &Value) -> BTreeMap<String, String> {
    let files = input.get("files").unwrap_or(input);
    let Some(map) = files.as_object() else {
        return BTreeMap::new();
    };
    map.iter()
        .filter_map(|(path, entry)| {
            let content = match entry {
                Value::String(s) => s.clone(),
                other => other.get("content")?.as_str()?.to_string(),
            };
            Some((normalize_path(path)?, content))
        })
        .collect()
}

pub struct RepairFacade {
    generator: Arc<Generator>,
    state: RwLock<RepairState>,
}

impl RepairFacade {
    pub fn new(generator: Arc<Generator>) -> Self {
        Self {
            generator,
            state: RwLock::new(RepairState::default()),
        }
    }

    pub async fn state(&self) -> RepairState {
        self.state.read().await.clone()
    }

    /// Review a set of files, replacing earlier findings
    pub async fn review(&self, files: &BTreeMap<String, String>, options: &RunOptions) -> Result<Vec<Finding>, PipelineError> {
        debug!(files = files.len(), "review: called");
        let listing: Vec<Value> = files
            .iter()
            .map(|(path, content)| json!({ "path": path, "content": content }))
            .collect();
        let prompt = self.generator.render(REVIEW, Template::Review, &json!({ "files": listing }))?;
        let call = Call::new(REVIEW, Phase::Testing, SYSTEM_PROMPT, prompt, Target::json("issues"))
            .with_expected_len(1024)
            .with_check(check_issues);

        self.generator
            .generate(call, options, |value| async move {
                let findings = parse_findings(&value);
                let count = findings.len();
                {
                    let mut state = self.state.write().await;
                    state.findings = findings;
                    state.reviewed = true;
                }
                self.save().await;
                format!("{} findings", count)
            })
            .await?;

        Ok(self.state.read().await.findings.clone())
    }

    /// Fix one file against its findings
    pub async fn fix_file(
        &self,
        path: &str,
        content: &str,
        issues: &[Finding],
        options: &RunOptions,
    ) -> Result<String, PipelineError> {
        debug!(%path, issues = issues.len(), "fix_file: called");
        let issue_list: Vec<Value> = issues
            .iter()
            .map(|f| json!({ "line": f.line, "message": f.message }))
            .collect();
        let prompt = self.generator.render(
            FIX,
            Template::Fix,
            &json!({ "path": path, "content": content, "issues": issue_list }),
        )?;
        let call = Call::new(FIX, Phase::Testing, SYSTEM_PROMPT, prompt, Target::FencedCode)
            .with_expected_len(content.len().max(256))
            .with_check(check_code);

        let key = path.to_string();
        let cached = self
            .generator
            .generate(call, options, |value| async move {
                let fixed = value.as_str().unwrap_or_default().to_string();
                self.state.write().await.fixes.insert(key.clone(), fixed);
                self.save().await;
                format!("{} fixed", key)
            })
            .await?;

        Ok(cached.value.as_str().unwrap_or_default().to_string())
    }

    async fn save(&self) {
        let snapshot = self.snapshot().await;
        self.generator.persist(NAME, snapshot).await;
    }
}

#[async_trait]
impl Facade for RepairFacade {
    fn phase(&self) -> Phase {
        Phase::Testing
    }

    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, input: Value, options: &RunOptions) -> Result<PhaseOutcome, PipelineError> {
        let mut files = input_files(&input);
        if files.is_empty() {
            return Err(PipelineError::Internal {
                operation: REVIEW.to_string(),
                message: "repair needs a file map as input".to_string(),
            });
        }

        let findings = self.review(&files, options).await?;
        let mut by_path: BTreeMap<&str, Vec<Finding>> = BTreeMap::new();
        for finding in &findings {
            by_path.entry(finding.path.as_str()).or_default().push(finding.clone());
        }

        for (path, issues) in &by_path {
            let Some(content) = files.get(*path).cloned() else {
                warn!(%path, "Finding for a file that was not reviewed");
                continue;
            };
            let fixed = self.fix_file(path, &content, issues, options).await?;
            files.insert(path.to_string(), fixed);
        }

        let unfixed = self.state.read().await.unfixed();
        let output = json!({ "files": files, "findings": findings });
        info!(findings = findings.len(), unfixed = unfixed.len(), "Repair phase ran");

        if unfixed.is_empty() {
            Ok(PhaseOutcome::Completed {
                summary: format!("{} findings, {} files fixed", findings.len(), by_path.len()),
                output,
            })
        } else {
            Ok(PhaseOutcome::Incomplete {
                summary: format!("{} flagged files could not be fixed", unfixed.len()),
                output,
            })
        }
    }

    async fn snapshot(&self) -> Value {
        serde_json::to_value(&*self.state.read().await).unwrap_or_default()
    }

    async fn restore(&self, snapshot: Value) -> Result<(), PipelineError> {
        let restored: RepairState = serde_json::from_value(snapshot).map_err(|e| PipelineError::Persistence {
            operation: format!("{}.restore", NAME),
            source: PersistenceError::Serde(e),
        })?;
        *self.state.write().await = restored;
        Ok(())
    }
}
