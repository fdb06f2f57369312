//! Requirements façade
//!
//! Extracts functional and non-functional requirements from free text and
//! validates them. Requirement ids are normalised to `FR-<n>` / `NFR-<n>`
//! against everything already merged; a record whose content is already
//! present is skipped, so re-delivering a result adds nothing.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::generator::{Call, Generator};
use super::{Facade, PhaseOutcome, RunOptions, input_text};
use crate::cache::Cached;
use crate::decode::Target;
use crate::error::{PersistenceError, PipelineError};
use crate::orchestrator::Phase;
use crate::prompts::Template;

const NAME: &str = "requirements";
const EXTRACT: &str = "requirements.extract";
const VALIDATE: &str = "requirements.validate";

const SYSTEM_PROMPT: &str = "You are a senior requirements analyst. Answer only with the JSON document requested.";

// Constant pattern; compiling it cannot fail
static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(N?FR)-0*(\d+)\s*$").expect("valid requirement id pattern"));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" | "critical" | "must" => Priority::High,
            "low" | "could" | "nice-to-have" => Priority::Low,
            _ => Priority::Medium,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    #[default]
    Warning,
    Info,
}

impl Severity {
    fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" | "critical" | "blocker" => Severity::Error,
            "info" | "note" => Severity::Info,
            _ => Severity::Warning,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionalRequirement {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonFunctionalRequirement {
    pub id: String,
    pub category: String,
    pub description: String,
}

/// Lowercased text with whitespace runs collapsed
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

impl FunctionalRequirement {
    fn content_key(&self) -> String {
        format!("{}\n{}", normalize(&self.title), normalize(&self.description))
    }
}

impl NonFunctionalRequirement {
    fn content_key(&self) -> String {
        format!("{}\n{}", normalize(&self.category), normalize(&self.description))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Requirement the issue concerns, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub severity: Severity,
    pub message: String,
}

/// Merged requirements of one workflow run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequirementsState {
    pub functional: Vec<FunctionalRequirement>,
    pub non_functional: Vec<NonFunctionalRequirement>,
    pub issues: Vec<ValidationIssue>,
    /// Set when the last validation found no error-severity issue
    pub validated: bool,
}

impl RequirementsState {
    pub fn is_empty(&self) -> bool {
        self.functional.is_empty() && self.non_functional.is_empty()
    }

    pub fn blocking_issues(&self) -> usize {
        self.issues.iter().filter(|i| i.severity == Severity::Error).count()
    }

    /// Append records with unseen content, numbering them after the ids in use
    ///
    /// Returns how many were added.
    fn merge(&mut self, functional: Vec<FunctionalRequirement>, non_functional: Vec<NonFunctionalRequirement>) -> usize {
        let before = self.functional.len() + self.non_functional.len();

        let mut known: HashSet<String> = self.functional.iter().map(FunctionalRequirement::content_key).collect();
        let fresh: Vec<_> = functional.into_iter().filter(|r| known.insert(r.content_key())).collect();
        let taken: HashSet<u32> = self.functional.iter().filter_map(|r| parse_id("FR", &r.id)).collect();
        let ids = assign_ids("FR", &fresh.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), &taken);
        for (mut req, id) in fresh.into_iter().zip(ids) {
            req.id = id;
            self.functional.push(req);
        }

        let mut known: HashSet<String> = self.non_functional.iter().map(NonFunctionalRequirement::content_key).collect();
        let fresh: Vec<_> = non_functional.into_iter().filter(|r| known.insert(r.content_key())).collect();
        let taken: HashSet<u32> = self.non_functional.iter().filter_map(|r| parse_id("NFR", &r.id)).collect();
        let ids = assign_ids("NFR", &fresh.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), &taken);
        for (mut req, id) in fresh.into_iter().zip(ids) {
            req.id = id;
            self.non_functional.push(req);
        }

        let added = self.functional.len() + self.non_functional.len() - before;
        if added > 0 {
            self.validated = false;
        }
        added
    }

    /// Export with requirements grouped by priority and category
    fn export(&self) -> Value {
        let mut by_priority: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for req in &self.functional {
            by_priority.entry(req.priority.as_str()).or_default().push(&req.id);
        }
        let mut by_category: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for req in &self.non_functional {
            by_category.entry(req.category.as_str()).or_default().push(&req.id);
        }

        json!({
            "functional": self.functional,
            "non_functional": self.non_functional,
            "issues": self.issues,
            "validated": self.validated,
            "by_priority": by_priority,
            "by_category": by_category,
        })
    }

    /// Plain-text listing for prompts
    pub fn brief(&self) -> String {
        let mut lines = Vec::new();
        for req in &self.functional {
            lines.push(format!("{} [{}] {}: {}", req.id, req.priority.as_str(), req.title, req.description));
        }
        for req in &self.non_functional {
            lines.push(format!("{} ({}) {}", req.id, req.category, req.description));
        }
        lines.join("\n")
    }
}

/// Render whatever requirements input a downstream phase received as prompt text
pub(crate) fn brief(input: &Value) -> String {
    if let Some(text) = input_text(input) {
        return text.to_string();
    }
    match serde_json::from_value::<RequirementsState>(input.clone()) {
        Ok(state) if !state.is_empty() => state.brief(),
        _ => serde_json::to_string_pretty(input).unwrap_or_default(),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFunctional {
    id: Option<String>,
    title: String,
    description: String,
    priority: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawNonFunctional {
    id: Option<String>,
    category: Option<String>,
    description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawIssue {
    id: Option<String>,
    severity: Option<String>,
    message: String,
}

/// Decode list items leniently, skipping entries of the wrong shape
fn items<T: for<'de> Deserialize<'de>>(value: &Value, key: &str) -> Vec<T> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter(|item| item.is_object())
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn parse_id(prefix: &str, raw: &str) -> Option<u32> {
    let caps = ID_PATTERN.captures(raw)?;
    if !caps[1].eq_ignore_ascii_case(prefix) {
        return None;
    }
    caps[2].parse().ok().filter(|n| *n > 0)
}

/// Normalise a batch of ids to `<prefix>-<n>`
///
/// A valid id not in `taken` is kept by its first holder; missing, invalid
/// and clashing ids get numbers after the highest one in use, in batch order.
fn assign_ids(prefix: &str, raw: &[&str], taken: &HashSet<u32>) -> Vec<String> {
    let parsed: Vec<Option<u32>> = raw.iter().map(|id| parse_id(prefix, id)).collect();
    let mut next = parsed
        .iter()
        .flatten()
        .chain(taken.iter())
        .copied()
        .max()
        .unwrap_or(0);
    let mut seen = taken.clone();

    parsed
        .into_iter()
        .map(|n| {
            let n = match n {
                Some(n) if seen.insert(n) => n,
                _ => {
                    next += 1;
                    next
                }
            };
            format!("{}-{}", prefix, n)
        })
        .collect()
}

/// Decode an extraction; ids are kept as delivered and numbered on merge
fn parse_extraction(value: &Value) -> (Vec<FunctionalRequirement>, Vec<NonFunctionalRequirement>) {
    let functional = items::<RawFunctional>(value, "functional")
        .into_iter()
        .filter(|r| !r.title.trim().is_empty() || !r.description.trim().is_empty())
        .map(|raw| {
            let description = raw.description.trim().to_string();
            let title = match raw.title.trim() {
                "" => description.chars().take(60).collect(),
                title => title.to_string(),
            };
            FunctionalRequirement {
                id: raw.id.unwrap_or_default().trim().to_string(),
                title,
                description,
                priority: raw.priority.as_deref().map(Priority::parse).unwrap_or_default(),
            }
        })
        .collect();

    let non_functional = items::<RawNonFunctional>(value, "non_functional")
        .into_iter()
        .filter(|r| !r.description.trim().is_empty())
        .map(|raw| NonFunctionalRequirement {
            id: raw.id.unwrap_or_default().trim().to_string(),
            category: raw
                .category
                .map(|c| c.trim().to_ascii_lowercase())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| "other".to_string()),
            description: raw.description.trim().to_string(),
        })
        .collect();

    (functional, non_functional)
}

fn parse_issues(value: &Value) -> Vec<ValidationIssue> {
    items::<RawIssue>(value, "issues")
        .into_iter()
        .filter(|i| !i.message.trim().is_empty())
        .map(|raw| ValidationIssue {
            id: raw.id.filter(|id| !id.trim().is_empty()),
            severity: raw.severity.as_deref().map(Severity::parse).unwrap_or_default(),
            message: raw.message.trim().to_string(),
        })
        .collect()
}

fn check_extraction(value: &Value) -> Result<(), String> {
    match value.get("functional") {
        Some(Value::Array(_)) => {}
        _ => return Err("\"functional\" must be a list".to_string()),
    }
    match value.get("non_functional") {
        None | Some(Value::Array(_)) => Ok(()),
        _ => Err("\"non_functional\" must be a list".to_string()),
    }
}

fn check_issues(value: &Value) -> Result<(), String> {
    match value.get("issues") {
        Some(Value::Array(_)) => Ok(()),
        _ => Err("\"issues\" must be a list".to_string()),
    }
}

pub struct RequirementsFacade {
    generator: Arc<Generator>,
    state: RwLock<RequirementsState>,
}

impl RequirementsFacade {
    pub fn new(generator: Arc<Generator>) -> Self {
        Self {
            generator,
            state: RwLock::new(RequirementsState::default()),
        }
    }

    pub async fn state(&self) -> RequirementsState {
        self.state.read().await.clone()
    }

    /// Extract requirements from free text and merge them
    pub async fn extract(&self, text: &str, options: &RunOptions) -> Result<Cached, PipelineError> {
        debug!(len = text.len(), "extract: called");
        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::Internal {
                operation: EXTRACT.to_string(),
                message: "input text is empty".to_string(),
            });
        }

        let prompt = self.generator.render(EXTRACT, Template::Requirements, &json!({ "text": text }))?;
        let call = Call::new(EXTRACT, Phase::Requirements, SYSTEM_PROMPT, prompt, Target::json("functional"))
            .with_check(check_extraction);

        self.generator
            .generate(call, options, |value| async move {
                let (functional, non_functional) = parse_extraction(&value);
                let total = functional.len() + non_functional.len();
                let added = self.state.write().await.merge(functional, non_functional);
                self.save().await;
                format!("{} requirements ({} new)", total, added)
            })
            .await
    }

    /// Validate the merged requirements, replacing earlier findings
    pub async fn validate(&self, options: &RunOptions) -> Result<Vec<ValidationIssue>, PipelineError> {
        debug!("validate: called");
        let listing = {
            let state = self.state.read().await;
            if state.is_empty() {
                None
            } else {
                Some(state.brief())
            }
        };

        let Some(listing) = listing else {
            let issues = vec![ValidationIssue {
                id: None,
                severity: Severity::Error,
                message: "no requirements have been extracted".to_string(),
            }];
            let mut state = self.state.write().await;
            state.issues = issues.clone();
            state.validated = false;
            return Ok(issues);
        };

        let prompt = self
            .generator
            .render(VALIDATE, Template::Validate, &json!({ "requirements": listing }))?;
        let call = Call::new(VALIDATE, Phase::Requirements, SYSTEM_PROMPT, prompt, Target::json("issues"))
            .with_expected_len(1024)
            .with_check(check_issues);

        self.generator
            .generate(call, options, |value| async move {
                let issues = parse_issues(&value);
                let blocking = {
                    let mut state = self.state.write().await;
                    state.issues = issues;
                    state.validated = state.blocking_issues() == 0;
                    state.blocking_issues()
                };
                self.save().await;
                format!("{} blocking issues", blocking)
            })
            .await?;

        Ok(self.state.read().await.issues.clone())
    }

    async fn save(&self) {
        let snapshot = self.snapshot().await;
        self.generator.persist(NAME, snapshot).await;
    }
}

#[async_trait]
impl Facade for RequirementsFacade {
    fn phase(&self) -> Phase {
        Phase::Requirements
    }

    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, input: Value, options: &RunOptions) -> Result<PhaseOutcome, PipelineError> {
        let text = input_text(&input).ok_or_else(|| PipelineError::Internal {
            operation: EXTRACT.to_string(),
            message: "requirements input must be text".to_string(),
        })?;

        self.extract(text, options).await?;
        self.validate(options).await?;

        let (validated, count, blocking) = {
            let state = self.state.read().await;
            (
                state.validated,
                state.functional.len() + state.non_functional.len(),
                state.blocking_issues(),
            )
        };
        let output = self.snapshot().await;
        info!(count, blocking, validated, "Requirements phase ran");

        if validated {
            Ok(PhaseOutcome::Completed {
                summary: format!("{} requirements validated", count),
                output,
            })
        } else {
            Ok(PhaseOutcome::Incomplete {
                summary: format!("{} blocking issues", blocking),
                output,
            })
        }
    }

    async fn snapshot(&self) -> Value {
        self.state.read().await.export()
    }

    async fn restore(&self, snapshot: Value) -> Result<(), PipelineError> {
        let restored: RequirementsState =
            serde_json::from_value(snapshot).map_err(|e| PipelineError::Persistence {
                operation: format!("{}.restore", NAME),
                source: PersistenceError::Serde(e),
            })?;
        debug!(functional = restored.functional.len(), "restore: loaded");
        *self.state.write().await = restored;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::facade::testing::{harness, settings};
    use crate::llm::client::mock::{Script, ScriptedClient};

    const LOGIN: &str = r#"{
        "functional": [
            {"id": "FR-1", "title": "Login form", "description": "Users sign in with email and password", "priority": "high"},
            {"id": "FR-2", "title": "Error message", "description": "Show an error on bad credentials", "priority": "medium"}
        ],
        "non_functional": [
            {"id": "NFR-1", "category": "security", "description": "Passwords are never logged"}
        ]
    }"#;

    fn facade(scripts: Vec<Script>) -> (RequirementsFacade, Arc<ScriptedClient>, crate::facade::testing::Harness) {
        let llm = Arc::new(ScriptedClient::new(scripts));
        let h = harness(llm.clone(), settings());
        (RequirementsFacade::new(h.generator.clone()), llm, h)
    }

    #[test]
    fn test_assign_ids() {
        let none = HashSet::new();
        let raw = ["FR-2", "bogus", "fr-2", "", "FR-007"];
        assert_eq!(assign_ids("FR", &raw, &none), vec!["FR-2", "FR-8", "FR-9", "FR-10", "FR-7"]);
        assert_eq!(assign_ids("NFR", &["", "FR-1"], &none), vec!["NFR-1", "NFR-2"]);
        assert_eq!(assign_ids("FR", &["FR-0"], &none), vec!["FR-1"]);

        let taken: HashSet<u32> = [1, 2].into_iter().collect();
        assert_eq!(assign_ids("FR", &["FR-1", "", "FR-5"], &taken), vec!["FR-6", "FR-7", "FR-5"]);
    }

    #[test]
    fn test_parse_extraction_is_lenient() {
        let value = json!({
            "functional": [
                {"title": "Search", "priority": "CRITICAL"},
                "not an object",
                {"id": "FR-1", "description": "Logout"},
                {"id": "FR-3"}
            ],
            "non_functional": [{"description": "Fast", "category": " Performance "}]
        });
        let (functional, non_functional) = parse_extraction(&value);
        assert_eq!(functional.len(), 2);
        assert_eq!(functional[0].priority, Priority::High);
        assert_eq!(functional[1].title, "Logout");
        assert_eq!(non_functional[0].category, "performance");

        let mut state = RequirementsState::default();
        assert_eq!(state.merge(functional, non_functional), 3);
        assert_eq!(state.functional[0].id, "FR-2");
        assert_eq!(state.functional[1].id, "FR-1");
        assert_eq!(state.non_functional[0].id, "NFR-1");
    }

    #[test]
    fn test_merge_skips_known_content() {
        let (functional, non_functional) = parse_extraction(&serde_json::from_str(LOGIN).unwrap());
        let mut state = RequirementsState::default();
        assert_eq!(state.merge(functional.clone(), non_functional.clone()), 3);
        assert!(!state.validated);
        state.validated = true;

        assert_eq!(state.merge(functional, non_functional), 0);
        assert_eq!(state.functional.len(), 2);
        assert!(state.validated);

        // Same id, different content: kept under a fresh number
        let mut renamed = state.functional[0].clone();
        renamed.title = "Different".to_string();
        assert_eq!(state.merge(vec![renamed], vec![]), 1);
        assert_eq!(state.functional[0].title, "Login form");
        assert_eq!(state.functional[2].id, "FR-3");

        // Whitespace and case do not make content new
        let mut echo = state.functional[1].clone();
        echo.id = String::new();
        echo.title = "  ERROR   message ".to_string();
        assert_eq!(state.merge(vec![echo], vec![]), 0);
    }

    #[tokio::test]
    async fn test_separate_extractions_accumulate() {
        let (facade, llm, _h) = facade(vec![
            Script::text(r#"{"functional": [{"title": "Login form", "description": "Sign in with email"}]}"#),
            Script::text(r#"{"functional": [{"id": "FR-1", "title": "Password reset", "description": "Reset by email link"}]}"#),
        ]);

        let login = facade.extract("Build a login form", &RunOptions::default()).await.unwrap();
        facade.extract("Add password reset", &RunOptions::default()).await.unwrap();
        assert_eq!(llm.call_count(), 2);

        let state = facade.state().await;
        let titles: Vec<&str> = state.functional.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Login form", "Password reset"]);
        let ids: Vec<&str> = state.functional.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["FR-1", "FR-2"]);

        // Replaying the cached first extraction adds nothing
        let replay = facade.extract("Build a login form", &RunOptions::default()).await.unwrap();
        assert!(replay.from_cache);
        assert_eq!(replay.value, login.value);
        assert_eq!(llm.call_count(), 2);
        assert_eq!(facade.state().await, state);
    }

    #[tokio::test]
    async fn test_login_form_scenario() {
        let (facade, llm, _h) = facade(vec![Script::chunked(LOGIN, 7)]);

        let first = facade.extract("Build a login form", &RunOptions::default()).await.unwrap();
        assert!(!first.from_cache);
        let state = facade.state().await;
        assert!(!state.functional.is_empty());
        let ids: HashSet<&str> = state.functional.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.len(), state.functional.len());
        assert!(ids.iter().all(|id| parse_id("FR", id).is_some()));

        let second = facade.extract("Build a login form", &RunOptions::default()).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(first.value, second.value);
        assert_eq!(llm.call_count(), 1);
        assert_eq!(facade.state().await, state);
    }

    #[tokio::test]
    async fn test_run_completes_when_validation_passes() {
        let (facade, _llm, h) = facade(vec![
            Script::text(LOGIN),
            Script::text(r#"{"issues": [{"id": "FR-2", "severity": "warning", "message": "vague"}]}"#),
        ]);

        let outcome = facade
            .run(json!("Build a login form"), &RunOptions::default())
            .await
            .unwrap();
        assert!(outcome.is_completed());
        let output = outcome.output().unwrap();
        assert_eq!(output["by_priority"]["high"], json!(["FR-1"]));
        assert_eq!(output["by_category"]["security"], json!(["NFR-1"]));
        assert_eq!(output["issues"][0]["severity"], "warning");
        assert!(h.generator.saver().is_dirty(NAME).await);
    }

    #[tokio::test]
    async fn test_run_incomplete_on_blocking_issue() {
        let (facade, _llm, _h) = facade(vec![
            Script::text(LOGIN),
            Script::text(r#"{"issues": [{"id": "FR-1", "severity": "error", "message": "contradicts NFR-1"}]}"#),
        ]);

        let outcome = facade.run(json!({"text": "Build a login form"}), &RunOptions::default()).await.unwrap();
        match outcome {
            PhaseOutcome::Incomplete { summary, .. } => assert_eq!(summary, "1 blocking issues"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!facade.state().await.validated);
    }

    #[tokio::test]
    async fn test_validate_without_requirements_is_local() {
        let (facade, llm, _h) = facade(vec![]);
        let issues = facade.validate(&RunOptions::default()).await.unwrap();
        assert_eq!(issues[0].severity, Severity::Error);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_leaves_state_untouched() {
        let (facade, _llm, _h) = facade(vec![Script::Error(401)]);
        let err = facade.extract("Build a login form", &RunOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Backend);
        assert_eq!(facade.state().await, RequirementsState::default());
    }

    #[tokio::test]
    async fn test_snapshot_restore() {
        let (facade, _llm, h) = facade(vec![Script::text(LOGIN)]);
        facade.extract("Build a login form", &RunOptions::default()).await.unwrap();
        let snapshot = facade.snapshot().await;

        let restored = RequirementsFacade::new(h.generator.clone());
        restored.restore(snapshot).await.unwrap();
        assert_eq!(restored.state().await, facade.state().await);

        let err = restored.restore(json!({"functional": "nope"})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
    }

    #[test]
    fn test_brief_of_snapshot_and_text() {
        let (functional, non_functional) = parse_extraction(&serde_json::from_str(LOGIN).unwrap());
        let mut state = RequirementsState::default();
        state.merge(functional, non_functional);

        let text = brief(&state.export());
        assert!(text.contains("FR-1 [high] Login form"));
        assert!(text.contains("NFR-1 (security)"));
        assert_eq!(brief(&json!("plain text")), "plain text");
    }
}
