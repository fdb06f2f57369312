//! Design façade: Mermaid diagrams derived from the requirements

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::debug;

use super::generator::{Call, Generator};
use super::requirements::brief;
use super::{Facade, PhaseOutcome, RunOptions};
use crate::decode::Target;
use crate::error::{PersistenceError, PipelineError};
use crate::orchestrator::Phase;
use crate::prompts::Template;

const NAME: &str = "design";
const DIAGRAM: &str = "design.diagram";

const SYSTEM_PROMPT: &str = "You are a software architect. Answer with a single Mermaid code block.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagramKind {
    Architecture,
    Sequence,
    DataModel,
}

impl DiagramKind {
    pub const ALL: [DiagramKind; 3] = [DiagramKind::Architecture, DiagramKind::Sequence, DiagramKind::DataModel];

    pub fn as_str(&self) -> &'static str {
        match self {
            DiagramKind::Architecture => "architecture",
            DiagramKind::Sequence => "sequence",
            DiagramKind::DataModel => "data-model",
        }
    }
}

impl fmt::Display for DiagramKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DiagramKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiagramKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown diagram kind: {}", s))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignState {
    pub diagrams: BTreeMap<DiagramKind, String>,
}

fn check_source(value: &Value) -> Result<(), String> {
    match value.as_str() {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err("diagram source is empty".to_string()),
    }
}

pub struct DesignFacade {
    generator: Arc<Generator>,
    state: RwLock<DesignState>,
}

impl DesignFacade {
    pub fn new(generator: Arc<Generator>) -> Self {
        Self {
            generator,
            state: RwLock::new(DesignState::default()),
        }
    }

    pub async fn state(&self) -> DesignState {
        self.state.read().await.clone()
    }

    /// Produce one diagram; an existing diagram of the kind is kept unless forced
    pub async fn diagram(&self, kind: DiagramKind, requirements: &str, options: &RunOptions) -> Result<String, PipelineError> {
        debug!(%kind, force = options.force, "diagram: called");
        if !options.force
            && let Some(existing) = self.state.read().await.diagrams.get(&kind)
        {
            debug!(%kind, "diagram: already present");
            return Ok(existing.clone());
        }

        let context = json!({
            "kind": kind.as_str(),
            "is_architecture": kind == DiagramKind::Architecture,
            "is_sequence": kind == DiagramKind::Sequence,
            "is_data_model": kind == DiagramKind::DataModel,
            "requirements": requirements,
        });
        let prompt = self.generator.render(DIAGRAM, Template::Diagram, &context)?;
        let call = Call::new(DIAGRAM, Phase::Design, SYSTEM_PROMPT, prompt, Target::FencedCode)
            .with_expected_len(2048)
            .with_check(check_source);

        let force = options.force;
        self.generator
            .generate(call, options, |value| async move {
                let source = value.as_str().unwrap_or_default().to_string();
                let stored = {
                    let mut state = self.state.write().await;
                    match state.diagrams.get(&kind) {
                        Some(_) if !force => false,
                        _ => {
                            state.diagrams.insert(kind, source);
                            true
                        }
                    }
                };
                if stored {
                    self.save().await;
                    format!("{} diagram stored", kind)
                } else {
                    format!("{} diagram already present", kind)
                }
            })
            .await?;

        let state = self.state.read().await;
        Ok(state.diagrams.get(&kind).cloned().unwrap_or_default())
    }

    async fn save(&self) {
        let snapshot = self.snapshot().await;
        self.generator.persist(NAME, snapshot).await;
    }
}

#[async_trait]
impl Facade for DesignFacade {
    fn phase(&self) -> Phase {
        Phase::Design
    }

    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, input: Value, options: &RunOptions) -> Result<PhaseOutcome, PipelineError> {
        let requirements = brief(&input);
        if requirements.trim().is_empty() || input.is_null() {
            return Err(PipelineError::Internal {
                operation: DIAGRAM.to_string(),
                message: "design needs the requirements as input".to_string(),
            });
        }

        for kind in DiagramKind::ALL {
            self.diagram(kind, &requirements, options).await?;
        }

        let diagrams = self.snapshot().await;
        let count = self.state.read().await.diagrams.len();
        Ok(PhaseOutcome::Completed {
            summary: format!("{} diagrams", count),
            output: json!({
                "requirements": input,
                "diagrams": diagrams["diagrams"],
            }),
        })
    }

    async fn snapshot(&self) -> Value {
        serde_json::to_value(&*self.state.read().await).unwrap_or_default()
    }

    async fn restore(&self, snapshot: Value) -> Result<(), PipelineError> {
        let restored: DesignState = serde_json::from_value(snapshot).map_err(|e| PipelineError::Persistence {
            operation: format!("{}.restore", NAME),
            source: PersistenceError::Serde(e),
        })?;
        *self.state.write().await = restored;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::testing::{harness, settings};
    use crate::llm::client::mock::{Script, ScriptedClient};

    fn mermaid(body: &str) -> Script {
        Script::chunked(&format!("```mermaid\n{}\n```", body), 4)
    }

    #[test]
    fn test_diagram_kind_names() {
        assert_eq!("data-model".parse::<DiagramKind>().unwrap(), DiagramKind::DataModel);
        assert_eq!(DiagramKind::Sequence.to_string(), "sequence");
        assert!("flowchart".parse::<DiagramKind>().is_err());
        assert_eq!(serde_json::to_value(DiagramKind::DataModel).unwrap(), json!("data-model"));
    }

    #[tokio::test]
    async fn test_run_produces_all_diagrams() {
        let llm = Arc::new(ScriptedClient::new(vec![
            mermaid("graph TD\n  UI --> API"),
            mermaid("sequenceDiagram\n  User->>API: login"),
            mermaid("erDiagram\n  USER ||--o{ SESSION : has"),
        ]));
        let h = harness(llm.clone(), settings());
        let facade = DesignFacade::new(h.generator.clone());

        let input = json!({"functional": [{"id": "FR-1", "title": "Login", "description": "Sign in", "priority": "high"}]});
        let outcome = facade.run(input.clone(), &RunOptions::default()).await.unwrap();
        assert!(outcome.is_completed());

        let output = outcome.output().unwrap();
        assert_eq!(output["requirements"], input);
        assert_eq!(output["diagrams"]["architecture"], "graph TD\n  UI --> API");
        assert!(output["diagrams"]["data-model"].as_str().unwrap().starts_with("erDiagram"));
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_first_diagram_wins_unless_forced() {
        let llm = Arc::new(ScriptedClient::new(vec![
            mermaid("graph TD\n  A --> B"),
            mermaid("graph TD\n  C --> D"),
        ]));
        let h = harness(llm.clone(), settings());
        let facade = DesignFacade::new(h.generator.clone());

        facade
            .diagram(DiagramKind::Architecture, "first", &RunOptions::default())
            .await
            .unwrap();
        let kept = facade
            .diagram(DiagramKind::Architecture, "second", &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(kept, "graph TD\n  A --> B");
        assert_eq!(llm.call_count(), 1);

        let forced = facade
            .diagram(DiagramKind::Architecture, "third", &RunOptions::forced())
            .await
            .unwrap();
        assert_eq!(forced, "graph TD\n  C --> D");
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_run_rejects_missing_input() {
        let llm = Arc::new(ScriptedClient::new(vec![]));
        let h = harness(llm, settings());
        let facade = DesignFacade::new(h.generator.clone());
        assert!(facade.run(Value::Null, &RunOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_restore() {
        let llm = Arc::new(ScriptedClient::new(vec![]));
        let h = harness(llm, settings());
        let facade = DesignFacade::new(h.generator.clone());

        facade
            .restore(json!({"diagrams": {"sequence": "sequenceDiagram\n  A->>B: hi"}}))
            .await
            .unwrap();
        let state = facade.state().await;
        assert_eq!(state.diagrams.len(), 1);
        assert!(state.diagrams.contains_key(&DiagramKind::Sequence));
        assert_eq!(facade.snapshot().await["diagrams"]["sequence"], "sequenceDiagram\n  A->>B: hi");
    }
}
