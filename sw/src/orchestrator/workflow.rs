//! Phase orchestrator
//!
//! A state machine over the façades: gates each phase on its predecessor,
//! rejects re-entrant runs, drives auto-progression and aggregates status.
//! The state lock is never held across a façade run.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::phase::{Phase, PhaseState, WorkflowState};
use crate::cache::{CacheStats, ResultCache};
use crate::config::{Config, WorkflowConfig};
use crate::error::{PersistenceError, PipelineError};
use crate::events::{Emitter, EventBus, LogLevel};
use crate::facade::{
    CodegenFacade, DesignFacade, Facade, GenerationSettings, Generator, PhaseOutcome, RepairFacade,
    RequirementsFacade, RunOptions,
};
use crate::llm::LlmClient;
use crate::persistence::{AutoSaver, Persistence};
use crate::prompts::PromptLoader;
use crate::registry::{RegistryStats, Task, TaskRegistry};

/// Persistence key of the workflow's own phase state
const WORKFLOW_KEY: &str = "workflow";

/// Serialisable view of a workflow run
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStatus {
    pub run_id: String,
    pub current: WorkflowState,
    pub phases: BTreeMap<Phase, PhaseState>,
    pub error: bool,
    /// Phases with no façade registered
    pub unavailable: Vec<Phase>,
    pub tasks: Vec<Task>,
    pub registry: RegistryStats,
    pub cache: CacheStats,
}

#[derive(Debug, Serialize, Deserialize)]
struct WorkflowSnapshot {
    state: WorkflowState,
    phases: BTreeMap<Phase, PhaseState>,
}

struct Inner {
    state: WorkflowState,
    phases: BTreeMap<Phase, PhaseState>,
    /// Live runs per phase; above one only for concurrent phases
    running: HashMap<Phase, usize>,
    error: bool,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: WorkflowState::Idle,
            phases: Phase::ALL.into_iter().map(|p| (p, PhaseState::default())).collect(),
            running: HashMap::new(),
            error: false,
        }
    }

    fn phase(&mut self, phase: Phase) -> &mut PhaseState {
        self.phases.entry(phase).or_default()
    }

    fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            state: self.state,
            phases: self.phases.clone(),
        }
    }
}

/// Position in the phase order; the pointer never moves backwards
fn rank(state: WorkflowState) -> usize {
    match state {
        WorkflowState::Idle => 0,
        WorkflowState::Active(phase) => 1 + phase as usize,
        WorkflowState::Complete => 1 + Phase::ALL.len(),
    }
}

pub struct Orchestrator {
    run_id: String,
    config: WorkflowConfig,
    facades: HashMap<Phase, Arc<dyn Facade>>,
    generator: Arc<Generator>,
    emitter: Emitter,
    inner: Arc<Mutex<Inner>>,
    autosave_cancel: CancellationToken,
    autosave_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Orchestrator with no façades registered
    pub fn new(config: WorkflowConfig, generator: Arc<Generator>) -> Self {
        let emitter = generator.emitter().clone();
        Self {
            run_id: emitter.run_id().to_string(),
            config,
            facades: HashMap::new(),
            generator,
            emitter,
            inner: Arc::new(Mutex::new(Inner::new())),
            autosave_cancel: CancellationToken::new(),
            autosave_task: std::sync::Mutex::new(None),
        }
    }

    /// Register the façade serving its phase, replacing any earlier one
    pub fn with_facade(mut self, facade: Arc<dyn Facade>) -> Self {
        debug!(phase = %facade.phase(), name = facade.name(), "with_facade: called");
        self.facades.insert(facade.phase(), facade);
        self
    }

    /// Wire the full pipeline from configuration and start autosaving
    ///
    /// Must be called inside a tokio runtime.
    pub fn from_config(
        config: &Config,
        run_id: impl Into<String>,
        llm: Arc<dyn LlmClient>,
        persistence: Arc<dyn Persistence>,
        bus: &EventBus,
        project_root: impl AsRef<Path>,
    ) -> Self {
        let run_id = run_id.into();
        info!(%run_id, "Creating workflow run");
        let emitter = bus.emitter_for(run_id);

        let registry = TaskRegistry::spawn(&config.concurrency, emitter.clone());
        let cache = Arc::new(ResultCache::from_config(&config.cache));
        let saver = Arc::new(AutoSaver::new(persistence, emitter.clone()));
        let prompts = Arc::new(PromptLoader::new(project_root));
        let generator = Arc::new(Generator::new(
            llm,
            cache,
            registry,
            emitter,
            prompts,
            saver,
            GenerationSettings::from_config(config),
        ));

        let orchestrator = Self::new(config.workflow.clone(), generator.clone())
            .with_facade(Arc::new(RequirementsFacade::new(generator.clone())))
            .with_facade(Arc::new(DesignFacade::new(generator.clone())))
            .with_facade(Arc::new(CodegenFacade::new(generator.clone())))
            .with_facade(Arc::new(RepairFacade::new(generator)));
        orchestrator.start_autosave(config.storage.autosave_interval());
        orchestrator
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn generator(&self) -> &Arc<Generator> {
        &self.generator
    }

    pub fn facade(&self, phase: Phase) -> Option<Arc<dyn Facade>> {
        self.facades.get(&phase).cloned()
    }

    pub async fn current(&self) -> WorkflowState {
        self.inner.lock().await.state
    }

    pub async fn phase_state(&self, phase: Phase) -> PhaseState {
        self.inner.lock().await.phase(phase).clone()
    }

    pub async fn is_failed(&self) -> bool {
        self.inner.lock().await.error
    }

    /// Start the background autosave loop; a second call is a no-op
    pub fn start_autosave(&self, interval: Duration) {
        let Ok(mut slot) = self.autosave_task.lock() else {
            warn!("Autosave slot poisoned, not starting");
            return;
        };
        if slot.is_none() {
            let saver = self.generator.saver().clone();
            *slot = Some(saver.spawn(interval, self.autosave_cancel.clone()));
        }
    }

    /// Verify setup and load prior snapshots, then enter the first phase
    ///
    /// On failure the workflow stays idle.
    pub async fn initialize(&self) -> Result<(), PipelineError> {
        debug!(run_id = %self.run_id, "initialize: called");
        if !self.facades.contains_key(&Phase::Requirements) {
            return Err(PipelineError::Internal {
                operation: "initialize".to_string(),
                message: "no requirements façade is registered".to_string(),
            });
        }

        let persistence = self.generator.saver().persistence().clone();
        let load = |source: PersistenceError| PipelineError::Persistence {
            operation: "initialize".to_string(),
            source,
        };

        let mut facades: Vec<&Arc<dyn Facade>> = self.facades.values().collect();
        facades.sort_by_key(|f| f.phase());
        for facade in facades {
            if let Some(snapshot) = persistence.load(facade.name()).await.map_err(load)? {
                debug!(name = facade.name(), "initialize: restoring snapshot");
                facade.restore(snapshot).await?;
            }
        }

        let restored = match persistence.load(WORKFLOW_KEY).await.map_err(load)? {
            Some(value) => Some(serde_json::from_value::<WorkflowSnapshot>(value).map_err(|e| load(e.into()))?),
            None => None,
        };

        let mut inner = self.inner.lock().await;
        if let Some(snapshot) = restored {
            inner.phases = snapshot.phases;
            for state in inner.phases.values_mut() {
                state.in_progress = false;
            }
            inner.error = inner.phases.values().any(|p| p.last_error.is_some());
            inner.state = snapshot.state;
        }
        if inner.state == WorkflowState::Idle {
            inner.state = WorkflowState::Active(Phase::Requirements);
        }
        info!(run_id = %self.run_id, state = %inner.state, "Workflow initialized");
        Ok(())
    }

    /// Run one phase
    ///
    /// Rejects with `PhaseBusy` while the phase runs (unless it is declared
    /// concurrent) and with `PhaseGated` until the previous phase completed.
    /// A phase without a façade yields `PhaseOutcome::Unavailable`.
    pub async fn start_phase(&self, phase: Phase, input: Value, options: &RunOptions) -> Result<PhaseOutcome, PipelineError> {
        debug!(%phase, force = options.force, "start_phase: called");
        let facade = {
            let mut inner = self.inner.lock().await;
            if inner.state == WorkflowState::Idle {
                return Err(PipelineError::Internal {
                    operation: phase.to_string(),
                    message: "workflow is not initialized".to_string(),
                });
            }
            if inner.phase(phase).in_progress && !self.config.concurrent_phases.contains(&phase) {
                return Err(PipelineError::PhaseBusy { phase });
            }
            if let Some(blocking) = phase.previous()
                && !inner.phase(blocking).completed
            {
                return Err(PipelineError::PhaseGated { phase, blocking });
            }
            let Some(facade) = self.facades.get(&phase).cloned() else {
                info!(%phase, "Phase not available");
                self.emitter.phase_unavailable(phase);
                return Ok(PhaseOutcome::Unavailable);
            };

            *inner.running.entry(phase).or_default() += 1;
            inner.phase(phase).begin();
            let entered = WorkflowState::Active(phase);
            if rank(entered) > rank(inner.state) {
                inner.state = entered;
            }
            facade
        };

        info!(%phase, "Phase started");
        self.emitter.phase_started(phase);

        // The run and its bookkeeping live in their own task so that dropping
        // this future never leaves the phase marked as running.
        let inner = self.inner.clone();
        let emitter = self.emitter.clone();
        let generator = self.generator.clone();
        let options = *options;
        let run = tokio::spawn(async move {
            let result = facade.run(input, &options).await;
            let snapshot = settle(&inner, &emitter, phase, &result).await;
            persist_snapshot(&generator, snapshot).await;
            result
        });

        run.await.map_err(|e| PipelineError::Internal {
            operation: phase.to_string(),
            message: format!("phase task ended abnormally: {}", e),
        })?
    }

    /// Run from `start`, auto-progressing while phases complete
    ///
    /// Each completed phase's output is the next phase's input. Stops after
    /// `through`, at the first phase that does not complete, or after one
    /// phase when auto-progression is off.
    pub async fn run(
        &self,
        start: Phase,
        input: Value,
        options: &RunOptions,
        through: Option<Phase>,
    ) -> Result<Vec<(Phase, PhaseOutcome)>, PipelineError> {
        debug!(%start, ?through, auto = self.config.auto_progress, "run: called");
        let mut outcomes = Vec::new();
        let mut phase = start;
        let mut input = input;

        loop {
            let outcome = self.start_phase(phase, input, options).await?;
            let output = match &outcome {
                PhaseOutcome::Completed { output, .. } => Some(output.clone()),
                _ => None,
            };
            outcomes.push((phase, outcome));

            let Some(output) = output else { break };
            if !self.config.auto_progress || through == Some(phase) {
                break;
            }
            let Some(next) = phase.next() else { break };
            phase = next;
            input = output;
        }
        Ok(outcomes)
    }

    /// Back to idle with all phase state cleared
    pub async fn reset(&self) {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            let running = std::mem::take(&mut inner.running);
            *inner = Inner::new();
            inner.running = running;
            inner.snapshot()
        };
        info!(run_id = %self.run_id, "Workflow reset");
        self.persist_workflow(snapshot).await;
    }

    pub async fn status(&self) -> Result<WorkflowStatus, PipelineError> {
        let registry = self.generator.registry();
        let tasks = registry.list_tasks().await.map_err(|e| e.into_pipeline("status"))?;
        let stats = registry.stats().await.map_err(|e| e.into_pipeline("status"))?;

        let inner = self.inner.lock().await;
        Ok(WorkflowStatus {
            run_id: self.run_id.clone(),
            current: inner.state,
            phases: inner.phases.clone(),
            error: inner.error,
            unavailable: Phase::ALL
                .into_iter()
                .filter(|p| !self.facades.contains_key(p))
                .collect(),
            tasks,
            registry: stats,
            cache: self.generator.cache().stats(),
        })
    }

    /// Stop autosaving (with a final flush) and the task registry
    pub async fn shutdown(&self) {
        debug!("shutdown: called");
        self.autosave_cancel.cancel();
        let task = self.autosave_task.lock().ok().and_then(|mut slot| slot.take());
        match task {
            Some(handle) => {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Autosave task ended abnormally");
                }
            }
            None => {
                self.generator.saver().flush().await;
            }
        }
        if let Err(e) = self.generator.registry().shutdown().await {
            warn!(error = %e, "Registry already stopped");
        }
        info!(run_id = %self.run_id, "Workflow shut down");
    }

    async fn persist_workflow(&self, snapshot: WorkflowSnapshot) {
        persist_snapshot(&self.generator, snapshot).await;
    }
}

/// Record a finished run in the phase state and emit its outcome
async fn settle(
    inner: &Mutex<Inner>,
    emitter: &Emitter,
    phase: Phase,
    result: &Result<PhaseOutcome, PipelineError>,
) -> WorkflowSnapshot {
    let mut inner = inner.lock().await;
    let still_running = {
        let count = inner.running.entry(phase).or_default();
        *count = count.saturating_sub(1);
        *count > 0
    };

    match result {
        Ok(PhaseOutcome::Completed { summary, .. }) => {
            inner.phase(phase).succeed(summary.clone());
            if phase.next().is_none() {
                inner.state = WorkflowState::Complete;
            }
            info!(%phase, %summary, "Phase completed");
            emitter.phase_completed(phase);
        }
        Ok(PhaseOutcome::Incomplete { summary, .. }) => {
            inner.phase(phase).pause(summary.clone());
            info!(%phase, %summary, "Phase incomplete");
            emitter.log(LogLevel::Info, format!("phase {} incomplete: {}", phase, summary));
        }
        Ok(PhaseOutcome::Unavailable) => {
            inner.phase(phase).pause("unavailable");
        }
        Err(err) => {
            inner.phase(phase).fail(err);
            error!(%phase, kind = %err.kind(), error = %err, "Phase failed");
            emitter.workflow_failed(phase, err.to_string());
        }
    }

    inner.phase(phase).in_progress = still_running;
    inner.error = inner.phases.values().any(|p| p.last_error.is_some());
    inner.snapshot()
}

async fn persist_snapshot(generator: &Generator, snapshot: WorkflowSnapshot) {
    match serde_json::to_value(&snapshot) {
        Ok(value) => generator.persist(WORKFLOW_KEY, value).await,
        Err(e) => warn!(error = %e, "Could not encode workflow snapshot"),
    }
}

/// Export every registered façade's snapshot keyed by name
pub async fn export_all(orchestrator: &Orchestrator) -> Value {
    let mut out = serde_json::Map::new();
    for phase in Phase::ALL {
        if let Some(facade) = orchestrator.facade(phase) {
            out.insert(facade.name().to_string(), facade.snapshot().await);
        }
    }
    json!(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::facade::testing::{Harness, harness, settings};
    use crate::llm::client::mock::ScriptedClient;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Façade replaying scripted outcomes, optionally held at a gate
    struct StubFacade {
        phase: Phase,
        outcomes: Mutex<VecDeque<Result<PhaseOutcome, PipelineError>>>,
        gate: Option<Arc<Notify>>,
        entered: Arc<Notify>,
        calls: AtomicUsize,
        restored: Mutex<Option<Value>>,
    }

    impl StubFacade {
        fn new(phase: Phase, outcomes: Vec<Result<PhaseOutcome, PipelineError>>) -> Self {
            Self {
                phase,
                outcomes: Mutex::new(outcomes.into()),
                gate: None,
                entered: Arc::new(Notify::new()),
                calls: AtomicUsize::new(0),
                restored: Mutex::new(None),
            }
        }

        fn completing(phase: Phase) -> Self {
            Self::new(phase, vec![Ok(done(phase))])
        }

        fn gated(mut self, gate: Arc<Notify>) -> Self {
            self.gate = Some(gate);
            self
        }
    }

    fn done(phase: Phase) -> PhaseOutcome {
        PhaseOutcome::Completed {
            summary: format!("{} done", phase),
            output: json!({ "from": phase }),
        }
    }

    #[async_trait]
    impl Facade for StubFacade {
        fn phase(&self) -> Phase {
            self.phase
        }

        fn name(&self) -> &'static str {
            self.phase.as_str()
        }

        async fn run(&self, _input: Value, _options: &RunOptions) -> Result<PhaseOutcome, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.outcomes
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok(done(self.phase)))
        }

        async fn snapshot(&self) -> Value {
            json!({ "phase": self.phase })
        }

        async fn restore(&self, snapshot: Value) -> Result<(), PipelineError> {
            *self.restored.lock().await = Some(snapshot);
            Ok(())
        }
    }

    fn setup() -> Harness {
        harness(Arc::new(ScriptedClient::new(vec![])), settings())
    }

    fn orchestrator(h: &Harness, facades: Vec<Arc<StubFacade>>) -> Orchestrator {
        facades.into_iter().fold(
            Orchestrator::new(WorkflowConfig::default(), h.generator.clone()),
            |o, f| o.with_facade(f),
        )
    }

    #[tokio::test]
    async fn test_start_before_initialize() {
        let h = setup();
        let o = orchestrator(&h, vec![Arc::new(StubFacade::completing(Phase::Requirements))]);
        let err = o
            .start_phase(Phase::Requirements, json!("x"), &RunOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(o.current().await, WorkflowState::Idle);
    }

    #[tokio::test]
    async fn test_initialize_requires_requirements_facade() {
        let h = setup();
        let o = orchestrator(&h, vec![Arc::new(StubFacade::completing(Phase::Design))]);
        assert!(o.initialize().await.is_err());
        assert_eq!(o.current().await, WorkflowState::Idle);
    }

    #[tokio::test]
    async fn test_initialize_restores_snapshots() {
        let h = setup();
        let stub = Arc::new(StubFacade::completing(Phase::Requirements));
        let o = orchestrator(&h, vec![stub.clone()]);

        let persistence = h.generator.saver().persistence().clone();
        persistence.save("requirements", &json!({"functional": []})).await.unwrap();
        let mut phases = BTreeMap::new();
        phases.insert(
            Phase::Requirements,
            PhaseState {
                completed: true,
                in_progress: true,
                ..Default::default()
            },
        );
        let workflow = WorkflowSnapshot {
            state: WorkflowState::Active(Phase::Design),
            phases,
        };
        persistence
            .save(WORKFLOW_KEY, &serde_json::to_value(&workflow).unwrap())
            .await
            .unwrap();

        o.initialize().await.unwrap();
        assert_eq!(*stub.restored.lock().await, Some(json!({"functional": []})));
        assert_eq!(o.current().await, WorkflowState::Active(Phase::Design));
        let requirements = o.phase_state(Phase::Requirements).await;
        assert!(requirements.completed);
        assert!(!requirements.in_progress);
    }

    #[tokio::test]
    async fn test_phase_gating() {
        let h = setup();
        let o = orchestrator(
            &h,
            vec![
                Arc::new(StubFacade::completing(Phase::Requirements)),
                Arc::new(StubFacade::completing(Phase::Design)),
            ],
        );
        o.initialize().await.unwrap();

        let err = o
            .start_phase(Phase::Design, json!({}), &RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::PhaseGated {
                phase: Phase::Design,
                blocking: Phase::Requirements
            }
        ));

        o.start_phase(Phase::Requirements, json!("x"), &RunOptions::default())
            .await
            .unwrap();
        let outcome = o
            .start_phase(Phase::Design, json!({}), &RunOptions::default())
            .await
            .unwrap();
        assert!(outcome.is_completed());
        assert_eq!(o.current().await, WorkflowState::Active(Phase::Design));
    }

    #[tokio::test]
    async fn test_reentrant_start_is_busy() {
        let h = setup();
        let gate = Arc::new(Notify::new());
        let stub = Arc::new(StubFacade::completing(Phase::Requirements).gated(gate.clone()));
        let o = Arc::new(orchestrator(&h, vec![stub.clone()]));
        o.initialize().await.unwrap();

        let first = {
            let o = o.clone();
            tokio::spawn(async move { o.start_phase(Phase::Requirements, json!("x"), &RunOptions::default()).await })
        };
        stub.entered.notified().await;

        let err = o
            .start_phase(Phase::Requirements, json!("x"), &RunOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PhaseBusy);
        assert!(o.phase_state(Phase::Requirements).await.in_progress);

        gate.notify_one();
        assert!(first.await.unwrap().unwrap().is_completed());
        assert!(!o.phase_state(Phase::Requirements).await.in_progress);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_abandoned_start_still_releases_phase() {
        let h = setup();
        let gate = Arc::new(Notify::new());
        let stub = Arc::new(StubFacade::completing(Phase::Requirements).gated(gate.clone()));
        let o = orchestrator(&h, vec![stub.clone()]);
        o.initialize().await.unwrap();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            o.start_phase(Phase::Requirements, json!("x"), &RunOptions::default()),
        )
        .await;
        assert!(abandoned.is_err());

        gate.notify_one();
        let mut released = false;
        for _ in 0..100 {
            if !o.phase_state(Phase::Requirements).await.in_progress {
                released = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(released);
        assert!(o.phase_state(Phase::Requirements).await.completed);

        gate.notify_one();
        let outcome = o
            .start_phase(Phase::Requirements, json!("x"), &RunOptions::default())
            .await
            .unwrap();
        assert!(outcome.is_completed());
        assert_eq!(stub.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_phase_allows_reentry() {
        let h = setup();
        let gate = Arc::new(Notify::new());
        let stub = Arc::new(StubFacade::completing(Phase::Requirements).gated(gate.clone()));
        let config = WorkflowConfig {
            auto_progress: true,
            concurrent_phases: vec![Phase::Requirements],
        };
        let o = Arc::new(Orchestrator::new(config, h.generator.clone()).with_facade(stub.clone()));
        o.initialize().await.unwrap();

        let first = {
            let o = o.clone();
            tokio::spawn(async move { o.start_phase(Phase::Requirements, json!("a"), &RunOptions::default()).await })
        };
        stub.entered.notified().await;
        let second = {
            let o = o.clone();
            tokio::spawn(async move { o.start_phase(Phase::Requirements, json!("b"), &RunOptions::default()).await })
        };
        stub.entered.notified().await;
        assert_eq!(stub.calls.load(Ordering::SeqCst), 2);

        gate.notify_one();
        gate.notify_one();
        assert!(first.await.unwrap().is_ok());
        assert!(second.await.unwrap().is_ok());
        assert!(!o.phase_state(Phase::Requirements).await.in_progress);
    }

    #[tokio::test]
    async fn test_auto_progress_stops_at_unavailable_phase() {
        let mut h = setup();
        let o = orchestrator(
            &h,
            vec![
                Arc::new(StubFacade::completing(Phase::Requirements)),
                Arc::new(StubFacade::completing(Phase::Design)),
            ],
        );
        o.initialize().await.unwrap();
        h.drain_names();

        let outcomes = o
            .run(Phase::Requirements, json!("Build a login form"), &RunOptions::default(), None)
            .await
            .unwrap();
        let phases: Vec<Phase> = outcomes.iter().map(|(p, _)| *p).collect();
        assert_eq!(phases, vec![Phase::Requirements, Phase::Design, Phase::Codegen]);
        assert_eq!(outcomes[2].1, PhaseOutcome::Unavailable);

        assert_eq!(o.current().await, WorkflowState::Active(Phase::Design));
        assert!(!o.is_failed().await);

        let names = h.drain_names();
        assert_eq!(
            names,
            vec![
                "phase:start",
                "phase:complete",
                "phase:start",
                "phase:complete",
                "phase:unavailable"
            ]
        );
    }

    #[tokio::test]
    async fn test_completed_output_feeds_next_phase() {
        struct Echo;

        #[async_trait]
        impl Facade for Echo {
            fn phase(&self) -> Phase {
                Phase::Design
            }
            fn name(&self) -> &'static str {
                "echo"
            }
            async fn run(&self, input: Value, _options: &RunOptions) -> Result<PhaseOutcome, PipelineError> {
                Ok(PhaseOutcome::Completed {
                    summary: String::new(),
                    output: json!({ "seen": input }),
                })
            }
            async fn snapshot(&self) -> Value {
                Value::Null
            }
            async fn restore(&self, _snapshot: Value) -> Result<(), PipelineError> {
                Ok(())
            }
        }

        let h = setup();
        let o = Orchestrator::new(WorkflowConfig::default(), h.generator.clone())
            .with_facade(Arc::new(StubFacade::completing(Phase::Requirements)))
            .with_facade(Arc::new(Echo));
        o.initialize().await.unwrap();

        let outcomes = o
            .run(Phase::Requirements, json!("x"), &RunOptions::default(), Some(Phase::Design))
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[1].1.output(), Some(&json!({"seen": {"from": "requirements"}})));
    }

    #[tokio::test]
    async fn test_failure_sets_error_flag_and_retry_clears_it() {
        let mut h = setup();
        let failing = Arc::new(StubFacade::new(
            Phase::Requirements,
            vec![
                Err(PipelineError::Backend {
                    operation: "requirements.extract".to_string(),
                    message: "HTTP 500".to_string(),
                    retryable: true,
                }),
                Ok(done(Phase::Requirements)),
            ],
        ));
        let o = orchestrator(&h, vec![failing]);
        o.initialize().await.unwrap();

        let err = o
            .run(Phase::Requirements, json!("x"), &RunOptions::default(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Backend);
        assert!(o.is_failed().await);
        assert_eq!(o.current().await, WorkflowState::Active(Phase::Requirements));
        let state = o.phase_state(Phase::Requirements).await;
        assert_eq!(state.last_error.as_ref().map(|e| e.operation.as_str()), Some("requirements.extract"));
        assert!(h.drain_names().contains(&"workflow:error".to_string()));

        o.start_phase(Phase::Requirements, json!("x"), &RunOptions::default())
            .await
            .unwrap();
        assert!(!o.is_failed().await);
        assert!(o.phase_state(Phase::Requirements).await.completed);
    }

    #[tokio::test]
    async fn test_last_phase_completes_workflow() {
        let h = setup();
        let o = orchestrator(
            &h,
            Phase::ALL
                .into_iter()
                .map(|p| Arc::new(StubFacade::completing(p)))
                .collect(),
        );
        o.initialize().await.unwrap();

        let outcomes = o
            .run(Phase::Requirements, json!("x"), &RunOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 4);
        assert_eq!(o.current().await, WorkflowState::Complete);

        let status = o.status().await.unwrap();
        assert!(status.phases.values().all(|p| p.completed));
        assert!(status.unavailable.is_empty());
        assert!(!status.error);
    }

    #[tokio::test]
    async fn test_auto_progress_disabled() {
        let h = setup();
        let config = WorkflowConfig {
            auto_progress: false,
            concurrent_phases: Vec::new(),
        };
        let o = Orchestrator::new(config, h.generator.clone())
            .with_facade(Arc::new(StubFacade::completing(Phase::Requirements)))
            .with_facade(Arc::new(StubFacade::completing(Phase::Design)));
        o.initialize().await.unwrap();

        let outcomes = o
            .run(Phase::Requirements, json!("x"), &RunOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(o.current().await, WorkflowState::Active(Phase::Requirements));
    }

    #[tokio::test]
    async fn test_reset_and_status() {
        let h = setup();
        let o = orchestrator(&h, vec![Arc::new(StubFacade::completing(Phase::Requirements))]);
        o.initialize().await.unwrap();
        o.start_phase(Phase::Requirements, json!("x"), &RunOptions::default())
            .await
            .unwrap();

        let status = o.status().await.unwrap();
        assert_eq!(status.run_id, "test-run");
        assert_eq!(status.phases.len(), 4);
        assert_eq!(status.unavailable, vec![Phase::Design, Phase::Codegen, Phase::Testing]);
        let encoded = serde_json::to_value(&status).unwrap();
        assert_eq!(encoded["current"], json!({"state": "active", "phase": "requirements"}));

        o.reset().await;
        assert_eq!(o.current().await, WorkflowState::Idle);
        assert!(!o.phase_state(Phase::Requirements).await.completed);
        assert!(h.generator.saver().is_dirty(WORKFLOW_KEY).await);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_autosave() {
        let h = setup();
        let o = orchestrator(&h, vec![Arc::new(StubFacade::completing(Phase::Requirements))]);
        o.start_autosave(Duration::from_secs(3600));
        o.initialize().await.unwrap();
        o.start_phase(Phase::Requirements, json!("x"), &RunOptions::default())
            .await
            .unwrap();

        o.shutdown().await;
        let saved = h.generator.saver().persistence().load(WORKFLOW_KEY).await.unwrap();
        assert!(saved.is_some());
    }

    #[tokio::test]
    async fn test_export_all() {
        let h = setup();
        let o = orchestrator(
            &h,
            vec![
                Arc::new(StubFacade::completing(Phase::Requirements)),
                Arc::new(StubFacade::completing(Phase::Codegen)),
            ],
        );
        let exported = export_all(&o).await;
        assert_eq!(exported["requirements"], json!({"phase": "requirements"}));
        assert_eq!(exported["codegen"], json!({"phase": "codegen"}));
        assert!(exported.get("design").is_none());
    }
}
