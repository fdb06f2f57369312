//! Shared generation machinery for all façades
//!
//! One call runs: build the request, fingerprint it, single-flight cache
//! lookup, begin a task, stream (or complete) through the decoder with
//! snapshot relay, retry, finalize the task, write the cache, merge, emit.

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::RunOptions;
use crate::cache::{Cached, Fingerprint, ResultCache};
use crate::config::Config;
use crate::decode::{DEFAULT_EXPECTED_LEN, Decoder, Emission, Target, decode_stream};
use crate::error::PipelineError;
use crate::events::{Emitter, LogLevel};
use crate::llm::{GenerationRequest, LlmClient, ModelParams};
use crate::orchestrator::Phase;
use crate::persistence::AutoSaver;
use crate::prompts::{PromptLoader, Template};
use crate::registry::{StreamSession, TaskFailure, TaskHandle, TaskRegistry, TaskStatus};

/// Buffered chunks between the transport and the decoder
const CHUNK_BUFFER: usize = 256;

/// Generation behaviour shared by every operation
#[derive(Debug, Clone, Copy)]
pub struct GenerationSettings {
    pub streaming: bool,
    pub task_timeout: Option<Duration>,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub params: ModelParams,
}

impl GenerationSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            streaming: config.generation.streaming,
            task_timeout: config.generation.task_timeout(),
            max_attempts: config.generation.max_attempts.max(1),
            retry_backoff: config.generation.retry_backoff(),
            params: ModelParams {
                temperature: config.llm.temperature,
                max_tokens: config.llm.max_tokens,
            },
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            streaming: true,
            task_timeout: Some(Duration::from_secs(180)),
            max_attempts: 2,
            retry_backoff: Duration::from_millis(500),
            params: ModelParams::default(),
        }
    }
}

/// One façade operation's generation call
pub struct Call {
    /// Dotted operation name, e.g. `codegen.file`
    pub operation: &'static str,
    pub phase: Phase,
    pub system_prompt: &'static str,
    pub prompt: String,
    pub target: Target,
    /// Size hint for progress estimation
    pub expected_len: usize,
    /// Structural check of a decoded value; a failure counts as malformed output
    pub check: Option<fn(&Value) -> Result<(), String>>,
}

impl Call {
    pub fn new(
        operation: &'static str,
        phase: Phase,
        system_prompt: &'static str,
        prompt: String,
        target: Target,
    ) -> Self {
        Self {
            operation,
            phase,
            system_prompt,
            prompt,
            target,
            expected_len: DEFAULT_EXPECTED_LEN,
            check: None,
        }
    }

    pub fn with_expected_len(mut self, expected_len: usize) -> Self {
        self.expected_len = expected_len;
        self
    }

    pub fn with_check(mut self, check: fn(&Value) -> Result<(), String>) -> Self {
        self.check = Some(check);
        self
    }
}

/// Runs generation calls on behalf of the façades
pub struct Generator {
    llm: Arc<dyn LlmClient>,
    cache: Arc<ResultCache>,
    registry: TaskRegistry,
    emitter: Emitter,
    prompts: Arc<PromptLoader>,
    saver: Arc<AutoSaver>,
    settings: GenerationSettings,
}

impl Generator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        cache: Arc<ResultCache>,
        registry: TaskRegistry,
        emitter: Emitter,
        prompts: Arc<PromptLoader>,
        saver: Arc<AutoSaver>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            llm,
            cache,
            registry,
            emitter,
            prompts,
            saver,
            settings,
        }
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub fn saver(&self) -> &Arc<AutoSaver> {
        &self.saver
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// Render a prompt template for an operation
    pub fn render<T: Serialize>(&self, operation: &str, template: Template, context: &T) -> Result<String, PipelineError> {
        self.prompts
            .render(template, context)
            .map_err(|e| PipelineError::Internal {
                operation: operation.to_string(),
                message: format!("{:#}", e),
            })
    }

    /// Queue a façade snapshot for the next autosave cycle
    pub async fn persist(&self, key: &str, snapshot: Value) {
        self.saver.mark_dirty(key, snapshot).await;
    }

    /// Run one operation end to end
    ///
    /// `merge` folds the result into the façade's state and returns a short
    /// summary for the completion event. It runs on cache hits too, so it
    /// must be idempotent. It never runs when the operation fails.
    pub async fn generate<M, Fut>(&self, call: Call, options: &RunOptions, merge: M) -> Result<Cached, PipelineError>
    where
        M: FnOnce(Value) -> Fut,
        Fut: Future<Output = String>,
    {
        let operation = call.operation;
        let streaming = options.streaming.unwrap_or(self.settings.streaming);
        let request = GenerationRequest::new(operation, call.system_prompt, call.prompt.clone())
            .with_params(self.settings.params)
            .with_streaming(streaming);
        let fp = Fingerprint::of(&request);
        debug!(%operation, fingerprint = %fp.short(), streaming, force = options.force, "generate: called");

        self.emitter.operation_started(operation);

        let task_id = OnceLock::new();
        let result = self
            .cache
            .get_or_compute(&fp, options.force, || self.compute(&call, &request, &task_id))
            .await;

        let emitter = match task_id.get() {
            Some(id) => self.emitter.correlated(id.clone()),
            None => self.emitter.clone(),
        };

        match result {
            Ok(cached) => {
                if cached.from_cache {
                    self.emitter.log(LogLevel::Info, format!("{}: cache hit", operation));
                }
                let summary = merge(cached.value.clone()).await;
                info!(%operation, from_cache = cached.from_cache, %summary, "Operation complete");
                emitter.operation_completed(operation, cached.from_cache, summary);
                Ok(cached)
            }
            Err(err) => {
                error!(%operation, kind = %err.kind(), error = %err, "Operation failed");
                emitter.operation_failed(operation, Some(call.phase), &err);
                Err(err)
            }
        }
    }

    /// Cache-miss path: one task, one or more attempts
    async fn compute(
        &self,
        call: &Call,
        request: &GenerationRequest,
        task_slot: &OnceLock<String>,
    ) -> Result<Value, PipelineError> {
        let operation = call.operation;
        let handle = self
            .registry
            .begin_task(operation, self.settings.task_timeout)
            .await
            .map_err(|e| e.into_pipeline(operation))?;
        let _ = task_slot.set(handle.id.clone());

        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;
        let (mut session, outcome) = loop {
            let (mut session, result) = self.attempt(call, request, &handle).await;
            match result {
                Err(err) if err.is_retryable() && attempt < max_attempts && !handle.token.is_cancelled() => {
                    session.fail(err.kind());
                    self.emitter
                        .correlated(session.id.clone())
                        .stream_failed(&session.id, &err);
                    warn!(%operation, attempt, max_attempts, error = %err, "Attempt failed, retrying");
                    self.emitter.correlated(handle.id.clone()).log(
                        LogLevel::Info,
                        format!("{} attempt {}/{} failed, retrying: {}", operation, attempt, max_attempts, err),
                    );

                    let backoff = self.settings.retry_backoff * 2u32.saturating_pow(attempt - 1);
                    tokio::select! {
                        biased;
                        _ = handle.token.cancelled() => {}
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    attempt += 1;
                }
                other => break (session, other),
            }
        };

        // The registry's status is authoritative when a deadline races the result
        let result = match outcome {
            Ok(value) => match self.registry.complete_task(&handle.id, value.clone()).await {
                Ok(TaskStatus::Completed) => Ok(value),
                Ok(status) => {
                    warn!(%operation, task_id = %handle.id, %status, "Result discarded, task already finalized");
                    Err(status_error(operation, status))
                }
                Err(e) => Err(e.into_pipeline(operation)),
            },
            Err(err) => {
                let failure = TaskFailure {
                    kind: err.kind(),
                    message: err.to_string(),
                };
                match self.registry.fail_task(&handle.id, failure).await {
                    Ok(status @ (TaskStatus::Timeout | TaskStatus::Cancelled)) => Err(status_error(operation, status)),
                    Ok(_) => Err(err),
                    Err(e) => {
                        warn!(%operation, error = %e, "Could not record task failure");
                        Err(err)
                    }
                }
            }
        };

        let stream_emitter = self.emitter.correlated(session.id.clone());
        match &result {
            Ok(value) => {
                session.complete(value.clone());
                stream_emitter.stream_completed(&session.id);
            }
            Err(err) => {
                session.fail(err.kind());
                stream_emitter.stream_failed(&session.id, err);
            }
        }
        debug!(
            task_id = %handle.id,
            session_id = %session.id,
            status = ?session.status,
            raw_len = session.raw.len(),
            attempts = attempt,
            "compute: finished"
        );
        result
    }

    /// One attempt under a task, in its own stream session
    async fn attempt(
        &self,
        call: &Call,
        request: &GenerationRequest,
        handle: &TaskHandle,
    ) -> (StreamSession, Result<Value, PipelineError>) {
        let operation = call.operation;
        let mut session = StreamSession::new(&handle.id);
        if let Err(e) = self.registry.attach_session(&handle.id, &session.id).await {
            return (session, Err(e.into_pipeline(operation)));
        }

        let result = if handle.token.is_cancelled() {
            Err(PipelineError::Cancelled {
                operation: operation.to_string(),
            })
        } else if request.streaming {
            self.stream_once(call, request, handle, &mut session).await
        } else {
            self.complete_once(call, request, handle, &mut session).await
        };

        let result = result.and_then(|value| match call.check {
            Some(check) => check(&value)
                .map(|()| value)
                .map_err(|message| PipelineError::MalformedOutput {
                    operation: operation.to_string(),
                    message,
                }),
            None => Ok(value),
        });
        (session, result)
    }

    async fn stream_once(
        &self,
        call: &Call,
        request: &GenerationRequest,
        handle: &TaskHandle,
        session: &mut StreamSession,
    ) -> Result<Value, PipelineError> {
        let operation = call.operation;
        let (chunk_tx, mut chunk_rx) = mpsc::channel(CHUNK_BUFFER);
        let mut decoder = Decoder::new(&call.target, call.expected_len);
        let stream_emitter = self.emitter.correlated(session.id.clone());
        let registry = &self.registry;
        let task_id = handle.id.as_str();

        let outcome = {
            let session_id = session.id.clone();
            let relay = |emission: &Emission| {
                if matches!(emission, Emission::Snapshot { .. }) && session.record(emission) {
                    registry.update_progress(task_id, session.progress);
                    stream_emitter.stream_update(&session_id, session.progress, emission.value().clone());
                }
            };

            let sending = self.llm.stream(request.to_completion(), chunk_tx);
            tokio::pin!(sending);
            let decoding = decode_stream(&mut decoder, &mut chunk_rx, &handle.token, relay);
            tokio::pin!(decoding);

            // Whichever side finishes first decides; the other is dropped,
            // which aborts the HTTP request when the decoder resolves early.
            tokio::select! {
                biased;
                sent = &mut sending => match sent {
                    Err(e) => Err(PipelineError::from_llm(operation, e)),
                    Ok(_) => decoding.await.map_err(|e| PipelineError::from_decode(operation, e)),
                },
                decoded = &mut decoding => decoded.map_err(|e| PipelineError::from_decode(operation, e)),
            }
        };

        session.append(decoder.raw());
        outcome
    }

    async fn complete_once(
        &self,
        call: &Call,
        request: &GenerationRequest,
        handle: &TaskHandle,
        session: &mut StreamSession,
    ) -> Result<Value, PipelineError> {
        let operation = call.operation;
        let response = tokio::select! {
            biased;
            _ = handle.token.cancelled() => Err(PipelineError::Cancelled {
                operation: operation.to_string(),
            }),
            response = self.llm.complete(request.to_completion()) => {
                response.map_err(|e| PipelineError::from_llm(operation, e))
            }
        }?;

        let text = response.content.unwrap_or_default();
        session.append(&text);
        Decoder::decode_all(&call.target, &text).map_err(|e| PipelineError::from_decode(operation, e))
    }
}

fn status_error(operation: &str, status: TaskStatus) -> PipelineError {
    match status {
        TaskStatus::Timeout => PipelineError::Timeout {
            operation: operation.to_string(),
        },
        TaskStatus::Cancelled => PipelineError::Cancelled {
            operation: operation.to_string(),
        },
        other => PipelineError::Internal {
            operation: operation.to_string(),
            message: format!("task finalized as {}", other),
        },
    }
}
