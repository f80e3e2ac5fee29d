//! Agent executor - the ReAct loop
//!
//! One [`AgentExecutor::run`] drives a single user turn through
//! Thinking → ActingToolCall → Observing until the model answers, the run is
//! cancelled, or a fatal condition aborts it. Progress is reported as
//! [`AgentEvent`]s on an unbounded channel; the streaming layer turns those
//! into wire events.
//!
//! Suspension points are the provider stream, pool acquisition and tool
//! execution. Each one also waits on the run's cancellation token, which is
//! cancelled by the caller or by the run-level timeout.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::loop_detect::{LoopDetector, LoopKind};
use super::prompt::{loop_correction, DEFAULT_SYSTEM_PROMPT};
use super::state::AgentState;
use super::step::{AgentStep, NoopRecorder, StepRecorder, ToolCall};
use crate::config::AgentConfig;
use crate::llm::{ChatMessage, CompletionDelta, LlmProvider, ProviderError, Role};
use crate::metrics::{AGENT_RUNS, AGENT_STEPS, LLM_CALL_DURATION, LOOP_DETECTIONS, TOOL_CALLS, TOOL_DURATION};
use crate::sandbox::{ContainerHandle, ContainerPool, PoolError};
use crate::tools::{FailureKind, ToolContext, ToolRegistry, ToolResult, ToolSpec};

/// Why a run was aborted
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("sandbox container unavailable: {0}")]
    ContainerUnavailable(#[from] PoolError),
    #[error("sandbox container crashed: {0}")]
    ContainerCrashed(String),
    #[error("agent stopped: {0} even after a corrective hint")]
    LoopDetected(LoopKind),
    #[error("Task incomplete: reached maximum iterations ({ceiling}). Please try breaking down the task into smaller steps.")]
    IterationCeilingExceeded { ceiling: usize },
    #[error("run exceeded its time limit of {}s", .0.as_secs())]
    RunTimeout(Duration),
    #[error("{0}")]
    Provider(#[from] ProviderError),
}

impl AgentError {
    /// Label for the run-outcome metric
    pub fn outcome_label(&self) -> &'static str {
        match self {
            AgentError::ContainerUnavailable(_) | AgentError::ContainerCrashed(_) => "container",
            AgentError::LoopDetected(_) => "loop",
            AgentError::IterationCeilingExceeded { .. } => "max_iterations",
            AgentError::RunTimeout(_) => "timeout",
            AgentError::Provider(_) => "provider",
        }
    }
}

/// Progress of a run, in production order
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Model text as it streams in
    TextDelta(String),
    /// The model started a tool call
    ActionStreaming { tool: String, step: usize },
    /// Arguments received so far for the pending call
    ActionArgsChunk {
        tool: String,
        partial_args: String,
        step: usize,
    },
    /// Reasoning that preceded a tool call
    Thought { content: String, step: usize },
    /// A tool call is about to execute
    Action { tool: String, args: Value, step: usize },
    Observation {
        content: String,
        success: bool,
        step: usize,
    },
}

/// One user turn
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub session_id: String,
    /// Environment type of the sandbox (selects the image)
    pub environment: String,
    pub message: String,
    /// Earlier turns of the conversation, oldest first
    pub history: Vec<ChatMessage>,
}

#[derive(Debug)]
pub enum RunOutcome {
    Finished { answer: String },
    Aborted(AgentError),
    Cancelled,
}

#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub steps: Vec<AgentStep>,
    /// Conversation including this turn, without system messages
    pub transcript: Vec<ChatMessage>,
}

/// Ends the loop early
enum Interrupt {
    Cancelled,
    Fatal(AgentError),
}

impl From<AgentError> for Interrupt {
    fn from(e: AgentError) -> Self {
        Interrupt::Fatal(e)
    }
}

#[derive(Debug, Default)]
struct PendingCall {
    name: Option<String>,
    arguments: String,
}

/// What one streamed completion produced
#[derive(Debug, Default)]
struct Completion {
    text: String,
    calls: BTreeMap<usize, PendingCall>,
}

impl Completion {
    /// The lowest-indexed named call; any others are dropped
    fn into_parts(self, step: usize) -> (String, Option<(String, String)>) {
        let mut named = self
            .calls
            .into_values()
            .filter_map(|call| call.name.map(|name| (name, call.arguments)));
        let first = named.next();
        let dropped = named.count();
        if dropped > 0 {
            warn!(step, dropped, "model requested several tool calls, running only the first");
        }
        (self.text, first)
    }
}

/// Mutable state of one run
struct Run<'a> {
    session_id: &'a str,
    environment: &'a str,
    events: &'a UnboundedSender<AgentEvent>,
    token: CancellationToken,
    state: AgentState,
    messages: Vec<ChatMessage>,
    steps: Vec<AgentStep>,
    detector: LoopDetector,
    nudged: bool,
    container: Option<ContainerHandle>,
}

impl Run<'_> {
    fn emit(&self, event: AgentEvent) {
        // A dropped receiver only means nobody is listening
        let _ = self.events.send(event);
    }

    fn enter(&mut self, next: AgentState) {
        match self.state.advance(next) {
            Ok(state) => debug!(from = %self.state, to = %state, "agent state"),
            Err(e) => error!(error = %e, "unexpected agent state transition"),
        }
        self.state = next;
    }
}

/// Runs the ReAct loop against an LLM provider, a tool registry and the
/// container pool
pub struct AgentExecutor {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    pool: Arc<ContainerPool>,
    config: AgentConfig,
    recorder: Arc<dyn StepRecorder>,
}

impl AgentExecutor {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        pool: Arc<ContainerPool>,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            pool,
            config,
            recorder: Arc::new(NoopRecorder),
        }
    }

    /// Hand completed steps to a persistence collaborator
    pub fn with_recorder(mut self, recorder: Arc<dyn StepRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ContainerPool> {
        &self.pool
    }

    /// Run one user turn to completion, cancellation or abort
    pub async fn run(
        &self,
        request: RunRequest,
        events: UnboundedSender<AgentEvent>,
        cancel: CancellationToken,
    ) -> RunReport {
        let span = info_span!(
            "agent_run",
            session_id = %request.session_id,
            environment = %request.environment,
            model = %self.provider.model(),
            otel.name = "agent_run"
        );
        self.run_inner(request, events, cancel).instrument(span).await
    }

    async fn run_inner(
        &self,
        request: RunRequest,
        events: UnboundedSender<AgentEvent>,
        cancel: CancellationToken,
    ) -> RunReport {
        let started = Instant::now();
        let run_timeout = self.config.run_timeout();
        let token = cancel.child_token();
        let timer = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(run_timeout).await;
                token.cancel();
            })
        };

        let system_prompt = self
            .config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        let mut messages = vec![ChatMessage::system(system_prompt)];
        messages.extend(request.history.iter().filter(|m| m.role != Role::System).cloned());
        messages.push(ChatMessage::user(request.message.clone()));

        let mut run = Run {
            session_id: &request.session_id,
            environment: &request.environment,
            events: &events,
            token,
            state: AgentState::Idle,
            messages,
            steps: Vec::new(),
            detector: LoopDetector::new(self.config.loop_detection.clone()),
            nudged: false,
            container: None,
        };
        info!("starting agent run");

        let result = self.drive(&mut run).await;
        timer.abort();
        if run.container.is_some() {
            self.pool.release(&request.session_id).await;
        }

        let outcome = match result {
            Ok(answer) => RunOutcome::Finished { answer },
            Err(Interrupt::Cancelled) if cancel.is_cancelled() => {
                run.enter(AgentState::Cancelled);
                RunOutcome::Cancelled
            }
            Err(Interrupt::Cancelled) => {
                run.enter(AgentState::Aborted);
                RunOutcome::Aborted(AgentError::RunTimeout(run_timeout))
            }
            Err(Interrupt::Fatal(e)) => {
                run.enter(AgentState::Aborted);
                RunOutcome::Aborted(e)
            }
        };

        let label = match &outcome {
            RunOutcome::Finished { .. } => "finished",
            RunOutcome::Cancelled => "cancelled",
            RunOutcome::Aborted(e) => e.outcome_label(),
        };
        AGENT_RUNS.with_label_values(&[label]).inc();
        AGENT_STEPS.observe(run.steps.len() as f64);
        match &outcome {
            RunOutcome::Aborted(e) => warn!(
                steps = run.steps.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %e,
                "agent run aborted"
            ),
            _ => info!(
                steps = run.steps.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                outcome = label,
                "agent run ended"
            ),
        }

        RunReport {
            outcome,
            steps: run.steps,
            transcript: run.messages.into_iter().filter(|m| m.role != Role::System).collect(),
        }
    }

    async fn drive(&self, run: &mut Run<'_>) -> Result<String, Interrupt> {
        let specs = self.tools.specs();
        let ceiling = self.config.max_iterations.max(1);
        let mut step = 1;

        loop {
            if run.token.is_cancelled() {
                return Err(Interrupt::Cancelled);
            }

            run.enter(AgentState::Thinking);
            let completion = self.think(run, &specs, step).await?;
            let (text, call) = completion.into_parts(step);

            let Some((tool, raw_args)) = call else {
                if text.trim().is_empty() {
                    return Err(AgentError::Provider(ProviderError::Parse(
                        "Agent did not provide a response".to_string(),
                    ))
                    .into());
                }
                run.messages.push(ChatMessage::assistant(text.clone()));
                let final_step = AgentStep {
                    index: step,
                    thought: Some(text.clone()),
                    tool_call: None,
                    result: None,
                };
                self.recorder.record(run.session_id, &final_step).await;
                run.steps.push(final_step);
                run.enter(AgentState::Finished);
                return Ok(text);
            };

            run.enter(AgentState::ActingToolCall);
            let thought = Some(text.trim().to_string()).filter(|t| !t.is_empty());
            if let Some(content) = &thought {
                run.emit(AgentEvent::Thought {
                    content: content.clone(),
                    step,
                });
            }
            let (call, result) = self.act(run, &tool, &raw_args, step).await?;

            run.enter(AgentState::Observing);
            self.observe(run, thought, call, result, step).await?;

            if step >= ceiling {
                warn!(step, ceiling, "iteration ceiling reached");
                return Err(AgentError::IterationCeilingExceeded { ceiling }.into());
            }
            step += 1;
        }
    }

    /// Stream one completion, retrying retryable provider failures as long
    /// as nothing from the failed attempt reached the consumer
    async fn think(&self, run: &mut Run<'_>, specs: &[ToolSpec], step: usize) -> Result<Completion, Interrupt> {
        let mut attempt = 0u32;
        loop {
            let started = Instant::now();
            let mut emitted = false;
            let span = info_span!("llm_call", step, attempt, otel.name = "llm_call");
            let result = self.stream_once(run, specs, step, &mut emitted).instrument(span).await;
            LLM_CALL_DURATION
                .with_label_values(&[self.provider.model()])
                .observe(started.elapsed().as_secs_f64());

            match result {
                Err(Interrupt::Fatal(AgentError::Provider(e)))
                    if e.is_retryable() && !emitted && attempt < self.config.provider_retries =>
                {
                    attempt += 1;
                    let delay = self.config.provider_retry_delay() * 2u32.saturating_pow(attempt - 1);
                    warn!(step, attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying provider call");
                    tokio::select! {
                        _ = run.token.cancelled() => return Err(Interrupt::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                other => return other,
            }
        }
    }

    async fn stream_once(
        &self,
        run: &mut Run<'_>,
        specs: &[ToolSpec],
        step: usize,
        emitted: &mut bool,
    ) -> Result<Completion, Interrupt> {
        let token = run.token.clone();
        let mut stream = tokio::select! {
            _ = token.cancelled() => return Err(Interrupt::Cancelled),
            result = self.provider.stream_completion(&run.messages, specs) => result.map_err(AgentError::Provider)?,
        };

        let mut completion = Completion::default();
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Interrupt::Cancelled),
                next = stream.next() => next,
            };
            let Some(delta) = next else {
                break;
            };

            match delta.map_err(AgentError::Provider)? {
                CompletionDelta::TextDelta(text) => {
                    if text.is_empty() {
                        continue;
                    }
                    completion.text.push_str(&text);
                    run.emit(AgentEvent::TextDelta(text));
                    *emitted = true;
                }
                CompletionDelta::ToolCallDelta { index, name, arguments } => {
                    let call = completion.calls.entry(index).or_default();
                    if call.name.is_none() {
                        if let Some(name) = name {
                            debug!(step, tool = %name, "tool call streaming");
                            run.emit(AgentEvent::ActionStreaming {
                                tool: name.clone(),
                                step,
                            });
                            call.name = Some(name);
                            *emitted = true;
                        }
                    }
                    call.arguments.push_str(&arguments);
                    if let (Some(tool), false) = (&call.name, arguments.is_empty()) {
                        run.emit(AgentEvent::ActionArgsChunk {
                            tool: tool.clone(),
                            partial_args: call.arguments.clone(),
                            step,
                        });
                        *emitted = true;
                    }
                }
                CompletionDelta::ToolCallComplete { index } => {
                    debug!(step, index, "tool call complete");
                }
            }
        }
        Ok(completion)
    }

    /// Validate and execute a tool call. Validation failures come back as a
    /// failed result so the model can correct itself.
    async fn act(
        &self,
        run: &mut Run<'_>,
        name: &str,
        raw_args: &str,
        step: usize,
    ) -> Result<(ToolCall, ToolResult), Interrupt> {
        let raw = if raw_args.trim().is_empty() {
            Value::Null
        } else {
            Value::String(raw_args.to_string())
        };

        let validated = self
            .tools
            .validate(name, &raw)
            .map_err(|e| e.feedback(self.tools.spec(name)))
            .and_then(|args| self.tools.resolve(name).map(|tool| (args, tool)).map_err(|e| e.to_string()));
        let (args, tool) = match validated {
            Ok(pair) => pair,
            Err(feedback) => {
                let shown = serde_json::from_str(raw_args).unwrap_or(raw);
                debug!(step, tool = name, "tool call rejected by validation");
                run.emit(AgentEvent::Action {
                    tool: name.to_string(),
                    args: shown.clone(),
                    step,
                });
                let metric_tool = if self.tools.spec(name).is_some() { name } else { "unknown" };
                TOOL_CALLS.with_label_values(&[metric_tool, "invalid"]).inc();
                let call = ToolCall {
                    tool: name.to_string(),
                    arguments: shown,
                    step,
                };
                return Ok((call, ToolResult::failed(FailureKind::Validation, feedback)));
            }
        };

        let call = ToolCall {
            tool: name.to_string(),
            arguments: args.to_value(),
            step,
        };
        run.emit(AgentEvent::Action {
            tool: name.to_string(),
            args: args.to_value(),
            step,
        });

        let ctx = if tool.spec().requires_container {
            let handle = self.container(run).await?;
            ToolContext::new(
                self.pool.runtime(),
                handle,
                self.config.tool_timeout(),
                self.config.max_tool_timeout(),
                run.token.clone(),
            )
        } else {
            ToolContext::detached(self.config.tool_timeout(), run.token.clone())
        };

        let started = Instant::now();
        let span = info_span!("tool_execution", tool = name, step, otel.name = "tool_execution");
        let result = match tool.execute(&args, &ctx).instrument(span).await {
            Ok(result) => result,
            Err(e) => ToolResult::from(e),
        };
        TOOL_DURATION
            .with_label_values(&[name])
            .observe(started.elapsed().as_secs_f64());
        TOOL_CALLS.with_label_values(&[name, status_label(&result)]).inc();

        if run.token.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        debug!(step, tool = name, success = result.success, "tool finished");
        Ok((call, result))
    }

    /// The session's container, acquired on first use within the run
    async fn container(&self, run: &mut Run<'_>) -> Result<ContainerHandle, Interrupt> {
        if let Some(handle) = &run.container {
            return Ok(handle.clone());
        }
        let handle = tokio::select! {
            _ = run.token.cancelled() => {
                // The pool finishes binding on its own; mark it idle once it lands.
                let pool = Arc::clone(&self.pool);
                let session_id = run.session_id.to_string();
                tokio::spawn(async move { pool.release(&session_id).await });
                return Err(Interrupt::Cancelled);
            }
            result = self.pool.acquire(run.session_id, run.environment) => result.map_err(AgentError::ContainerUnavailable)?,
        };
        run.container = Some(handle.clone());
        Ok(handle)
    }

    /// Feed the result back, record the step and apply the loop policy
    async fn observe(
        &self,
        run: &mut Run<'_>,
        thought: Option<String>,
        call: ToolCall,
        result: ToolResult,
        step: usize,
    ) -> Result<(), Interrupt> {
        run.emit(AgentEvent::Observation {
            content: result.output.clone(),
            success: result.success,
            step,
        });
        run.messages.push(ChatMessage::assistant_tool_call(
            thought.clone().unwrap_or_default(),
            call.tool.clone(),
            call.arguments.clone(),
        ));
        run.messages.push(ChatMessage::tool(call.tool.clone(), result.output.clone()));

        let fatal = result.is_fatal().then(|| result.output.clone());
        let category = result.failure_kind().unwrap_or(FailureKind::Execution);
        let error = (!result.success).then(|| (category.as_str(), result.output.as_str()));
        let detection = run.detector.record(&call.tool, error);

        let record = AgentStep {
            index: step,
            thought,
            tool_call: Some(call),
            result: Some(result),
        };
        self.recorder.record(run.session_id, &record).await;
        run.steps.push(record);

        if let Some(output) = fatal {
            return Err(AgentError::ContainerCrashed(output).into());
        }

        if let Some(kind) = detection {
            LOOP_DETECTIONS.with_label_values(&[kind.as_str()]).inc();
            if run.nudged {
                warn!(step, kind = kind.as_str(), "loop persisted after correction");
                return Err(AgentError::LoopDetected(kind).into());
            }
            warn!(step, kind = kind.as_str(), "loop detected, injecting correction");
            run.messages.push(ChatMessage::system(loop_correction(&kind.to_string())));
            run.detector.clear();
            run.nudged = true;
        }
        Ok(())
    }
}

fn status_label(result: &ToolResult) -> &'static str {
    match result.failure_kind() {
        None => "success",
        Some(FailureKind::Validation) => "invalid",
        Some(FailureKind::Execution) => "error",
        Some(FailureKind::Timeout) => "timeout",
        Some(FailureKind::Cancelled) => "cancelled",
        Some(FailureKind::ContainerCrashed) => "fatal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_keeps_lowest_index() {
        let mut completion = Completion {
            text: "plan".into(),
            ..Completion::default()
        };
        completion.calls.insert(
            2,
            PendingCall {
                name: Some("think".into()),
                arguments: "{}".into(),
            },
        );
        completion.calls.insert(
            0,
            PendingCall {
                name: Some("bash".into()),
                arguments: r#"{"command":"ls"}"#.into(),
            },
        );
        let (text, call) = completion.into_parts(1);
        assert_eq!(text, "plan");
        assert_eq!(call, Some(("bash".to_string(), r#"{"command":"ls"}"#.to_string())));
    }

    #[test]
    fn test_unnamed_calls_are_ignored() {
        let mut completion = Completion::default();
        completion.calls.insert(0, PendingCall::default());
        assert_eq!(completion.into_parts(1).1, None);
    }

    #[test]
    fn test_error_messages() {
        let err = AgentError::IterationCeilingExceeded { ceiling: 30 };
        assert!(err.to_string().contains("maximum iterations (30)"));
        assert_eq!(err.outcome_label(), "max_iterations");

        let err = AgentError::Provider(ProviderError::Status {
            status: 500,
            body: "boom".into(),
        });
        assert_eq!(err.to_string(), "provider returned HTTP 500: boom");
    }
}
