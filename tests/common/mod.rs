//! Shared test doubles: an in-memory container runtime and a scripted LLM

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use tokio::sync::Notify;

use codebox::config::{AgentConfig, PoolConfig, StreamConfig};
use codebox::llm::{ChatMessage, CompletionDelta, CompletionStream, LlmProvider, ProviderError};
use codebox::sandbox::{
    ContainerHandle, ContainerPool, ContainerRuntime, ContainerSpec, ContainerSummary, ContainerState, ExecOutput,
    RuntimeError,
};
use codebox::tools::{ToolRegistry, ToolSpec};
use codebox::agent::{AgentStep, StepRecorder};
use codebox::AgentExecutor;

// ─────────────────────────────────────────────────────────────────────────────
// Container runtime
// ─────────────────────────────────────────────────────────────────────────────

/// Reply to an exec whose script contains a given substring
#[derive(Debug, Clone)]
pub enum ExecReply {
    Output(ExecOutput),
    /// Block until the process group is killed, then exit 137
    Hang,
    /// The container dies underneath the command
    Crash,
}

impl ExecReply {
    pub fn exit(code: i64, stdout: &str, stderr: &str) -> Self {
        ExecReply::Output(ExecOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code: code,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub running: bool,
    pub created_unix: i64,
    pub files: HashMap<String, Vec<u8>>,
}

#[derive(Default)]
struct FakeState {
    containers: Vec<FakeContainer>,
    rules: Vec<(String, ExecReply)>,
    scripts: Vec<String>,
    kills: usize,
    creates: usize,
    max_live: usize,
    fail_create: bool,
}

/// In-memory stand-in for the Docker Engine
pub struct FakeRuntime {
    state: Mutex<FakeState>,
    next_id: AtomicUsize,
    killed: Notify,
    create_delay: Duration,
    rename_delay: Duration,
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::with_create_delay(Duration::ZERO)
    }

    /// Slow provisioning, to widen race windows
    pub fn with_create_delay(create_delay: Duration) -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            next_id: AtomicUsize::new(1),
            killed: Notify::new(),
            create_delay,
            rename_delay: Duration::ZERO,
        }
    }

    /// Slow warm-container binding
    pub fn with_rename_delay(mut self, rename_delay: Duration) -> Self {
        self.rename_delay = rename_delay;
        self
    }

    pub fn on_exec(&self, script_contains: &str, reply: ExecReply) {
        self.state.lock().unwrap().rules.push((script_contains.to_string(), reply));
    }

    pub fn fail_create(&self, fail: bool) {
        self.state.lock().unwrap().fail_create = fail;
    }

    /// A container the pool knows nothing about
    pub fn add_foreign(&self, name: &str, age_secs: i64) -> String {
        let id = format!("foreign{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut state = self.state.lock().unwrap();
        state.containers.push(FakeContainer {
            id: id.clone(),
            name: name.to_string(),
            image: "leftover".to_string(),
            running: true,
            created_unix: now_unix() - age_secs,
            files: HashMap::new(),
        });
        id
    }

    /// Simulate the container process dying
    pub fn crash(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.containers.iter_mut().find(|c| c.id == id) {
            c.running = false;
        }
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.state.lock().unwrap().containers.clone()
    }

    pub fn container_named(&self, name: &str) -> Option<FakeContainer> {
        self.containers().into_iter().find(|c| c.name == name)
    }

    pub fn put_file(&self, id: &str, path: &str, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.containers.iter_mut().find(|c| c.id == id) {
            c.files.insert(path.to_string(), data.to_vec());
        }
    }

    pub fn file(&self, id: &str, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state.containers.iter().find(|c| c.id == id)?.files.get(path).cloned()
    }

    /// Scripts executed so far (the user-level script, not the wrapper)
    pub fn scripts(&self) -> Vec<String> {
        self.state.lock().unwrap().scripts.clone()
    }

    pub fn kills(&self) -> usize {
        self.state.lock().unwrap().kills
    }

    pub fn creates(&self) -> usize {
        self.state.lock().unwrap().creates
    }

    /// Most containers that ever existed at the same time
    pub fn max_live(&self) -> usize {
        self.state.lock().unwrap().max_live
    }

    fn find<'a>(state: &'a mut FakeState, id: &str) -> Option<&'a mut FakeContainer> {
        state.containers.iter_mut().find(|c| c.id == id || c.name == id)
    }

    /// Emulate the file helper scripts against the in-memory file map
    fn file_script(container: &mut FakeContainer, script: &str, args: &[String]) -> Option<ExecOutput> {
        let path = args.first()?.clone();
        if script.contains("base64 -d >>") {
            let data = STANDARD.decode(args.get(1)?).ok()?;
            container.files.entry(path).or_default().extend(data);
            return Some(ExecOutput::default());
        }
        if script.contains("base64 -d >") {
            let data = STANDARD.decode(args.get(1)?).ok()?;
            container.files.insert(path, data);
            return Some(ExecOutput::default());
        }
        if script.contains("base64 -w0") {
            return Some(match container.files.get(&path) {
                Some(data) => ExecOutput {
                    stdout: STANDARD.encode(data),
                    stderr: String::new(),
                    exit_code: 0,
                },
                None => ExecOutput {
                    stdout: String::new(),
                    stderr: format!("File not found: {}", path),
                    exit_code: 44,
                },
            });
        }
        None
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(RuntimeError::Api {
                status: 500,
                message: "image not found".to_string(),
            });
        }
        if state.containers.iter().any(|c| c.name == spec.name) {
            return Err(RuntimeError::Conflict(spec.name.clone()));
        }
        let id = format!("c{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        state.containers.push(FakeContainer {
            id: id.clone(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            running: false,
            created_unix: now_unix(),
            files: HashMap::new(),
        });
        state.creates += 1;
        state.max_live = state.max_live.max(state.containers.len());
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        let container = Self::find(&mut state, id).ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.running = true;
        Ok(())
    }

    async fn exec(&self, id: &str, argv: &[String], _workdir: Option<&str>) -> Result<ExecOutput, RuntimeError> {
        let reply = {
            let mut state = self.state.lock().unwrap();
            let container = Self::find(&mut state, id).ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
            if !container.running {
                return Err(RuntimeError::NotRunning(id.to_string()));
            }

            if argv.get(3).map(String::as_str) == Some("codebox-kill") {
                state.kills += 1;
                drop(state);
                self.killed.notify_waiters();
                return Ok(ExecOutput::default());
            }
            if argv.len() < 9 {
                // Direct exec (workspace reset)
                state.scripts.push(argv.last().cloned().unwrap_or_default());
                return Ok(ExecOutput::default());
            }

            let script = argv[8].clone();
            let args: Vec<String> = argv[10..].to_vec();
            if let Some(output) = Self::file_script(container, &script, &args) {
                state.scripts.push(script);
                return Ok(output);
            }
            let reply = state
                .rules
                .iter()
                .find(|(needle, _)| script.contains(needle.as_str()))
                .map(|(_, reply)| reply.clone())
                .unwrap_or_else(|| ExecReply::exit(0, "ok", ""));
            state.scripts.push(script);
            reply
        };

        match reply {
            ExecReply::Output(output) => Ok(output),
            ExecReply::Hang => {
                self.killed.notified().await;
                Ok(ExecOutput {
                    exit_code: 137,
                    ..ExecOutput::default()
                })
            }
            ExecReply::Crash => {
                self.crash(id);
                Err(RuntimeError::NotRunning(id.to_string()))
            }
        }
    }

    async fn is_running(&self, id: &str) -> Result<bool, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        Self::find(&mut state, id)
            .map(|c| c.running)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    async fn stop(&self, id: &str, _timeout_secs: u32) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        let container = Self::find(&mut state, id).ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.running = false;
        Ok(())
    }

    async fn remove(&self, id: &str, _force: bool) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        let before = state.containers.len();
        state.containers.retain(|c| c.id != id && c.name != id);
        if state.containers.len() == before {
            return Err(RuntimeError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn rename(&self, id: &str, new_name: &str) -> Result<(), RuntimeError> {
        if !self.rename_delay.is_zero() {
            tokio::time::sleep(self.rename_delay).await;
        }
        let mut state = self.state.lock().unwrap();
        if state.containers.iter().any(|c| c.name == new_name) {
            return Err(RuntimeError::Conflict(new_name.to_string()));
        }
        let container = Self::find(&mut state, id).ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.name = new_name.to_string();
        Ok(())
    }

    async fn list(&self, name_prefix: &str) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .filter(|c| c.name.starts_with(name_prefix))
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                name: c.name.clone(),
                created_unix: c.created_unix,
                running: c.running,
            })
            .collect())
    }
}

/// Wait until the session's container is bound and idle
pub async fn settled(pool: &ContainerPool, session_id: &str) -> ContainerHandle {
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if let Some(handle) = pool.handle(session_id).await {
                if handle.state == ContainerState::Ready {
                    return handle;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("container never settled")
}

pub fn pool_config(max_containers: usize) -> PoolConfig {
    PoolConfig {
        max_containers,
        acquire_timeout_secs: 1,
        ..PoolConfig::default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LLM provider
// ─────────────────────────────────────────────────────────────────────────────

/// One scripted completion
#[derive(Debug, Clone)]
pub enum Turn {
    Deltas(Vec<Result<CompletionDelta, ProviderError>>),
    /// `stream_completion` itself fails
    Fail(ProviderError),
    /// The stream never yields
    Hang,
}

impl Turn {
    /// Final answer streamed in small pieces
    pub fn text(answer: &str) -> Self {
        let chars: Vec<char> = answer.chars().collect();
        Turn::Deltas(
            chars
                .chunks(3)
                .map(|piece| Ok(CompletionDelta::TextDelta(piece.iter().collect())))
                .collect(),
        )
    }

    /// A tool call with its arguments split across two deltas
    pub fn tool(name: &str, args: Value) -> Self {
        Self::thought_then_tool("", name, args)
    }

    pub fn thought_then_tool(thought: &str, name: &str, args: Value) -> Self {
        let raw = args.to_string();
        let mid = raw.len() / 2;
        let mut deltas = Vec::new();
        if !thought.is_empty() {
            deltas.push(Ok(CompletionDelta::TextDelta(thought.to_string())));
        }
        deltas.push(Ok(CompletionDelta::ToolCallDelta {
            index: 0,
            name: Some(name.to_string()),
            arguments: raw[..mid].to_string(),
        }));
        deltas.push(Ok(CompletionDelta::ToolCallDelta {
            index: 0,
            name: None,
            arguments: raw[mid..].to_string(),
        }));
        deltas.push(Ok(CompletionDelta::ToolCallComplete { index: 0 }));
        Turn::Deltas(deltas)
    }
}

/// Replays scripted turns and records every request
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<Turn>>,
    fallback: Option<Turn>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    tool_names: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
            tool_names: Mutex::new(Vec::new()),
        }
    }

    /// After the scripted turns run out, repeat `turn` forever
    pub fn then_repeat(mut self, turn: Turn) -> Self {
        self.fallback = Some(turn);
        self
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn offered_tools(&self) -> Vec<String> {
        self.tool_names.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn stream_completion(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<CompletionStream, ProviderError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        *self.tool_names.lock().unwrap() = tools.iter().map(|t| t.name.clone()).collect();

        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| Turn::text("done"));
        match turn {
            Turn::Deltas(deltas) => Ok(Box::pin(futures_util::stream::iter(deltas))),
            Turn::Fail(e) => Err(e),
            Turn::Hang => Ok(Box::pin(futures_util::stream::pending::<Result<CompletionDelta, ProviderError>>())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wiring
// ─────────────────────────────────────────────────────────────────────────────

pub fn agent_config() -> AgentConfig {
    AgentConfig {
        provider_retry_delay_ms: 1,
        ..AgentConfig::default()
    }
}

pub fn stream_config() -> StreamConfig {
    StreamConfig {
        flush_interval_ms: 5,
        ..StreamConfig::default()
    }
}

/// Keeps every step handed to it, in order
#[derive(Default)]
pub struct RecordingRecorder {
    steps: Mutex<Vec<(String, AgentStep)>>,
}

impl RecordingRecorder {
    pub fn steps(&self) -> Vec<(String, AgentStep)> {
        self.steps.lock().unwrap().clone()
    }
}

#[async_trait]
impl StepRecorder for RecordingRecorder {
    async fn record(&self, session_id: &str, step: &AgentStep) {
        self.steps.lock().unwrap().push((session_id.to_string(), step.clone()));
    }
}

pub struct Harness {
    pub runtime: Arc<FakeRuntime>,
    pub provider: Arc<ScriptedProvider>,
    pub pool: Arc<ContainerPool>,
    pub executor: Arc<AgentExecutor>,
    pub recorder: Arc<RecordingRecorder>,
}

pub fn harness(provider: ScriptedProvider, config: AgentConfig) -> Harness {
    harness_on(FakeRuntime::new(), provider, config)
}

/// Same wiring on a runtime the test has configured
pub fn harness_on(runtime: FakeRuntime, provider: ScriptedProvider, config: AgentConfig) -> Harness {
    let runtime = Arc::new(runtime);
    let provider = Arc::new(provider);
    let recorder = Arc::new(RecordingRecorder::default());
    let pool = Arc::new(ContainerPool::new(runtime.clone(), pool_config(4)));
    let executor = AgentExecutor::new(
        provider.clone(),
        Arc::new(ToolRegistry::standard()),
        pool.clone(),
        config,
    )
    .with_recorder(recorder.clone());
    Harness {
        runtime,
        provider,
        pool,
        executor: Arc::new(executor),
        recorder,
    }
}
