//! Streaming sessions
//!
//! A [`StreamingSession`] owns one conversation: it starts executor runs,
//! converts their [`AgentEvent`]s into [`StreamEvent`]s and delivers them to
//! at most one attached consumer. Chunk text is coalesced on a fixed cadence;
//! every other event goes out immediately, after any chunk text that arrived
//! before it. Each run ends with exactly one terminal event.
//!
//! The session keeps a tail of emitted events and the chunk text of the
//! current run, so a consumer that reconnects can resynchronise without
//! re-running the agent.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::coalesce::ChunkCoalescer;
use super::event::{ControlMessage, Resync, StreamEvent};
use crate::agent::{AgentEvent, AgentExecutor, RunOutcome, RunRequest};
use crate::config::StreamConfig;
use crate::llm::ChatMessage;
use crate::metrics::{STREAM_CHUNK_FLUSHES, STREAM_EVENTS};
use crate::sandbox::PoolError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("a run is already in progress for session {0}")]
    Busy(String),
    #[error("message content is empty")]
    EmptyMessage,
    #[error("failed to tear down session container: {0}")]
    Pool(#[from] PoolError),
}

/// State shared between the session handle and its run task
struct Shared {
    session_id: String,
    sink: Option<UnboundedSender<StreamEvent>>,
    tail: VecDeque<StreamEvent>,
    tail_limit: usize,
    accumulated: String,
    history: Vec<ChatMessage>,
    active: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl Shared {
    fn emit(&mut self, event: StreamEvent) {
        STREAM_EVENTS.with_label_values(&[event.type_name()]).inc();
        if let StreamEvent::Chunk { content } = &event {
            self.accumulated.push_str(content);
            STREAM_CHUNK_FLUSHES.inc();
        }

        if self.tail_limit > 0 {
            if self.tail.len() >= self.tail_limit {
                self.tail.pop_front();
            }
            self.tail.push_back(event.clone());
        }

        if let Some(sink) = &self.sink {
            if sink.send(event).is_err() {
                debug!(session_id = %self.session_id, "consumer detached");
                self.sink = None;
            }
        }
    }
}

pub struct StreamingSession {
    id: String,
    environment: String,
    executor: Arc<AgentExecutor>,
    flush_interval: Duration,
    shared: Arc<Mutex<Shared>>,
}

impl StreamingSession {
    pub fn new(
        id: impl Into<String>,
        environment: impl Into<String>,
        executor: Arc<AgentExecutor>,
        config: &StreamConfig,
    ) -> Self {
        let id = id.into();
        Self {
            shared: Arc::new(Mutex::new(Shared {
                session_id: id.clone(),
                sink: None,
                tail: VecDeque::new(),
                tail_limit: config.replay_tail,
                accumulated: String::new(),
                history: Vec::new(),
                active: None,
                task: None,
            })),
            id,
            environment: environment.into(),
            executor,
            flush_interval: config.flush_interval(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Attach a consumer, replacing any previous one
    ///
    /// The returned snapshot covers everything emitted before the receiver
    /// was installed; the receiver gets everything after.
    pub async fn attach(&self) -> (Resync, UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut shared = self.shared.lock().await;
        if shared.sink.replace(tx).is_some() {
            info!(session_id = %self.id, "replacing attached consumer");
        }
        let resync = Resync {
            accumulated_text: shared.accumulated.clone(),
            tail: shared.tail.iter().cloned().collect(),
            running: shared.active.is_some(),
        };
        (resync, rx)
    }

    pub async fn detach(&self) {
        self.shared.lock().await.sink = None;
    }

    /// Start a run for a user message
    pub async fn submit(&self, content: impl Into<String>) -> Result<(), SessionError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        let mut shared = self.shared.lock().await;
        if shared.active.is_some() {
            return Err(SessionError::Busy(self.id.clone()));
        }
        let cancel = CancellationToken::new();
        shared.active = Some(cancel.clone());
        shared.accumulated.clear();
        shared.emit(StreamEvent::Start);

        let request = RunRequest {
            session_id: self.id.clone(),
            environment: self.environment.clone(),
            message: content,
            history: shared.history.clone(),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let executor = self.executor.clone();
        let state = self.shared.clone();
        let interval = self.flush_interval;

        info!(session_id = %self.id, "run submitted");
        shared.task = Some(tokio::spawn(async move {
            let (report, ()) = tokio::join!(executor.run(request, tx, cancel), forward(state.clone(), rx, interval));
            let mut shared = state.lock().await;
            shared.emit(terminal_event(&report.outcome));
            shared.history = report.transcript;
            shared.active = None;
        }));
        Ok(())
    }

    /// Request cancellation of the in-flight run; false when there is none
    pub async fn cancel(&self) -> bool {
        let shared = self.shared.lock().await;
        match &shared.active {
            Some(token) => {
                if !token.is_cancelled() {
                    info!(session_id = %self.id, "cancellation requested");
                    token.cancel();
                }
                true
            }
            None => {
                debug!(session_id = %self.id, "cancel ignored, no run in progress");
                false
            }
        }
    }

    pub async fn handle_control(&self, message: ControlMessage) -> Result<(), SessionError> {
        match message {
            ControlMessage::Message { content } => self.submit(content).await,
            ControlMessage::Cancel => {
                self.cancel().await;
                Ok(())
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.shared.lock().await.active.is_some()
    }

    /// Conversation so far, without system messages
    pub async fn history(&self) -> Vec<ChatMessage> {
        self.shared.lock().await.history.clone()
    }

    /// Wait for the most recently submitted run to finish
    pub async fn wait(&self) {
        let task = self.shared.lock().await.task.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(session_id = %self.id, error = %e, "run task failed");
            }
        }
    }

    /// Neither running nor attached
    fn is_dormant(&self) -> bool {
        self.shared
            .try_lock()
            .map(|shared| shared.active.is_none() && shared.sink.is_none())
            .unwrap_or(false)
    }
}

/// Move executor events to the sink, coalescing text until the next tick or
/// the next immediate event
async fn forward(state: Arc<Mutex<Shared>>, mut events: UnboundedReceiver<AgentEvent>, interval: Duration) {
    let mut coalescer = ChunkCoalescer::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(AgentEvent::TextDelta(text)) => coalescer.push(&text),
                Some(event) => {
                    let mut shared = state.lock().await;
                    if let Some(content) = coalescer.take() {
                        shared.emit(StreamEvent::Chunk { content });
                    }
                    shared.emit(event.into());
                }
                None => break,
            },
            _ = ticker.tick() => {
                if let Some(content) = coalescer.take() {
                    state.lock().await.emit(StreamEvent::Chunk { content });
                }
            }
        }
    }

    if let Some(content) = coalescer.take() {
        state.lock().await.emit(StreamEvent::Chunk { content });
    }
}

fn terminal_event(outcome: &RunOutcome) -> StreamEvent {
    match outcome {
        RunOutcome::Finished { .. } => StreamEvent::End,
        RunOutcome::Cancelled => StreamEvent::Cancelled,
        RunOutcome::Aborted(e) => StreamEvent::Error { content: e.to_string() },
    }
}

/// Registry of streaming sessions keyed by session id
pub struct SessionHub {
    executor: Arc<AgentExecutor>,
    config: StreamConfig,
    sessions: RwLock<HashMap<String, Arc<StreamingSession>>>,
}

impl SessionHub {
    pub fn new(executor: Arc<AgentExecutor>, config: StreamConfig) -> Self {
        Self {
            executor,
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<StreamingSession>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn get_or_create(&self, session_id: &str, environment: &str) -> Arc<StreamingSession> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(session_id) {
            if session.environment() != environment {
                warn!(
                    session_id,
                    requested = environment,
                    existing = session.environment(),
                    "session already exists with a different environment"
                );
            }
            return session.clone();
        }
        info!(session_id, environment, "creating streaming session");
        let session = Arc::new(StreamingSession::new(
            session_id,
            environment,
            self.executor.clone(),
            &self.config,
        ));
        sessions.insert(session_id.to_string(), session.clone());
        session
    }

    /// Cancel any run, wait for it and destroy the session's container
    pub async fn close(&self, session_id: &str) -> Result<(), SessionError> {
        let removed = self.sessions.write().await.remove(session_id);
        if let Some(session) = removed {
            session.cancel().await;
            session.wait().await;
            session.detach().await;
        }
        self.executor.pool().destroy(session_id).await?;
        info!(session_id, "session closed");
        Ok(())
    }

    /// Drop sessions that nobody holds, runs or listens to; returns how many
    pub async fn prune(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| Arc::strong_count(session) > 1 || !session.is_dormant());
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
