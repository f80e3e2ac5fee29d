//! Codebox - sandboxed coding agent core
//!
//! A ReAct agent that executes tool calls inside per-session Docker
//! containers and streams its progress as an ordered event sequence.
//!
//! # Modules
//!
//! - `config` - TOML + environment configuration
//! - `telemetry` - tracing subscriber and optional OTLP export
//! - `metrics` - Prometheus metrics for observability
//! - `sandbox` - Docker runtime client and the container pool
//! - `tools` - tool specs, argument validation, registry and built-in tools
//! - `llm` - provider contract and the Ollama streaming adapter
//! - `agent` - ReAct executor, state machine and loop detection
//! - `stream` - wire events, chunk coalescing and streaming sessions
//!
//! # Quick Start
//!
//! ```ignore
//! use codebox::{AgentExecutor, ContainerPool, DockerClient, OllamaProvider, SessionHub, ToolRegistry};
//!
//! let pool = Arc::new(ContainerPool::new(Arc::new(DockerClient::new(socket)), config.pool));
//! let executor = Arc::new(AgentExecutor::new(provider, Arc::new(ToolRegistry::standard()), pool, config.agent));
//! let hub = SessionHub::new(executor, config.streaming);
//!
//! let session = hub.get_or_create("session-1", "python").await;
//! let (_resync, mut events) = session.attach().await;
//! session.submit("write a fizzbuzz in python and run it").await?;
//! ```

pub mod agent;
pub mod config;
pub mod llm;
pub mod metrics;
pub mod sandbox;
pub mod stream;
pub mod telemetry;
pub mod tools;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentExecutor, AgentEvent, RunOutcome, RunReport, RunRequest};
pub use config::AppConfig;
pub use llm::{LlmProvider, OllamaProvider};
pub use sandbox::{ContainerPool, ContainerRuntime, DockerClient};
pub use stream::{ControlMessage, SessionHub, StreamEvent, StreamingSession};
pub use tools::ToolRegistry;
