//! ReAct agent
//!
//! # Architecture
//!
//! ```text
//! User message → AgentExecutor → LlmProvider (streamed, with tool specs)
//!                     ↓
//!              Tool call? ── no ──→ Finished (final answer)
//!                     ↓ yes
//!              ToolRegistry::validate → Tool::execute
//!                     ↓
//!              ContainerPool::acquire (first container tool only)
//!                     ↓
//!              Observation → conversation → LoopDetector → Thinking ...
//! ```

pub mod executor;
pub mod loop_detect;
pub mod prompt;
pub mod state;
pub mod step;

pub use executor::{AgentError, AgentEvent, AgentExecutor, RunOutcome, RunReport, RunRequest};
pub use loop_detect::{LoopDetector, LoopKind};
pub use state::{AgentState, InvalidTransition};
pub use step::{AgentStep, NoopRecorder, StepRecorder, ToolCall};
