//! Steps of a run and the hook that persists them

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::tools::ToolResult;

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub tool: String,
    /// Validated arguments, or the raw arguments when validation failed
    pub arguments: Value,
    pub step: usize,
}

/// One Thought → Action → Observation cycle
///
/// The final step of a finished run has a thought (the answer) and no tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStep {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResult>,
}

impl AgentStep {
    pub fn is_final(&self) -> bool {
        self.tool_call.is_none()
    }
}

/// Receives every completed step; durable storage lives behind this
#[async_trait]
pub trait StepRecorder: Send + Sync {
    async fn record(&self, session_id: &str, step: &AgentStep);
}

/// Discards steps
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

#[async_trait]
impl StepRecorder for NoopRecorder {
    async fn record(&self, _session_id: &str, _step: &AgentStep) {}
}
