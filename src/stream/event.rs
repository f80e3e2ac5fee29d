//! Wire types of the streaming protocol
//!
//! One JSON object per message, discriminated by `type`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::agent::AgentEvent;

/// Outbound event of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Start,
    Thought {
        content: String,
        step: usize,
    },
    ActionStreaming {
        tool: String,
        status: String,
        step: usize,
    },
    ActionArgsChunk {
        tool: String,
        partial_args: String,
        step: usize,
    },
    Action {
        tool: String,
        args: Value,
        step: usize,
    },
    Observation {
        content: String,
        success: bool,
        step: usize,
    },
    /// Coalesced model text
    Chunk {
        content: String,
    },
    End,
    Cancelled,
    Error {
        content: String,
    },
}

impl StreamEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            StreamEvent::Start => "start",
            StreamEvent::Thought { .. } => "thought",
            StreamEvent::ActionStreaming { .. } => "action_streaming",
            StreamEvent::ActionArgsChunk { .. } => "action_args_chunk",
            StreamEvent::Action { .. } => "action",
            StreamEvent::Observation { .. } => "observation",
            StreamEvent::Chunk { .. } => "chunk",
            StreamEvent::End => "end",
            StreamEvent::Cancelled => "cancelled",
            StreamEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::End | StreamEvent::Cancelled | StreamEvent::Error { .. })
    }
}

impl From<AgentEvent> for StreamEvent {
    fn from(event: AgentEvent) -> Self {
        match event {
            AgentEvent::TextDelta(content) => StreamEvent::Chunk { content },
            AgentEvent::ActionStreaming { tool, step } => StreamEvent::ActionStreaming {
                tool,
                status: "streaming".to_string(),
                step,
            },
            AgentEvent::ActionArgsChunk {
                tool,
                partial_args,
                step,
            } => StreamEvent::ActionArgsChunk {
                tool,
                partial_args,
                step,
            },
            AgentEvent::Thought { content, step } => StreamEvent::Thought { content, step },
            AgentEvent::Action { tool, args, step } => StreamEvent::Action { tool, args, step },
            AgentEvent::Observation { content, success, step } => StreamEvent::Observation { content, success, step },
        }
    }
}

/// Inbound control message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Submit a user turn
    Message { content: String },
    Cancel,
}

/// State handed to a consumer that (re)attaches
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resync {
    /// Chunk text delivered so far in the current (or last) run
    pub accumulated_text: String,
    /// Most recent events, oldest first
    pub tail: Vec<StreamEvent>,
    pub running: bool,
}

impl Resync {
    /// `{type:"resync", ...}` frame sent before live events
    pub fn to_frame(&self) -> Value {
        json!({
            "type": "resync",
            "accumulated_text": self.accumulated_text,
            "tail": self.tail,
            "running": self.running,
        })
    }
}
