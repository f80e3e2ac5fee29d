//! LLM provider integration
//!
//! The agent only sees [`LlmProvider`]: a producer of [`CompletionDelta`]s
//! for a conversation and a set of tool specs. [`OllamaProvider`] is the
//! bundled implementation.

pub mod message;
pub mod ollama;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::stream::Stream;

use crate::tools::ToolSpec;

pub use message::{ChatMessage, FunctionCall, MessageToolCall, Role};
pub use ollama::OllamaProvider;

/// One increment of a streamed completion
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionDelta {
    /// Answer or reasoning text
    TextDelta(String),
    /// Part of a tool call; `arguments` is the next slice of the JSON text
    ToolCallDelta {
        index: usize,
        name: Option<String>,
        arguments: String,
    },
    /// The tool call at `index` has all of its arguments
    ToolCallComplete { index: usize },
}

pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<CompletionDelta, ProviderError>> + Send>>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("stream interrupted: {0}")]
    Stream(String),
    #[error("invalid response: {0}")]
    Parse(String),
}

impl ProviderError {
    /// Transport failures, rate limits and server errors may succeed on retry
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Request(_) | ProviderError::Stream(_) => true,
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Parse(_) => false,
        }
    }
}

/// A streaming chat-completion backend
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model name, for logs and metrics
    fn model(&self) -> &str;

    async fn stream_completion(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<CompletionStream, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderError::Request("refused".into()).is_retryable());
        assert!(ProviderError::Status { status: 503, body: String::new() }.is_retryable());
        assert!(ProviderError::Status { status: 429, body: String::new() }.is_retryable());
        assert!(!ProviderError::Status { status: 400, body: String::new() }.is_retryable());
        assert!(!ProviderError::Parse("bad json".into()).is_retryable());
    }
}
