//! Ollama `/api/chat` streaming adapter
//!
//! Ollama streams newline-delimited JSON objects. Text arrives in
//! `message.content`; native tool calls arrive whole in
//! `message.tool_calls`. Models without native tool support often print the
//! call as JSON instead, so a completion that ends without a native call is
//! scanned for one.

use futures_util::stream::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{ChatMessage, CompletionDelta, CompletionStream, LlmProvider, ProviderError};
use crate::tools::ToolSpec;

/// Tool definition in Ollama's function-calling format
#[derive(Debug, Clone, Serialize)]
struct ToolDefinition<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ToolFunction<'a>,
}

#[derive(Debug, Clone, Serialize)]
struct ToolFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: Value,
}

/// One NDJSON line of a streamed chat response
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<super::MessageToolCall>,
}

/// Turns response lines into deltas
#[derive(Debug, Default)]
struct ChunkDecoder {
    text: String,
    next_index: usize,
}

impl ChunkDecoder {
    fn feed_line(&mut self, line: &[u8]) -> Result<Vec<CompletionDelta>, ProviderError> {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() {
            return Ok(Vec::new());
        }

        let chunk: ChatChunk = serde_json::from_str(line).map_err(|e| ProviderError::Parse(e.to_string()))?;
        if let Some(error) = chunk.error {
            return Err(ProviderError::Stream(error));
        }

        let mut deltas = Vec::new();
        if let Some(message) = chunk.message {
            if !message.content.is_empty() {
                self.text.push_str(&message.content);
                deltas.push(CompletionDelta::TextDelta(message.content));
            }
            for call in message.tool_calls {
                deltas.extend(self.emit_call(call.function.name, &call.function.arguments));
            }
        }
        if chunk.done {
            deltas.extend(self.finish());
        }
        Ok(deltas)
    }

    /// Recover a printed tool call when the model produced no native one
    fn finish(&mut self) -> Vec<CompletionDelta> {
        if self.next_index > 0 {
            return Vec::new();
        }
        let text = std::mem::take(&mut self.text);
        let mut deltas = Vec::new();
        for (name, arguments) in parse_tool_calls_from_text(&text) {
            debug!(tool = %name, "recovered tool call from response text");
            deltas.extend(self.emit_call(name, &arguments));
        }
        deltas
    }

    fn emit_call(&mut self, name: String, arguments: &Value) -> [CompletionDelta; 2] {
        let index = self.next_index;
        self.next_index += 1;
        let arguments = match arguments {
            Value::String(raw) => raw.clone(),
            other => other.to_string(),
        };
        [
            CompletionDelta::ToolCallDelta {
                index,
                name: Some(name),
                arguments,
            },
            CompletionDelta::ToolCallComplete { index },
        ]
    }
}

/// Client for a local or remote Ollama server
#[derive(Clone)]
pub struct OllamaProvider {
    base_url: String,
    model: String,
    temperature: f64,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// # Arguments
    /// * `base_url` - e.g. "http://localhost:11434"
    /// * `model` - e.g. "qwen3"
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, temperature: f64) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature,
            client: reqwest::Client::new(),
        }
    }

    fn request_body(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "options": {
                "temperature": self.temperature
            }
        });
        if !tools.is_empty() {
            let definitions: Vec<ToolDefinition> = tools
                .iter()
                .map(|spec| ToolDefinition {
                    kind: "function",
                    function: ToolFunction {
                        name: &spec.name,
                        description: &spec.description,
                        parameters: spec.parameters_schema(),
                    },
                })
                .collect();
            body["tools"] = json!(definitions);
        }
        body
    }
}

#[async_trait::async_trait]
impl LlmProvider for OllamaProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn stream_completion(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<CompletionStream, ProviderError> {
        let endpoint = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .json(&self.request_body(messages, tools))
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut bytes = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut decoder = ChunkDecoder::default();
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(error = %e, "ollama stream interrupted");
                        yield Err(ProviderError::Stream(e.to_string()));
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    match decoder.feed_line(&line) {
                        Ok(deltas) => {
                            for delta in deltas {
                                yield Ok(delta);
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            match decoder.feed_line(&buffer) {
                Ok(deltas) => {
                    for delta in deltas {
                        yield Ok(delta);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
            for delta in decoder.finish() {
                yield Ok(delta);
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Find tool calls a model printed as JSON text.
///
/// Accepts `{"name": ..., "arguments": {...}}` (or `"parameters"`), either
/// as the whole response or embedded in surrounding prose or code fences.
pub fn parse_tool_calls_from_text(content: &str) -> Vec<(String, Value)> {
    let content = content.trim();
    if content.is_empty() {
        return Vec::new();
    }

    if let Some(call) = serde_json::from_str::<Value>(content).ok().and_then(|v| tool_call_from_value(&v)) {
        return vec![call];
    }

    json_objects(content)
        .into_iter()
        .filter_map(|candidate| serde_json::from_str::<Value>(candidate).ok())
        .filter_map(|value| tool_call_from_value(&value))
        .collect()
}

/// Top-level `{...}` spans, skipping braces inside string literals
fn json_objects(text: &str) -> Vec<&str> {
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        objects.push(&text[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }
    objects
}

fn tool_call_from_value(value: &Value) -> Option<(String, Value)> {
    // {"function": {"name": ..., "arguments": ...}} is also seen in the wild
    let value = value.get("function").filter(|f| f.is_object()).unwrap_or(value);
    let name = value.get("name").and_then(Value::as_str)?;
    let arguments = value.get("arguments").or_else(|| value.get("parameters"))?;
    Some((name.to_string(), arguments.clone()))
}
