//! Tool framework
//!
//! A tool is anything implementing [`Tool`]: it publishes an immutable
//! [`ToolSpec`] and executes validated [`ToolArgs`] against a
//! [`ToolContext`]. The [`ToolRegistry`] resolves tools by name and validates
//! raw model arguments before execution.
//!
//! # Failure classification
//!
//! ```text
//! ToolError::Invalid / Failed / Runtime  → Execution, Recoverable  (fed back to the model)
//! ToolError::Timeout                     → Timeout,   Recoverable
//! ToolError::Cancelled                   → Cancelled, Recoverable  (run ends on its own)
//! ToolError::ContainerCrashed            → ContainerCrashed, Fatal (aborts the run)
//! ```

pub mod bash;
pub mod context;
pub mod edit_lines;
pub mod file_edit;
pub mod file_read;
pub mod file_write;
pub mod path;
pub mod registry;
pub mod search;
pub mod think;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::sandbox::RuntimeError;

pub use context::ToolContext;
pub use registry::{RegistryError, ToolRegistry, ValidationError};

/// JSON type of a tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }
}

/// One entry of a tool's parameter schema
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub required: bool,
    pub description: String,
    /// Filled in by validation when the parameter is absent
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, ty: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            description: description.into(),
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, ty: ParamType, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, ty, description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Static description of a tool
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    /// Unique name the model calls the tool by
    pub name: String,
    pub description: String,
    /// Ordered parameter schema
    pub params: Vec<ParamSpec>,
    /// Running twice with the same arguments has no further effect
    pub idempotent: bool,
    /// Needs the session's sandbox container
    pub requires_container: bool,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            idempotent: false,
            requires_container: true,
        }
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    /// Runs on the host without a container
    pub fn local(mut self) -> Self {
        self.requires_container = false;
        self
    }

    pub fn param_spec(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// JSON Schema object for the provider's function-calling API
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.params {
            let mut property = json!({
                "type": param.ty.as_str(),
                "description": param.description,
            });
            if let Some(default) = &param.default {
                property["default"] = default.clone();
            }
            properties.insert(param.name.clone(), property);
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// One-line signature used in validation feedback
    pub fn usage(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                let marker = if p.required { "" } else { "?" };
                format!("{}{}: {}", p.name, marker, p.ty.as_str())
            })
            .collect();
        format!("{}({})", self.name, params.join(", "))
    }
}

/// Validated, structured arguments for one tool call
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ToolArgs(Map<String, Value>);

impl ToolArgs {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name).filter(|v| !v.is_null())
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    /// A string argument the tool cannot run without
    pub fn require_str(&self, name: &str) -> Result<&str, ToolError> {
        self.str(name)
            .ok_or_else(|| ToolError::Invalid(format!("missing required parameter '{}'", name)))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

/// Category of a failed tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Execution,
    Timeout,
    Cancelled,
    ContainerCrashed,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::Execution => "execution",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
            FailureKind::ContainerCrashed => "container_crashed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Reported to the model; the run continues
    Recoverable,
    /// Ends the run
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolFailure {
    pub kind: FailureKind,
    pub severity: Severity,
    pub message: String,
}

/// Binary payload returned alongside the text output (e.g. an image)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attachment {
    pub mime_type: String,
    /// `data:{mime};base64,...`
    pub data_uri: String,
}

/// Outcome of one tool execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub success: bool,
    /// Text shown to the model as the observation
    pub output: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ToolFailure>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            attachments: Vec::new(),
            failure: None,
        }
    }

    /// Recoverable failure; `output` is what the model sees
    pub fn failed(kind: FailureKind, output: impl Into<String>) -> Self {
        Self::failure(kind, Severity::Recoverable, output.into())
    }

    pub fn fatal(kind: FailureKind, output: impl Into<String>) -> Self {
        Self::failure(kind, Severity::Fatal, output.into())
    }

    fn failure(kind: FailureKind, severity: Severity, output: String) -> Self {
        Self {
            success: false,
            failure: Some(ToolFailure {
                kind,
                severity,
                message: output.clone(),
            }),
            output,
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn is_fatal(&self) -> bool {
        matches!(&self.failure, Some(f) if f.severity == Severity::Fatal)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }
}

/// Error type for tool execution
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Arguments were well-typed but unusable (bad path, no match, ...)
    #[error("{0}")]
    Invalid(String),
    /// The operation ran and failed
    #[error("{0}")]
    Failed(String),
    #[error("timed out after {}s", .after.as_secs())]
    Timeout { after: Duration, output: String },
    #[error("cancelled")]
    Cancelled,
    #[error("sandbox container crashed or became unreachable: {0}")]
    ContainerCrashed(String),
    #[error("this tool needs a sandbox container but none is attached")]
    NoContainer,
    #[error("container runtime error: {0}")]
    Runtime(RuntimeError),
}

impl From<RuntimeError> for ToolError {
    fn from(e: RuntimeError) -> Self {
        if e.is_container_lost() {
            ToolError::ContainerCrashed(e.to_string())
        } else {
            ToolError::Runtime(e)
        }
    }
}

impl From<ToolError> for ToolResult {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::Timeout { after, output } => {
                let mut text = format!("[ERROR] Timed out after {}s", after.as_secs());
                if !output.trim().is_empty() {
                    text.push_str("\nPartial output:\n");
                    text.push_str(output.trim_end());
                }
                ToolResult::failed(FailureKind::Timeout, text)
            }
            ToolError::Cancelled => ToolResult::failed(FailureKind::Cancelled, "[CANCELLED] Execution was cancelled"),
            crashed @ ToolError::ContainerCrashed(_) => {
                ToolResult::fatal(FailureKind::ContainerCrashed, format!("[FATAL] {}", crashed))
            }
            other => ToolResult::failed(FailureKind::Execution, format!("[ERROR] {}", other)),
        }
    }
}

/// A capability the agent can invoke
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    /// Run with validated arguments; enforces `ctx.timeout` and honours
    /// `ctx.cancel`
    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<ToolResult, ToolError>;
}

/// Cut long output in the middle, keeping both ends
pub(crate) fn truncate_output(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars / 2).collect();
    let tail: String = text.chars().skip(total - max_chars / 2).collect();
    format!(
        "{}\n\n... [{} characters truncated] ...\n\n{}",
        head,
        total - max_chars,
        tail
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> ToolSpec {
        ToolSpec::new("bash", "Run a command")
            .param(ParamSpec::required("command", ParamType::String, "Command"))
            .param(ParamSpec::optional("timeout", ParamType::Integer, "Seconds").with_default(json!(30)))
    }

    #[test]
    fn test_parameters_schema() {
        let schema = sample_spec().parameters_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["command"]["type"], "string");
        assert_eq!(schema["properties"]["timeout"]["default"], 30);
        assert_eq!(schema["required"], json!(["command"]));
    }

    #[test]
    fn test_usage_marks_optional() {
        assert_eq!(sample_spec().usage(), "bash(command: string, timeout?: integer)");
    }

    #[test]
    fn test_error_classification() {
        let crashed: ToolResult = ToolError::from(RuntimeError::NotRunning("c1".into())).into();
        assert!(crashed.is_fatal());
        assert_eq!(crashed.failure_kind(), Some(FailureKind::ContainerCrashed));

        let failed: ToolResult = ToolError::Failed("exit 1".into()).into();
        assert!(!failed.success);
        assert!(!failed.is_fatal());
        assert_eq!(failed.output, "[ERROR] exit 1");

        let timeout: ToolResult = ToolError::Timeout {
            after: Duration::from_secs(5),
            output: "partial".into(),
        }
        .into();
        assert_eq!(timeout.failure_kind(), Some(FailureKind::Timeout));
        assert!(timeout.output.contains("partial"));
    }

    #[test]
    fn test_truncate_output_keeps_ends() {
        let text = format!("{}{}", "a".repeat(100), "z".repeat(100));
        let cut = truncate_output(&text, 20);
        assert!(cut.starts_with("aaaaaaaaaa"));
        assert!(cut.ends_with("zzzzzzzzzz"));
        assert!(cut.contains("180 characters truncated"));
        assert_eq!(truncate_output("short", 20), "short");
    }
}
