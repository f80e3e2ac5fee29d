//! Tool registry and argument validation

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Number, Value};

use super::{bash, edit_lines, file_edit, file_read, file_write, search, think};
use super::{ParamSpec, ParamType, Tool, ToolArgs, ToolSpec};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    Duplicate(String),
    #[error("unknown tool '{0}'")]
    NotFound(String),
}

/// Why raw model arguments were rejected
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Unknown tool '{tool}'. Available tools: {}", .available.join(", "))]
    UnknownTool { tool: String, available: Vec<String> },
    #[error("Arguments for '{tool}' are not valid JSON: {reason}")]
    MalformedArguments { tool: String, reason: String },
    #[error("Missing required parameter '{param}' for '{tool}'")]
    MissingParameter { tool: String, param: String },
    #[error("Parameter '{param}' for '{tool}' must be {expected}, got {got}")]
    TypeMismatch {
        tool: String,
        param: String,
        expected: String,
        got: String,
    },
}

impl ValidationError {
    /// Observation text shown to the model so it can retry
    pub fn feedback(&self, spec: Option<&ToolSpec>) -> String {
        match spec {
            Some(spec) => format!("[VALIDATION ERROR] {}\nUsage: {}", self, spec.usage()),
            None => format!("[VALIDATION ERROR] {}", self),
        }
    }
}

/// Name → tool map with stable registration order
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in tool
    pub fn standard() -> Self {
        let mut registry = Self::new();
        let builtins: Vec<Arc<dyn Tool>> = vec![
            Arc::new(bash::BashTool::new()),
            Arc::new(file_read::FileReadTool::new()),
            Arc::new(file_write::FileWriteTool::new()),
            Arc::new(file_edit::FileEditTool::new()),
            Arc::new(edit_lines::EditLinesTool::new()),
            Arc::new(search::SearchTool::new()),
            Arc::new(think::ThinkTool::new()),
        ];
        for tool in builtins {
            // Built-in names are distinct
            let _ = registry.register(tool);
        }
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.spec().name.clone();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.order.push(name.clone());
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>, RegistryError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(|t| t.spec())
    }

    /// Specs in registration order
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.spec().clone())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Check raw arguments against a tool's schema.
    ///
    /// Accepts an object, a JSON-encoded object string, or null. Obvious
    /// scalar mismatches are coerced (`"15"` for an integer, `15` for a
    /// string); defaults are filled in for absent optional parameters.
    pub fn validate(&self, name: &str, raw: &Value) -> Result<ToolArgs, ValidationError> {
        let spec = self.spec(name).ok_or_else(|| ValidationError::UnknownTool {
            tool: name.to_string(),
            available: self.names(),
        })?;

        let mut map = parse_arguments(name, raw)?;

        for param in &spec.params {
            match map.get(&param.name).filter(|v| !v.is_null()) {
                Some(value) => {
                    let coerced = coerce(value, param.ty).ok_or_else(|| ValidationError::TypeMismatch {
                        tool: name.to_string(),
                        param: param.name.clone(),
                        expected: param.ty.as_str().to_string(),
                        got: json_type(value).to_string(),
                    })?;
                    map.insert(param.name.clone(), coerced);
                }
                None if param.required => {
                    return Err(ValidationError::MissingParameter {
                        tool: name.to_string(),
                        param: param.name.clone(),
                    });
                }
                None => apply_default(&mut map, param),
            }
        }

        Ok(ToolArgs::new(map))
    }
}

fn parse_arguments(tool: &str, raw: &Value) -> Result<Map<String, Value>, ValidationError> {
    let malformed = |reason: String| ValidationError::MalformedArguments {
        tool: tool.to_string(),
        reason,
    };

    match raw {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map.clone()),
        Value::String(text) if text.trim().is_empty() => Ok(Map::new()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(malformed(format!("expected an object, got {}", json_type(&other)))),
            Err(e) => Err(malformed(e.to_string())),
        },
        other => Err(malformed(format!("expected an object, got {}", json_type(other)))),
    }
}

fn apply_default(map: &mut Map<String, Value>, param: &ParamSpec) {
    if let Some(default) = &param.default {
        map.insert(param.name.clone(), default.clone());
    } else {
        map.remove(&param.name);
    }
}

fn coerce(value: &Value, ty: ParamType) -> Option<Value> {
    match (ty, value) {
        (ParamType::String, Value::String(_)) => Some(value.clone()),
        (ParamType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (ParamType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),

        (ParamType::Integer, Value::Number(n)) => {
            if n.is_i64() || n.is_u64() {
                Some(value.clone())
            } else {
                n.as_f64().filter(|f| f.fract() == 0.0).map(|f| Value::from(f as i64))
            }
        }
        (ParamType::Integer, Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>().ok().map(Value::from).or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| Value::from(f as i64))
            })
        }

        (ParamType::Number, Value::Number(_)) => Some(value.clone()),
        (ParamType::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),

        (ParamType::Boolean, Value::Bool(_)) => Some(value.clone()),
        (ParamType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(Value::Bool(true)),
            "false" | "0" | "no" => Some(Value::Bool(false)),
            _ => None,
        },
        (ParamType::Boolean, Value::Number(n)) => match n.as_i64() {
            Some(0) => Some(Value::Bool(false)),
            Some(1) => Some(Value::Bool(true)),
            _ => None,
        },

        (ParamType::Object, Value::Object(_)) => Some(value.clone()),
        (ParamType::Array, Value::Array(_)) => Some(value.clone()),
        (ParamType::Object | ParamType::Array, Value::String(s)) => {
            let parsed: Value = serde_json::from_str(s).ok()?;
            match (ty, &parsed) {
                (ParamType::Object, Value::Object(_)) | (ParamType::Array, Value::Array(_)) => Some(parsed),
                _ => None,
            }
        }

        _ => None,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
