//! Scratchpad tool: lets the model reason without side effects

use async_trait::async_trait;

use super::{ParamSpec, ParamType, Tool, ToolArgs, ToolContext, ToolError, ToolResult, ToolSpec};

pub struct ThinkTool {
    spec: ToolSpec,
}

impl ThinkTool {
    pub fn new() -> Self {
        let spec = ToolSpec::new(
            "think",
            "Write down your reasoning before acting. Has no side effects; use it to plan \
             multi-step changes or to analyse an error.",
        )
        .param(ParamSpec::required("thought", ParamType::String, "Your reasoning"))
        .idempotent()
        .local();
        Self { spec }
    }
}

impl Default for ThinkTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ThinkTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: &ToolArgs, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let thought = args.require_str("thought")?;
        Ok(ToolResult::ok(format!("Thought recorded:\n{}", thought.trim())))
    }
}
