//! Shell command execution

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::{truncate_output, ParamSpec, ParamType, Tool, ToolArgs, ToolContext, ToolError, ToolResult, ToolSpec};
use crate::sandbox::OUTPUT_DIR;

/// Longest observation returned to the model
const MAX_OUTPUT_CHARS: usize = 20_000;

const DEFAULT_TIMEOUT_SECS: i64 = 30;

/// Destructive patterns refused outright
const BLOCKED_PATTERNS: &[&str] = &[";rm -rf", "&&rm -rf", "|rm -rf", "$(rm -rf", "`rm -rf"];

/// `$1` is the working directory; the user command follows verbatim
const PRELUDE: &str = "mkdir -p \"$1\" 2>/dev/null; cd \"$1\" || exit 1\n";

pub struct BashTool {
    spec: ToolSpec,
}

impl BashTool {
    pub fn new() -> Self {
        let spec = ToolSpec::new(
            "bash",
            "Execute bash commands in the sandbox. Use it to run scripts, install packages, \
             compile code, run tests and manage files. Commands run in /workspace/out by default. \
             Supports pipes, redirects and multi-line commands.",
        )
        .param(ParamSpec::required(
            "command",
            ParamType::String,
            "The bash command to execute (e.g. 'ls -la', 'python script.py')",
        ))
        .param(
            ParamSpec::optional("workdir", ParamType::String, "Working directory (default: /workspace/out)")
                .with_default(json!(OUTPUT_DIR)),
        )
        .param(
            ParamSpec::optional("timeout", ParamType::Integer, "Timeout in seconds (default: 30)")
                .with_default(json!(DEFAULT_TIMEOUT_SECS)),
        );
        Self { spec }
    }
}

impl Default for BashTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for BashTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let command = args.require_str("command")?;
        check_command(command)?;

        let workdir = args.str("workdir").unwrap_or(OUTPUT_DIR);
        let timeout_secs = args.i64("timeout").unwrap_or(DEFAULT_TIMEOUT_SECS).max(1) as u64;
        let ctx = ctx.with_timeout(Duration::from_secs(timeout_secs));

        debug!(workdir, timeout_secs = ctx.timeout.as_secs(), "running bash command");
        let script = format!("{}{}", PRELUDE, command);
        let output = ctx.exec(&script, &[workdir.to_string()]).await?;

        let combined = combine(&output.stdout, &output.stderr);
        Ok(format_result(output.exit_code, &truncate_output(&combined, MAX_OUTPUT_CHARS)))
    }
}

fn check_command(command: &str) -> Result<(), ToolError> {
    let lowered = command.to_lowercase();
    match BLOCKED_PATTERNS.iter().find(|p| lowered.contains(*p)) {
        Some(pattern) => Err(ToolError::Invalid(format!(
            "Potentially dangerous command detected: {}",
            pattern
        ))),
        None => Ok(()),
    }
}

fn combine(stdout: &str, stderr: &str) -> String {
    let parts: Vec<&str> = [stdout, stderr].into_iter().filter(|s| !s.is_empty()).collect();
    if parts.is_empty() {
        "(no output)".to_string()
    } else {
        parts.join("\n")
    }
}

/// The exit code alone decides success
fn format_result(exit_code: i64, output: &str) -> ToolResult {
    if exit_code == 0 {
        ToolResult::ok(format!(
            "[SUCCESS]\n{}\n--- Execution successful. Proceed with next step or report completion. ---",
            output
        ))
    } else {
        ToolResult::failed(
            super::FailureKind::Execution,
            format!("[ERROR] Exit code {}\n{}", exit_code, output),
        )
    }
}
