//! Execution context handed to every tool call

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio_util::sync::CancellationToken;

use super::ToolError;
use crate::sandbox::{run_abortable, CommandOutcome, ContainerHandle, ContainerRuntime, ExecOutput, ShellCommand};

/// Raw bytes per exec when writing files (base64 grows this by a third,
/// staying well under the kernel's per-argument limit)
const WRITE_CHUNK_BYTES: usize = 48 * 1024;

/// Exit codes used by [`READ_SCRIPT`] for caller mistakes
const EXIT_NOT_FOUND: i64 = 44;
const EXIT_IS_DIR: i64 = 45;
const EXIT_TOO_LARGE: i64 = 46;

const READ_SCRIPT: &str = r#"[ -e "$1" ] || { echo "File not found: $1" >&2; exit 44; }
[ -d "$1" ] && { echo "Is a directory: $1" >&2; exit 45; }
size=$(stat -c %s "$1")
[ "$size" -le "$2" ] || { echo "File too large: $size bytes (limit $2)" >&2; exit 46; }
base64 -w0 "$1""#;

const CREATE_SCRIPT: &str = r#"mkdir -p "$(dirname "$1")" && printf '%s' "$2" | base64 -d > "$1""#;
const APPEND_SCRIPT: &str = r#"printf '%s' "$2" | base64 -d >> "$1""#;

/// Container, time budget and cancellation for one tool call
#[derive(Clone)]
pub struct ToolContext {
    runtime: Option<Arc<dyn ContainerRuntime>>,
    container: Option<ContainerHandle>,
    /// Budget for a single command
    pub timeout: Duration,
    /// Ceiling for timeouts a tool derives from its arguments
    pub max_timeout: Duration,
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        container: ContainerHandle,
        timeout: Duration,
        max_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            runtime: Some(runtime),
            container: Some(container),
            timeout,
            max_timeout,
            cancel,
        }
    }

    /// Context for tools that never touch a container
    pub fn detached(timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            runtime: None,
            container: None,
            timeout,
            max_timeout: timeout,
            cancel,
        }
    }

    pub fn container(&self) -> Option<&ContainerHandle> {
        self.container.as_ref()
    }

    /// Same context with a different command budget, capped at `max_timeout`
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut ctx = self.clone();
        ctx.timeout = timeout.min(self.max_timeout).max(Duration::from_secs(1));
        ctx
    }

    /// Run a script with positional arguments inside the container
    pub async fn exec(&self, script: &str, args: &[String]) -> Result<ExecOutput, ToolError> {
        self.exec_in(script, args, None).await
    }

    pub async fn exec_in(&self, script: &str, args: &[String], workdir: Option<&str>) -> Result<ExecOutput, ToolError> {
        let (Some(runtime), Some(container)) = (&self.runtime, &self.container) else {
            return Err(ToolError::NoContainer);
        };

        let mut command = ShellCommand::new(script, self.timeout).args(args);
        if let Some(dir) = workdir {
            command = command.workdir(dir);
        }

        match run_abortable(runtime.as_ref(), &container.container_id, &command, &self.cancel).await? {
            CommandOutcome::Finished(output) => Ok(output),
            CommandOutcome::TimedOut(output) => Err(ToolError::Timeout {
                after: self.timeout,
                output: format!("{}{}", output.stdout, output.stderr),
            }),
            CommandOutcome::Cancelled => Err(ToolError::Cancelled),
        }
    }

    /// Read a file from the container
    pub async fn read_file(&self, path: &str, max_bytes: u64) -> Result<Vec<u8>, ToolError> {
        let args = vec![path.to_string(), max_bytes.to_string()];
        let output = self.exec(READ_SCRIPT, &args).await?;
        match output.exit_code {
            0 => STANDARD
                .decode(output.stdout.trim())
                .map_err(|e| ToolError::Failed(format!("Failed to decode {}: {}", path, e))),
            EXIT_NOT_FOUND | EXIT_IS_DIR | EXIT_TOO_LARGE => Err(ToolError::Invalid(output.stderr.trim().to_string())),
            code => Err(ToolError::Failed(format!(
                "Failed to read {} (exit code {}): {}",
                path,
                code,
                output.stderr.trim()
            ))),
        }
    }

    /// Read a UTF-8 text file
    pub async fn read_text(&self, path: &str, max_bytes: u64) -> Result<String, ToolError> {
        let bytes = self.read_file(path, max_bytes).await?;
        String::from_utf8(bytes).map_err(|_| ToolError::Invalid(format!("{} is not a text file", path)))
    }

    /// Write a file inside the container, creating parent directories
    pub async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), ToolError> {
        let mut chunks: Vec<&[u8]> = data.chunks(WRITE_CHUNK_BYTES).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }

        for (i, chunk) in chunks.iter().enumerate() {
            let script = if i == 0 { CREATE_SCRIPT } else { APPEND_SCRIPT };
            let args = vec![path.to_string(), STANDARD.encode(chunk)];
            let output = self.exec(script, &args).await?;
            if output.exit_code != 0 {
                return Err(ToolError::Failed(format!(
                    "Failed to write {}: {}",
                    path,
                    output.stderr.trim()
                )));
            }
        }
        Ok(())
    }
}
