//! Abortable command execution inside a sandbox container
//!
//! A Docker exec cannot be killed through the API, and dropping the HTTP
//! request leaves the process running. Every command therefore runs behind a
//! small wrapper:
//!
//! ```text
//! bash -c WRAPPER codebox-exec <secs> <pidfile> bash -c <script> _ <args...>
//!          │
//!          └─ timeout -s KILL <secs> bash -c <script> ... &   (own process group)
//!             echo $! > <pidfile>; wait
//! ```
//!
//! `timeout` puts the command in its own process group and kills it at the
//! deadline. On cancellation the runner issues a second exec that kills that
//! process group using the recorded pid.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::runtime::{ContainerRuntime, ExecOutput, RuntimeError};

const WRAPPER: &str = r#"secs="$1"; pidfile="$2"; shift 2
timeout -s KILL "$secs" "$@" &
pid=$!
echo "$pid" > "$pidfile"
wait "$pid"
rc=$?
rm -f "$pidfile"
exit "$rc""#;

const KILLER: &str = r#"for _ in 1 2 3 4 5; do [ -s "$1" ] && break; sleep 0.1; done
[ -s "$1" ] && kill -KILL -- "-$(cat "$1")" 2>/dev/null
rm -f "$1""#;

/// Extra time granted to the in-container `timeout` before the host gives up
const HOST_GRACE: Duration = Duration::from_secs(5);

/// Exit status of a process killed by SIGKILL
const SIGKILL_EXIT: i64 = 137;

/// How a command ended
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Finished(ExecOutput),
    /// The deadline passed; carries whatever output was captured
    TimedOut(ExecOutput),
    Cancelled,
}

/// A shell script plus positional arguments (`$1`, `$2`, ...)
#[derive(Debug, Clone)]
pub struct ShellCommand<'a> {
    pub script: &'a str,
    pub args: &'a [String],
    pub workdir: Option<&'a str>,
    pub timeout: Duration,
}

impl<'a> ShellCommand<'a> {
    pub fn new(script: &'a str, timeout: Duration) -> Self {
        Self {
            script,
            args: &[],
            workdir: None,
            timeout,
        }
    }

    pub fn args(mut self, args: &'a [String]) -> Self {
        self.args = args;
        self
    }

    pub fn workdir(mut self, workdir: &'a str) -> Self {
        self.workdir = Some(workdir);
        self
    }

    fn argv(&self, pidfile: &str) -> Vec<String> {
        let secs = (self.timeout.as_secs_f64().ceil().max(1.0) as u64).to_string();
        let mut argv: Vec<String> = [
            "bash",
            "-c",
            WRAPPER,
            "codebox-exec",
            secs.as_str(),
            pidfile,
            "bash",
            "-c",
            self.script,
            "_",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// Run a command, racing it against its timeout and the cancellation token.
///
/// Losing the race kills the command's whole process group before returning.
pub async fn run_abortable(
    runtime: &dyn ContainerRuntime,
    container_id: &str,
    command: &ShellCommand<'_>,
    cancel: &CancellationToken,
) -> Result<CommandOutcome, RuntimeError> {
    let pidfile = format!("/tmp/.codebox-exec-{}.pid", Uuid::now_v7().simple());
    let argv = command.argv(&pidfile);
    let started = Instant::now();

    tokio::select! {
        result = runtime.exec(container_id, &argv, command.workdir) => {
            let output = result?;
            if output.exit_code == SIGKILL_EXIT && started.elapsed() >= command.timeout {
                Ok(CommandOutcome::TimedOut(output))
            } else {
                Ok(CommandOutcome::Finished(output))
            }
        }
        _ = cancel.cancelled() => {
            debug!(container_id, "command cancelled, killing process group");
            kill_group(runtime, container_id, &pidfile).await;
            Ok(CommandOutcome::Cancelled)
        }
        _ = tokio::time::sleep(command.timeout + HOST_GRACE) => {
            warn!(container_id, timeout_secs = command.timeout.as_secs(), "command outlived its deadline");
            kill_group(runtime, container_id, &pidfile).await;
            Ok(CommandOutcome::TimedOut(ExecOutput::default()))
        }
    }
}

async fn kill_group(runtime: &dyn ContainerRuntime, container_id: &str, pidfile: &str) {
    let argv: Vec<String> = ["bash", "-c", KILLER, "codebox-kill", pidfile]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if let Err(e) = runtime.exec(container_id, &argv, None).await {
        warn!(container_id, error = %e, "failed to kill process group");
    }
}
