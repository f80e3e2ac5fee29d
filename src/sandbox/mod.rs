//! Sandbox containers
//!
//! - `runtime` - the container-engine contract
//! - `docker` - Docker Engine API implementation over the local socket
//! - `exec` - abortable command execution
//! - `pool` - per-session container assignment with bounded capacity
//!
//! Workspace layout inside every container:
//!
//! ```text
//! /workspace
//! ├── out/              session output (read-write volume)
//! ├── agent_workspace/  scratch space
//! └── project_files/    shared project files (read-only binds)
//! ```

pub mod docker;
pub mod exec;
pub mod handle;
pub mod limits;
pub mod pool;
pub mod runtime;

pub use docker::DockerClient;
pub use exec::{run_abortable, CommandOutcome, ShellCommand};
pub use handle::{ContainerHandle, ContainerState, PoolSlot};
pub use limits::ResourceLimits;
pub use pool::{ContainerPool, PoolError, PoolStats};
pub use runtime::{
    ContainerRuntime, ContainerSpec, ContainerSummary, ExecOutput, Mount, MountKind, RuntimeError,
};

pub const WORKSPACE_ROOT: &str = "/workspace";
pub const OUTPUT_DIR: &str = "/workspace/out";
pub const AGENT_WORKSPACE_DIR: &str = "/workspace/agent_workspace";
pub const PROJECT_FILES_DIR: &str = "/workspace/project_files";
