//! Container runtime contract
//!
//! The pool and the tools only talk to containers through [`ContainerRuntime`].
//! [`DockerClient`](super::DockerClient) implements it against the Docker
//! Engine API; tests substitute an in-memory runtime.

use async_trait::async_trait;

use super::limits::ResourceLimits;

/// Error type for runtime operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    /// The container (or exec instance) does not exist
    #[error("no such container: {0}")]
    NotFound(String),
    /// A container with the requested name already exists
    #[error("container name already in use: {0}")]
    Conflict(String),
    /// The container exists but is stopped
    #[error("container is not running: {0}")]
    NotRunning(String),
    #[error("docker API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
}

impl RuntimeError {
    /// The container is gone or dead, as opposed to a failed API call
    pub fn is_container_lost(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_) | RuntimeError::NotRunning(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    /// Docker-managed volume; an empty source means an anonymous volume
    Volume,
    /// Host path
    Bind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mount {
    pub kind: MountKind,
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

/// Everything needed to create a container
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub limits: ResourceLimits,
    pub mounts: Vec<Mount>,
    pub env: Vec<(String, String)>,
    pub labels: Vec<(String, String)>,
    pub network_mode: String,
    pub working_dir: String,
}

/// Output of a finished exec
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

/// One entry from [`ContainerRuntime::list`]
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    /// Creation time, seconds since the Unix epoch
    pub created_unix: i64,
    pub running: bool,
}

/// Operations the sandbox needs from a container engine.
///
/// `id` arguments accept either a container id or a container name.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create (but do not start) a container; returns its id
    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    /// Run `argv` inside the container and wait for it to exit
    async fn exec(&self, id: &str, argv: &[String], workdir: Option<&str>) -> Result<ExecOutput, RuntimeError>;

    async fn is_running(&self, id: &str) -> Result<bool, RuntimeError>;

    async fn stop(&self, id: &str, timeout_secs: u32) -> Result<(), RuntimeError>;

    /// Remove a container together with its anonymous volumes
    async fn remove(&self, id: &str, force: bool) -> Result<(), RuntimeError>;

    async fn rename(&self, id: &str, new_name: &str) -> Result<(), RuntimeError>;

    /// All containers (running or not) whose name starts with `name_prefix`
    async fn list(&self, name_prefix: &str) -> Result<Vec<ContainerSummary>, RuntimeError>;
}
