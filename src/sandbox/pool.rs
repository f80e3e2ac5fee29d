//! Container Pool - per-session sandbox containers with bounded capacity
//!
//! The pool binds at most one container to each session and keeps it across
//! turns. Optional warm containers are pre-created per environment and handed
//! to new sessions by renaming them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  ContainerPool                                                   │
//! │                                                                  │
//! │  sessions: id → Arc<Mutex<Option<ActiveContainer>>>              │
//! │     (per-session lock; unrelated sessions never wait on it)      │
//! │                                                                  │
//! │  warm: env → [PoolSlot, ...]        capacity: Semaphore(max)     │
//! │                                                                  │
//! │  acquire(s, env) ──► reuse bound ─► bind warm ─► provision new   │
//! │  release(s)      ──► Ready (kept for the next turn)              │
//! │  destroy(s)      ──► stop + remove, permit returned              │
//! │  maintenance     ──► sweep orphans, reclaim idle, replenish warm │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every container, warm or bound, holds one semaphore permit, so the total
//! never exceeds `max_containers` no matter how acquisitions interleave.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::handle::{ContainerHandle, ContainerState, PoolSlot};
use super::runtime::{ContainerRuntime, ContainerSpec, Mount, MountKind, RuntimeError};
use super::{AGENT_WORKSPACE_DIR, OUTPUT_DIR, PROJECT_FILES_DIR, WORKSPACE_ROOT};
use crate::config::PoolConfig;
use crate::metrics::{
    POOL_ACQUIRE_DURATION, POOL_ACQUIRE_FAILURES, POOL_ACTIVE_CONTAINERS, POOL_IDLE_RECLAIMED,
    POOL_ORPHANS_REMOVED, POOL_WARM_CONTAINERS,
};

/// Warm containers are named `{prefix}-warm-{uuid}`; session ids may not use it
const WARM_MARKER: &str = "warm-";

/// Seconds Docker waits for a graceful stop before killing
const STOP_TIMEOUT_SECS: u32 = 2;

const RESET_SCRIPT: &str = r#"for d in /workspace/out /workspace/agent_workspace; do
  mkdir -p "$d" && find "$d" -mindepth 1 -delete
done"#;

/// Error type for pool operations
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("container pool exhausted ({capacity} containers in use)")]
    Exhausted { capacity: usize },
    #[error("invalid session id {0:?}")]
    InvalidSessionId(String),
    #[error("no container bound to session {0}")]
    NotFound(String),
    #[error("failed to provision container for session {session_id}: {source}")]
    Provision {
        session_id: String,
        #[source]
        source: RuntimeError,
    },
    #[error("failed to reset workspace: {0}")]
    Reset(String),
    #[error("container pool is shut down")]
    Closed,
    #[error("container acquisition aborted: {0}")]
    Interrupted(String),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Statistics about the pool state
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Warm containers waiting for a session
    pub warm_count: usize,
    /// Containers bound to a session
    pub active_count: usize,
    /// Capacity not held by any container
    pub available: usize,
    pub max_containers: usize,
}

struct ActiveContainer {
    handle: ContainerHandle,
    _permit: OwnedSemaphorePermit,
}

struct WarmContainer {
    slot: PoolSlot,
    permit: OwnedSemaphorePermit,
}

#[derive(Default)]
struct WarmState {
    slots: HashMap<String, Vec<WarmContainer>>,
    /// Warm containers popped for binding but not yet owned by a session
    binding: HashSet<String>,
}

impl WarmState {
    fn total(&self) -> usize {
        self.slots.values().map(Vec::len).sum()
    }
}

type SessionEntry = Arc<Mutex<Option<ActiveContainer>>>;

/// Pool of sandbox containers shared by all sessions
pub struct ContainerPool {
    runtime: Arc<dyn ContainerRuntime>,
    config: PoolConfig,
    sessions: StdMutex<HashMap<String, SessionEntry>>,
    warm: Mutex<WarmState>,
    capacity: Arc<Semaphore>,
    active_count: AtomicUsize,
}

impl ContainerPool {
    /// Create a new container pool
    ///
    /// # Arguments
    /// * `runtime` - Container engine used for every operation
    /// * `config` - Naming, limits, capacity and sweep settings
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: PoolConfig) -> Self {
        let capacity = Arc::new(Semaphore::new(config.max_containers));
        Self {
            runtime,
            config,
            sessions: StdMutex::new(HashMap::new()),
            warm: Mutex::new(WarmState::default()),
            capacity,
            active_count: AtomicUsize::new(0),
        }
    }

    pub fn runtime(&self) -> Arc<dyn ContainerRuntime> {
        Arc::clone(&self.runtime)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Get the container for a session, creating or binding one if needed
    ///
    /// Reuses the bound container when the environment matches and it is
    /// still running. Otherwise the stale container is torn down and a warm
    /// container (or a freshly provisioned one) takes its place.
    ///
    /// Once the session lock is held the work runs in its own task, so a
    /// caller that stops waiting never leaves a half-bound container behind.
    /// The container still lands on the session, where `destroy` or the idle
    /// sweep reclaims it.
    pub async fn acquire(self: &Arc<Self>, session_id: &str, environment: &str) -> Result<ContainerHandle, PoolError> {
        validate_session_id(session_id)?;
        let start = Instant::now();
        let bound = self.session_entry(session_id).lock_owned().await;

        let pool = Arc::clone(self);
        let session_id = session_id.to_string();
        let environment = environment.to_string();
        tokio::spawn(async move { pool.bind_session(bound, &session_id, &environment, start).await })
            .await
            .map_err(|e| PoolError::Interrupted(e.to_string()))?
    }

    async fn bind_session(
        &self,
        mut bound: OwnedMutexGuard<Option<ActiveContainer>>,
        session_id: &str,
        environment: &str,
        start: Instant,
    ) -> Result<ContainerHandle, PoolError> {
        if let Some(active) = bound.as_mut() {
            if active.handle.environment == environment {
                match self.runtime.is_running(&active.handle.container_id).await {
                    Ok(true) => {
                        active.handle.mark_in_use();
                        POOL_ACQUIRE_DURATION
                            .with_label_values(&["reused"])
                            .observe(start.elapsed().as_secs_f64());
                        debug!(session_id, container_id = %active.handle.container_id, "reusing container");
                        return Ok(active.handle.clone());
                    }
                    Ok(false) | Err(RuntimeError::NotFound(_)) => {
                        warn!(session_id, container_id = %active.handle.container_id, "bound container is gone, re-provisioning");
                    }
                    Err(e) => return Err(e.into()),
                }
            } else {
                info!(
                    session_id,
                    from = %active.handle.environment,
                    to = environment,
                    "environment changed, replacing container"
                );
            }
        }
        if let Some(stale) = bound.take() {
            if let Err(e) = self.teardown(stale).await {
                warn!(session_id, error = %e, "failed to remove stale container");
            }
        }

        let name = self.config.container_name(session_id);
        let (active, source) = match self.bind_warm(session_id, environment, &name).await {
            Some(active) => (active, "warm"),
            None => {
                let permit = self.reserve_capacity().await.map_err(|e| {
                    POOL_ACQUIRE_FAILURES.with_label_values(&["exhausted"]).inc();
                    e
                })?;
                let active = self.provision(session_id, environment, &name, permit).await?;
                (active, "provisioned")
            }
        };

        let handle = active.handle.clone();
        *bound = Some(active);
        self.finish_binding(&handle.container_id).await;
        let active_now = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        POOL_ACTIVE_CONTAINERS.set(active_now as f64);

        let elapsed = start.elapsed();
        POOL_ACQUIRE_DURATION
            .with_label_values(&[source])
            .observe(elapsed.as_secs_f64());
        info!(
            session_id,
            container_id = %handle.container_id,
            environment,
            source,
            elapsed_ms = elapsed.as_millis() as u64,
            "container acquired"
        );

        Ok(handle)
    }

    /// Mark the session's container idle; it stays bound for the next turn
    pub async fn release(&self, session_id: &str) {
        let Some(entry) = self.existing_entry(session_id) else {
            return;
        };
        let mut bound = entry.lock().await;
        if let Some(active) = bound.as_mut() {
            active.handle.mark_ready();
            debug!(session_id, container_id = %active.handle.container_id, "container released");
        }
    }

    /// Clear the writable workspace while keeping the container warm
    pub async fn reset(&self, session_id: &str) -> Result<(), PoolError> {
        let entry = self
            .existing_entry(session_id)
            .ok_or_else(|| PoolError::NotFound(session_id.to_string()))?;
        let mut bound = entry.lock().await;

        let result = {
            let active = bound
                .as_mut()
                .ok_or_else(|| PoolError::NotFound(session_id.to_string()))?;
            active.handle.mark_resetting();
            let argv: Vec<String> = ["bash", "-c", RESET_SCRIPT].iter().map(|s| s.to_string()).collect();
            let result = self.runtime.exec(&active.handle.container_id, &argv, None).await;
            active.handle.mark_ready();
            result
        };

        match result {
            Ok(output) if output.exit_code == 0 => {
                info!(session_id, "workspace reset");
                Ok(())
            }
            Ok(output) => Err(PoolError::Reset(output.stderr.trim().to_string())),
            Err(e) if e.is_container_lost() => {
                if let Some(stale) = bound.take() {
                    if let Err(e) = self.teardown(stale).await {
                        warn!(session_id, error = %e, "failed to remove lost container");
                    }
                }
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stop and remove the session's container, returning its capacity
    pub async fn destroy(&self, session_id: &str) -> Result<(), PoolError> {
        let Some(entry) = self.existing_entry(session_id) else {
            return Ok(());
        };
        let mut bound = entry.lock().await;
        if let Some(active) = bound.take() {
            info!(session_id, container_id = %active.handle.container_id, "destroying container");
            self.teardown(active).await?;
        }
        Ok(())
    }

    /// Current handle for a session, if one is bound
    pub async fn handle(&self, session_id: &str) -> Option<ContainerHandle> {
        let entry = self.existing_entry(session_id)?;
        let bound = entry.lock().await;
        bound.as_ref().map(|active| active.handle.clone())
    }

    /// Remove leftover containers that no handle accounts for
    ///
    /// Containers carrying the pool's name prefix are compared against the
    /// warm slots and the bound handles. Unknown ones older than
    /// `orphan_max_age` are force-removed. Sessions that are mid-acquire are
    /// skipped by name; their own `acquire` clears any collision.
    pub async fn sweep_orphans(&self) -> Result<usize, PoolError> {
        let listed = self.runtime.list(&self.config.name_prefix).await?;

        // Warm state first: a container leaves it only by becoming bound.
        let mut known_ids: HashSet<String> = {
            let warm = self.warm.lock().await;
            warm.slots
                .values()
                .flatten()
                .map(|w| w.slot.container_id.clone())
                .chain(warm.binding.iter().cloned())
                .collect()
        };
        let mut busy_names = HashSet::new();
        for (session_id, entry) in self.entries_snapshot() {
            match entry.try_lock() {
                Ok(bound) => {
                    if let Some(active) = bound.as_ref() {
                        known_ids.insert(active.handle.container_id.clone());
                    }
                }
                Err(_) => {
                    busy_names.insert(self.config.container_name(&session_id));
                }
            }
        }

        let max_age = self.config.orphan_max_age().as_secs() as i64;
        let now = unix_now();
        let mut removed = 0;
        for container in listed {
            if known_ids.contains(&container.id) || busy_names.contains(&container.name) {
                continue;
            }
            let age = now - container.created_unix;
            if age < max_age {
                debug!(name = %container.name, age_secs = age, "unknown container is recent, keeping");
                continue;
            }
            match self.runtime.remove(&container.id, true).await {
                Ok(()) => {
                    removed += 1;
                    POOL_ORPHANS_REMOVED.inc();
                    info!(name = %container.name, container_id = %container.id, age_secs = age, "removed orphaned container");
                }
                Err(RuntimeError::NotFound(_)) => {}
                Err(e) => warn!(name = %container.name, error = %e, "failed to remove orphaned container"),
            }
        }
        Ok(removed)
    }

    /// Destroy bound containers that have been idle past `idle_timeout`
    pub async fn sweep_idle(&self) -> usize {
        let idle_timeout = self.config.idle_timeout();
        let mut reclaimed = 0;
        for (session_id, entry) in self.entries_snapshot() {
            let Ok(mut bound) = entry.try_lock() else {
                continue;
            };
            let expired = bound.as_ref().is_some_and(|active| {
                active.handle.state == ContainerState::Ready && active.handle.idle_for() >= idle_timeout
            });
            if !expired {
                continue;
            }
            if let Some(active) = bound.take() {
                info!(
                    session_id = %session_id,
                    idle_secs = active.handle.idle_for().as_secs(),
                    age_secs = active.handle.age().as_secs(),
                    "reclaiming idle container"
                );
                if let Err(e) = self.teardown(active).await {
                    warn!(session_id = %session_id, error = %e, "failed to remove idle container");
                }
                reclaimed += 1;
                POOL_IDLE_RECLAIMED.inc();
            }
        }
        reclaimed
    }

    /// Pre-warm containers for the configured environments
    pub async fn initialize(&self) -> usize {
        info!(
            environments = ?self.config.warm_environments,
            per_environment = self.config.warm_per_environment,
            "pre-warming containers"
        );
        let created = self.replenish().await;
        info!(created, "container pool initialized");
        created
    }

    /// Top up warm containers without waiting for capacity
    pub async fn replenish(&self) -> usize {
        let mut created = 0;
        for environment in &self.config.warm_environments {
            let have = {
                let warm = self.warm.lock().await;
                warm.slots.get(environment).map_or(0, Vec::len)
            };
            for _ in have..self.config.warm_per_environment {
                let Ok(permit) = self.capacity.clone().try_acquire_owned() else {
                    return created;
                };
                let name = format!("{}-{}{}", self.config.name_prefix, WARM_MARKER, Uuid::now_v7().simple());
                let spec = self.container_spec(&name, environment, None);
                match self.create_and_start(&spec).await {
                    Ok(container_id) => {
                        let mut warm = self.warm.lock().await;
                        warm.slots.entry(environment.clone()).or_default().push(WarmContainer {
                            slot: PoolSlot::new(container_id, name, environment.clone()),
                            permit,
                        });
                        POOL_WARM_CONTAINERS.set(warm.total() as f64);
                        created += 1;
                    }
                    Err(e) => {
                        warn!(environment = %environment, error = %e, "failed to create warm container");
                        break;
                    }
                }
            }
        }
        created
    }

    /// Get current pool statistics
    pub async fn stats(&self) -> PoolStats {
        let warm_count = self.warm.lock().await.total();
        PoolStats {
            warm_count,
            active_count: self.active_count.load(Ordering::SeqCst),
            available: self.capacity.available_permits(),
            max_containers: self.config.max_containers,
        }
    }

    /// Graceful shutdown: destroy every container the pool owns
    pub async fn shutdown(&self) {
        info!("shutting down container pool");
        self.capacity.close();

        for (session_id, entry) in self.entries_snapshot() {
            let mut bound = entry.lock().await;
            if let Some(active) = bound.take() {
                if let Err(e) = self.teardown(active).await {
                    warn!(session_id = %session_id, error = %e, "failed to remove container during shutdown");
                }
            }
        }

        let warm: Vec<WarmContainer> = {
            let mut warm = self.warm.lock().await;
            warm.slots.drain().flat_map(|(_, slots)| slots).collect()
        };
        for container in warm {
            self.remove_quietly(&container.slot.container_id).await;
        }
        POOL_WARM_CONTAINERS.set(0.0);
        info!("container pool shut down");
    }

    /// Start the background maintenance task
    ///
    /// Every `sweep_interval` it removes orphans, reclaims idle containers and
    /// tops up the warm slots, until `shutdown` is cancelled.
    pub fn start_maintenance(pool: Arc<ContainerPool>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(pool.config.sweep_interval());
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }

                match pool.sweep_orphans().await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "orphan sweep finished"),
                    Err(e) => warn!(error = %e, "orphan sweep failed"),
                }
                pool.sweep_idle().await;
                pool.prune_entries();
                pool.replenish().await;
            }
            debug!("pool maintenance stopped");
        })
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn session_entry(&self, session_id: &str) -> SessionEntry {
        Arc::clone(self.sessions().entry(session_id.to_string()).or_default())
    }

    fn existing_entry(&self, session_id: &str) -> Option<SessionEntry> {
        self.sessions().get(session_id).cloned()
    }

    fn entries_snapshot(&self) -> Vec<(String, SessionEntry)> {
        self.sessions()
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
            .collect()
    }

    /// Drop map entries nobody references and that hold no container
    fn prune_entries(&self) {
        self.sessions().retain(|_, entry| {
            Arc::strong_count(entry) > 1 || entry.try_lock().map_or(true, |bound| bound.is_some())
        });
    }

    /// Pop a warm container for `environment` and rename it for the session
    async fn bind_warm(&self, session_id: &str, environment: &str, name: &str) -> Option<ActiveContainer> {
        loop {
            let warm = {
                let mut state = self.warm.lock().await;
                let warm = state.slots.get_mut(environment)?.pop()?;
                state.binding.insert(warm.slot.container_id.clone());
                POOL_WARM_CONTAINERS.set(state.total() as f64);
                warm
            };
            let container_id = warm.slot.container_id.clone();

            let alive = matches!(self.runtime.is_running(&container_id).await, Ok(true));
            if alive {
                self.remove_leftover(name).await;
                match self.runtime.rename(&container_id, name).await {
                    Ok(()) => {
                        let mut handle = warm.slot.into_handle(session_id, name);
                        handle.mark_in_use();
                        return Some(ActiveContainer {
                            handle,
                            _permit: warm.permit,
                        });
                    }
                    Err(e) => warn!(session_id, container_id = %container_id, error = %e, "failed to bind warm container"),
                }
            } else {
                warn!(container_id = %container_id, "warm container is not running, discarding");
            }
            self.remove_quietly(&container_id).await;
            self.finish_binding(&container_id).await;
        }
    }

    async fn finish_binding(&self, container_id: &str) {
        self.warm.lock().await.binding.remove(container_id);
    }

    /// Take one unit of capacity, evicting a warm container of another
    /// environment or waiting up to `acquire_timeout` if necessary
    async fn reserve_capacity(&self) -> Result<OwnedSemaphorePermit, PoolError> {
        match self.capacity.clone().try_acquire_owned() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => return Err(PoolError::Closed),
            Err(TryAcquireError::NoPermits) => {}
        }

        let victim = {
            let mut state = self.warm.lock().await;
            let victim = state.slots.values_mut().find_map(Vec::pop);
            POOL_WARM_CONTAINERS.set(state.total() as f64);
            victim
        };
        if let Some(victim) = victim {
            info!(environment = %victim.slot.environment, "evicting warm container to make room");
            self.remove_quietly(&victim.slot.container_id).await;
            return Ok(victim.permit);
        }

        debug!(capacity = self.config.max_containers, "pool full, waiting for capacity");
        match tokio::time::timeout(self.config.acquire_timeout(), self.capacity.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(PoolError::Closed),
            Err(_) => Err(PoolError::Exhausted {
                capacity: self.config.max_containers,
            }),
        }
    }

    async fn provision(
        &self,
        session_id: &str,
        environment: &str,
        name: &str,
        permit: OwnedSemaphorePermit,
    ) -> Result<ActiveContainer, PoolError> {
        // A crashed process may have left a container with this exact name.
        self.remove_leftover(name).await;

        let spec = self.container_spec(name, environment, Some(session_id));
        let container_id = self.create_and_start(&spec).await.map_err(|source| {
            POOL_ACQUIRE_FAILURES.with_label_values(&["provision"]).inc();
            PoolError::Provision {
                session_id: session_id.to_string(),
                source,
            }
        })?;

        let mut handle = ContainerHandle::new(session_id, container_id, name, environment);
        handle.mark_in_use();
        Ok(ActiveContainer {
            handle,
            _permit: permit,
        })
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let container_id = match self.runtime.create(spec).await {
            Err(RuntimeError::Conflict(_)) => {
                warn!(name = %spec.name, "container name still taken, removing leftover");
                self.remove_leftover(&spec.name).await;
                self.runtime.create(spec).await?
            }
            other => other?,
        };
        if let Err(e) = self.runtime.start(&container_id).await {
            self.remove_quietly(&container_id).await;
            return Err(e);
        }
        Ok(container_id)
    }

    /// Stop and remove a bound container; its permit is released on return
    async fn teardown(&self, mut active: ActiveContainer) -> Result<(), RuntimeError> {
        active.handle.mark_destroyed();
        let container_id = active.handle.container_id.clone();

        if let Err(e) = self.runtime.stop(&container_id, STOP_TIMEOUT_SECS).await {
            debug!(container_id = %container_id, error = %e, "stop failed, forcing removal");
        }
        let removed = match self.runtime.remove(&container_id, true).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        };

        let active_now = self.active_count.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        POOL_ACTIVE_CONTAINERS.set(active_now as f64);
        removed
    }

    /// Force-remove a container by name; true if one existed
    async fn remove_leftover(&self, name: &str) -> bool {
        match self.runtime.remove(name, true).await {
            Ok(()) => {
                POOL_ORPHANS_REMOVED.inc();
                info!(name, "removed leftover container");
                true
            }
            Err(RuntimeError::NotFound(_)) => false,
            Err(e) => {
                warn!(name, error = %e, "failed to remove leftover container");
                false
            }
        }
    }

    async fn remove_quietly(&self, container_id: &str) {
        match self.runtime.remove(container_id, true).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => {}
            Err(e) => warn!(container_id, error = %e, "failed to remove container"),
        }
    }

    fn container_spec(&self, name: &str, environment: &str, session_id: Option<&str>) -> ContainerSpec {
        let workspace_source = match session_id {
            Some(id) if self.config.workspace_volumes => self.config.workspace_volume(id),
            _ => String::new(),
        };
        let mut mounts = vec![Mount {
            kind: MountKind::Volume,
            source: workspace_source,
            target: OUTPUT_DIR.to_string(),
            read_only: false,
        }];
        mounts.extend(self.config.project_files.iter().map(|shared| Mount {
            kind: MountKind::Bind,
            source: shared.source.clone(),
            target: format!("{}/{}", PROJECT_FILES_DIR, shared.target.trim_matches('/')),
            read_only: true,
        }));

        let session = session_id.unwrap_or_default().to_string();
        ContainerSpec {
            name: name.to_string(),
            image: self.config.image_for(environment),
            limits: self.config.limits.clone(),
            mounts,
            env: vec![
                ("SESSION_ID".to_string(), session.clone()),
                ("WORKSPACE".to_string(), WORKSPACE_ROOT.to_string()),
                ("AGENT_WORKSPACE".to_string(), AGENT_WORKSPACE_DIR.to_string()),
            ],
            labels: vec![
                ("codebox.managed".to_string(), "true".to_string()),
                ("codebox.environment".to_string(), environment.to_string()),
                ("codebox.session".to_string(), session),
            ],
            network_mode: self.config.network_mode.clone(),
            working_dir: WORKSPACE_ROOT.to_string(),
        }
    }
}

/// Session ids become part of container names, so they must be valid there
fn validate_session_id(session_id: &str) -> Result<(), PoolError> {
    let valid = !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric())
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        && !session_id.starts_with(WARM_MARKER);
    if valid {
        Ok(())
    } else {
        Err(PoolError::InvalidSessionId(session_id.to_string()))
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
