//! Container handles - one sandbox container and the session it serves
//!
//! A handle moves through:
//! Provisioning -> Ready <-> InUse -> (Resetting -> Ready) -> Destroyed

use std::time::{Duration, Instant};

/// Lifecycle state of a bound container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// Container is being created and started
    Provisioning,
    /// Bound to its session and idle between turns
    Ready,
    /// A run is executing tools against it
    InUse,
    /// Workspace is being cleared
    Resetting,
    /// Stopped and removed
    Destroyed,
}

/// Snapshot of the container bound to a session
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    /// Owning session
    pub session_id: String,
    /// Runtime identifier
    pub container_id: String,
    /// `{prefix}-{session_id}`
    pub name: String,
    /// Environment type (selects the image)
    pub environment: String,
    pub state: ContainerState,
    pub created_at: Instant,
    pub last_used_at: Instant,
}

impl ContainerHandle {
    pub fn new(
        session_id: impl Into<String>,
        container_id: impl Into<String>,
        name: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        let now = Instant::now();
        Self {
            session_id: session_id.into(),
            container_id: container_id.into(),
            name: name.into(),
            environment: environment.into(),
            state: ContainerState::Provisioning,
            created_at: now,
            last_used_at: now,
        }
    }

    /// Mark idle (bound, reusable by the next turn)
    pub fn mark_ready(&mut self) {
        self.state = ContainerState::Ready;
        self.last_used_at = Instant::now();
    }

    /// Mark in use by a run
    pub fn mark_in_use(&mut self) {
        self.state = ContainerState::InUse;
        self.last_used_at = Instant::now();
    }

    pub fn mark_resetting(&mut self) {
        self.state = ContainerState::Resetting;
    }

    pub fn mark_destroyed(&mut self) {
        self.state = ContainerState::Destroyed;
    }

    /// Ready or InUse
    pub fn is_active(&self) -> bool {
        matches!(self.state, ContainerState::Ready | ContainerState::InUse)
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// A warm container not yet bound to any session
#[derive(Debug, Clone)]
pub struct PoolSlot {
    pub container_id: String,
    pub name: String,
    pub environment: String,
    pub created_at: Instant,
}

impl PoolSlot {
    pub fn new(container_id: impl Into<String>, name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            name: name.into(),
            environment: environment.into(),
            created_at: Instant::now(),
        }
    }

    /// Bind the slot to a session; the container has already been renamed
    pub fn into_handle(self, session_id: impl Into<String>, name: impl Into<String>) -> ContainerHandle {
        let mut handle = ContainerHandle::new(session_id, self.container_id, name, self.environment);
        handle.created_at = self.created_at;
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_lifecycle() {
        let mut handle = ContainerHandle::new("abc", "c1", "codebox-sandbox-abc", "python3.13");
        assert_eq!(handle.state, ContainerState::Provisioning);
        assert!(!handle.is_active());

        handle.mark_in_use();
        assert!(handle.is_active());
        handle.mark_ready();
        assert!(handle.is_active());
        handle.mark_resetting();
        assert!(!handle.is_active());
        handle.mark_destroyed();
        assert_eq!(handle.state, ContainerState::Destroyed);
    }

    #[test]
    fn test_slot_binding_keeps_container() {
        let slot = PoolSlot::new("c9", "codebox-sandbox-warm-1", "node20");
        let handle = slot.into_handle("s1", "codebox-sandbox-s1");
        assert_eq!(handle.container_id, "c9");
        assert_eq!(handle.environment, "node20");
        assert_eq!(handle.name, "codebox-sandbox-s1");
    }
}
