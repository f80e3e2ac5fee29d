//! Resource limits applied to sandbox containers
//!
//! Limits are fixed when a container is created. Docker enforces them
//! through the container's cgroup:
//!
//! ```text
//! cpu_cores    → HostConfig.NanoCpus    (0.5 core = 500_000_000)
//! memory_bytes → HostConfig.Memory      (MemorySwap = Memory, i.e. no swap)
//! pids_limit   → HostConfig.PidsLimit   (fork-bomb ceiling)
//! ```

use serde::{Deserialize, Serialize};

const GIB: u64 = 1024 * 1024 * 1024;

/// Resource limits for one container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Number of CPU cores (can be fractional, e.g., 0.5 for half a core)
    pub cpu_cores: f64,

    /// Memory limit in bytes; swap is disabled
    pub memory_bytes: u64,

    /// Maximum number of processes inside the container
    pub pids_limit: i64,
}

impl Default for ResourceLimits {
    /// Half a core, 1GB RAM, 256 processes
    fn default() -> Self {
        Self {
            cpu_cores: 0.5,
            memory_bytes: GIB,
            pids_limit: 256,
        }
    }
}

impl ResourceLimits {
    /// 1 core, 2GB RAM
    pub fn medium() -> Self {
        Self {
            cpu_cores: 1.0,
            memory_bytes: 2 * GIB,
            pids_limit: 512,
        }
    }

    /// 2 cores, 4GB RAM
    pub fn large() -> Self {
        Self {
            cpu_cores: 2.0,
            memory_bytes: 4 * GIB,
            pids_limit: 1024,
        }
    }

    /// Create custom limits
    pub fn custom(cpu_cores: f64, memory_gb: f64) -> Self {
        Self {
            cpu_cores,
            memory_bytes: (memory_gb * GIB as f64) as u64,
            ..Self::default()
        }
    }

    /// CPU quota in units of 10^-9 CPUs
    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_cores * 1_000_000_000.0).round() as i64
    }

    /// The `HostConfig` fields that carry these limits
    pub fn host_config(&self) -> serde_json::Value {
        serde_json::json!({
            "NanoCpus": self.nano_cpus(),
            "Memory": self.memory_bytes,
            "MemorySwap": self.memory_bytes,
            "PidsLimit": self.pids_limit,
        })
    }
}
