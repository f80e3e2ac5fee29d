//! Prometheus metrics for the sandbox pool, the agent loop and the stream
//!
//! All metrics live in the default registry; `gather_text` renders them in
//! the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramVec,
    TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Container Pool Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Warm containers waiting to be bound to a session.
    pub static ref POOL_WARM_CONTAINERS: Gauge = register_gauge!(
        "codebox_pool_warm_containers",
        "Number of warm containers not yet bound to a session"
    ).expect("failed to register POOL_WARM_CONTAINERS metric");

    /// Containers currently bound to a session.
    pub static ref POOL_ACTIVE_CONTAINERS: Gauge = register_gauge!(
        "codebox_pool_active_containers",
        "Number of containers bound to a session"
    ).expect("failed to register POOL_ACTIVE_CONTAINERS metric");

    /// Time for `acquire` to hand back a container.
    ///
    /// Labels:
    /// - source: "reused", "warm" or "provisioned"
    pub static ref POOL_ACQUIRE_DURATION: HistogramVec = register_histogram_vec!(
        "codebox_pool_acquire_duration_seconds",
        "Time to acquire a container for a session",
        &["source"],
        vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).expect("failed to register POOL_ACQUIRE_DURATION metric");

    /// Provisioning failures and exhaustion errors.
    pub static ref POOL_ACQUIRE_FAILURES: CounterVec = register_counter_vec!(
        "codebox_pool_acquire_failures_total",
        "Failed container acquisitions",
        &["reason"]
    ).expect("failed to register POOL_ACQUIRE_FAILURES metric");

    /// Leftover containers force-removed (by name before provisioning, or by the sweep).
    pub static ref POOL_ORPHANS_REMOVED: Counter = register_counter!(
        "codebox_pool_orphans_removed_total",
        "Orphaned sandbox containers removed"
    ).expect("failed to register POOL_ORPHANS_REMOVED metric");

    /// Bound containers reclaimed by the idle sweep.
    pub static ref POOL_IDLE_RECLAIMED: Counter = register_counter!(
        "codebox_pool_idle_reclaimed_total",
        "Idle containers destroyed by the sweep"
    ).expect("failed to register POOL_IDLE_RECLAIMED metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Agent Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Finished runs by outcome.
    ///
    /// Labels:
    /// - outcome: "finished", "cancelled", "max_iterations", "loop", "container", "provider", "timeout"
    pub static ref AGENT_RUNS: CounterVec = register_counter_vec!(
        "codebox_agent_runs_total",
        "Agent runs by outcome",
        &["outcome"]
    ).expect("failed to register AGENT_RUNS metric");

    pub static ref AGENT_STEPS: Histogram = register_histogram!(
        "codebox_agent_steps",
        "Steps taken per agent run",
        vec![1.0, 2.0, 3.0, 5.0, 10.0, 15.0, 20.0, 30.0, 50.0]
    ).expect("failed to register AGENT_STEPS metric");

    /// Tool invocations.
    ///
    /// Labels:
    /// - tool: tool name
    /// - status: "success", "error", "invalid", "timeout", "cancelled", "fatal"
    pub static ref TOOL_CALLS: CounterVec = register_counter_vec!(
        "codebox_tool_calls_total",
        "Tool calls by tool and status",
        &["tool", "status"]
    ).expect("failed to register TOOL_CALLS metric");

    pub static ref TOOL_DURATION: HistogramVec = register_histogram_vec!(
        "codebox_tool_duration_seconds",
        "Tool execution time",
        &["tool"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]
    ).expect("failed to register TOOL_DURATION metric");

    /// Loop detections by kind ("identical_error" or "alternation").
    pub static ref LOOP_DETECTIONS: CounterVec = register_counter_vec!(
        "codebox_agent_loop_detections_total",
        "Loop patterns detected in agent runs",
        &["kind"]
    ).expect("failed to register LOOP_DETECTIONS metric");

    pub static ref LLM_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "codebox_llm_call_duration_seconds",
        "Time for one streamed completion",
        &["model"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).expect("failed to register LLM_CALL_DURATION metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Stream Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Events delivered to consumers, by wire type.
    pub static ref STREAM_EVENTS: CounterVec = register_counter_vec!(
        "codebox_stream_events_total",
        "Stream events emitted by type",
        &["type"]
    ).expect("failed to register STREAM_EVENTS metric");

    /// Coalesced chunk flushes.
    pub static ref STREAM_CHUNK_FLUSHES: Counter = register_counter!(
        "codebox_stream_chunk_flushes_total",
        "Buffered chunk text flushed to the consumer"
    ).expect("failed to register STREAM_CHUNK_FLUSHES metric");
}

/// Render every registered metric in the Prometheus text format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_contains_touched_metrics() {
        TOOL_CALLS.with_label_values(&["bash", "success"]).inc();
        POOL_ORPHANS_REMOVED.inc_by(0.0);
        let text = gather_text();
        assert!(text.contains("codebox_tool_calls_total"));
        assert!(text.contains("codebox_pool_orphans_removed_total"));
    }
}
