//! Prometheus metrics for the zip service.
//!
//! Covers fail-over retries, cache effectiveness, daemon notifications and
//! the tracked tip. [`ServiceMetrics`] owns a dedicated [`Registry`] that the
//! WebSocket relay's `/metrics` route encodes into the text exposition format.

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

use crate::NodeError;

pub struct ServiceMetrics {
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Daemon calls that failed and moved on to the next node.
    pub rpc_failovers: IntCounter,
    /// Read-through cache hits, labelled by cache name.
    pub cache_hits: IntCounterVec,
    /// Read-through cache misses, labelled by cache name.
    pub cache_misses: IntCounterVec,
    /// ZMQ notifications received, labelled by topic.
    pub zmq_notifications: IntCounterVec,
    /// ZMQ notifications dropped as already seen, labelled by topic.
    pub zmq_duplicates: IntCounterVec,
    /// Times a notification socket was reopened.
    pub zmq_reconnects: IntCounter,
    /// Times the supervisor relaunched an exited daemon.
    pub daemon_respawns: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    pub tip_height: IntGauge,
}

impl ServiceMetrics {
    pub fn new() -> Result<Self, NodeError> {
        let registry = Registry::new();
        let err = |e: prometheus::Error| NodeError::Other(format!("metrics registration: {e}"));

        let rpc_failovers = register_int_counter_with_registry!(
            Opts::new(
                "zipcore_rpc_failovers_total",
                "Daemon calls retried on another node"
            ),
            registry
        )
        .map_err(err)?;

        let cache_hits = register_int_counter_vec_with_registry!(
            Opts::new("zipcore_cache_hits_total", "Read-through cache hits"),
            &["cache"],
            registry
        )
        .map_err(err)?;

        let cache_misses = register_int_counter_vec_with_registry!(
            Opts::new("zipcore_cache_misses_total", "Read-through cache misses"),
            &["cache"],
            registry
        )
        .map_err(err)?;

        let zmq_notifications = register_int_counter_vec_with_registry!(
            Opts::new(
                "zipcore_zmq_notifications_total",
                "Daemon ZMQ notifications received"
            ),
            &["topic"],
            registry
        )
        .map_err(err)?;

        let zmq_duplicates = register_int_counter_vec_with_registry!(
            Opts::new(
                "zipcore_zmq_duplicates_total",
                "Daemon ZMQ notifications dropped as duplicates"
            ),
            &["topic"],
            registry
        )
        .map_err(err)?;

        let zmq_reconnects = register_int_counter_with_registry!(
            Opts::new("zipcore_zmq_reconnects_total", "Notification socket reopenings"),
            registry
        )
        .map_err(err)?;

        let daemon_respawns = register_int_counter_with_registry!(
            Opts::new("zipcore_daemon_respawns_total", "Spawned daemon restarts"),
            registry
        )
        .map_err(err)?;

        let tip_height = register_int_gauge_with_registry!(
            Opts::new("zipcore_tip_height", "Height of the tracked chain tip"),
            registry
        )
        .map_err(err)?;

        Ok(Self {
            registry,
            rpc_failovers,
            cache_hits,
            cache_misses,
            zmq_notifications,
            zmq_duplicates,
            zmq_reconnects,
            daemon_respawns,
            tip_height,
        })
    }

    /// Render every metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, NodeError> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .map_err(|e| NodeError::Other(format!("metrics encoding: {e}")))?;
        String::from_utf8(buf).map_err(|e| NodeError::Other(e.to_string()))
    }
}
