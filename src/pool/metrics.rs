//! Prometheus counters and gauges for a single pool.

use anyhow::{Context, Result};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use serde::Serialize;

/// Point-in-time copy of every pool metric.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub sessions_created: u64,
    pub sessions_evicted: u64,
    pub active_sessions: i64,
    pub buffers_allocated: u64,
    pub buffers_reused: u64,
    pub idle_buffers: i64,
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub tasks_discarded: u64,
    pub tasks_panicked: u64,
}

/// Metrics owned by one pool, registered in a private registry so several
/// pools can coexist in one process.
pub struct PoolMetrics {
    registry: Registry,
    pub(crate) sessions_created: IntCounter,
    pub(crate) sessions_evicted: IntCounter,
    pub(crate) active_sessions: IntGauge,
    pub(crate) buffers_allocated: IntCounter,
    pub(crate) buffers_reused: IntCounter,
    pub(crate) idle_buffers: IntGauge,
    pub(crate) tasks_submitted: IntCounter,
    pub(crate) tasks_completed: IntCounter,
    pub(crate) tasks_discarded: IntCounter,
    pub(crate) tasks_panicked: IntCounter,
}

impl PoolMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let counter = |name: &str, help: &str| {
            let c = IntCounter::new(name, help).expect("valid metric name");
            registry
                .register(Box::new(c.clone()))
                .expect("metric registered once");
            c
        };
        let gauge = |name: &str, help: &str| {
            let g = IntGauge::new(name, help).expect("valid metric name");
            registry
                .register(Box::new(g.clone()))
                .expect("metric registered once");
            g
        };

        Self {
            sessions_created: counter(
                "convoy_sessions_created_total",
                "Session queues created",
            ),
            sessions_evicted: counter(
                "convoy_sessions_evicted_total",
                "Session queues evicted after inactivity",
            ),
            active_sessions: gauge("convoy_active_sessions", "Session queues currently registered"),
            buffers_allocated: counter(
                "convoy_buffers_allocated_total",
                "Task buffers freshly allocated",
            ),
            buffers_reused: counter(
                "convoy_buffers_reused_total",
                "Task buffers taken from the reuse cache",
            ),
            idle_buffers: gauge("convoy_idle_buffers", "Task buffers waiting in the reuse cache"),
            tasks_submitted: counter("convoy_tasks_submitted_total", "Tasks enqueued"),
            tasks_completed: counter("convoy_tasks_completed_total", "Tasks run to completion"),
            tasks_discarded: counter(
                "convoy_tasks_discarded_total",
                "Buffered tasks dropped at eviction",
            ),
            tasks_panicked: counter("convoy_tasks_panicked_total", "Tasks that panicked"),
            registry,
        }
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            sessions_created: self.sessions_created.get(),
            sessions_evicted: self.sessions_evicted.get(),
            active_sessions: self.active_sessions.get(),
            buffers_allocated: self.buffers_allocated.get(),
            buffers_reused: self.buffers_reused.get(),
            idle_buffers: self.idle_buffers.get(),
            tasks_submitted: self.tasks_submitted.get(),
            tasks_completed: self.tasks_completed.get(),
            tasks_discarded: self.tasks_discarded.get(),
            tasks_panicked: self.tasks_panicked.get(),
        }
    }

    /// Render every metric in the Prometheus text exposition format.
    pub fn encode_text(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .context("Failed to encode pool metrics")?;
        String::from_utf8(buf).context("Prometheus output was not UTF-8")
    }
}

impl Default for PoolMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_metrics_are_zero() {
        assert_eq!(PoolMetrics::new().snapshot(), PoolSnapshot::default());
    }

    #[test]
    fn snapshot_reflects_updates() {
        let m = PoolMetrics::new();
        m.sessions_created.inc();
        m.active_sessions.inc();
        m.tasks_submitted.inc_by(3);

        let snap = m.snapshot();
        assert_eq!(snap.sessions_created, 1);
        assert_eq!(snap.active_sessions, 1);
        assert_eq!(snap.tasks_submitted, 3);
    }

    #[test]
    fn text_encoding_names_every_family() {
        let m = PoolMetrics::new();
        m.buffers_reused.inc();
        let text = m.encode_text().unwrap();
        assert!(text.contains("convoy_buffers_reused_total 1"));
        assert!(text.contains("convoy_active_sessions 0"));
    }

    #[test]
    fn independent_pools_do_not_collide() {
        let a = PoolMetrics::new();
        let b = PoolMetrics::new();
        a.tasks_completed.inc();
        assert_eq!(b.snapshot().tasks_completed, 0);
    }
}
