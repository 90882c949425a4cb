//! Synthetic flow driver used by `convoy simulate` and the benches.
//!
//! Each flow submits `packets` numbered "datagram" tasks under its own key.
//! Tasks append their sequence number to a per-flow log, so the report can
//! prove per-key ordering after the fact.

use anyhow::{bail, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};

use crate::pool::{PoolSnapshot, TaskPool};

#[derive(Debug, Clone)]
pub struct SimulationPlan {
    pub flows: usize,
    pub packets: usize,
    /// Gap between two packets of the same flow.
    pub interval: Duration,
    /// Simulated forwarding cost per packet.
    pub work: Duration,
    /// After the last packet, also wait for every session to idle out.
    pub wait_for_eviction: bool,
}

impl Default for SimulationPlan {
    fn default() -> Self {
        Self {
            flows: 16,
            packets: 64,
            interval: Duration::from_millis(1),
            work: Duration::ZERO,
            wait_for_eviction: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub flows: usize,
    pub packets_per_flow: usize,
    pub elapsed_ms: u64,
    pub out_of_order_flows: Vec<String>,
    /// Packets dropped unrun by a session closing under `ClosePolicy::Discard`.
    pub packets_discarded: u64,
    pub packets_panicked: u64,
    pub sessions_remaining: usize,
    pub metrics: PoolSnapshot,
}

impl SimulationReport {
    pub fn is_ordered(&self) -> bool {
        self.out_of_order_flows.is_empty()
    }
}

pub fn flow_key(index: usize) -> String {
    format!("udp:10.0.{}.{}:5353", index / 256, index % 256)
}

/// Drive `plan` through `pool` and wait until every packet has run, been
/// discarded, or panicked.
pub async fn run(pool: &TaskPool<String>, plan: &SimulationPlan) -> Result<SimulationReport> {
    if plan.flows == 0 || plan.packets == 0 {
        bail!("simulation needs at least one flow and one packet");
    }

    let started = Instant::now();
    let baseline = pool.snapshot();
    let logs: Arc<Mutex<HashMap<String, Vec<usize>>>> = Arc::default();
    let total = u64::try_from(plan.flows * plan.packets)?;

    let mut producers = Vec::with_capacity(plan.flows);
    for flow in 0..plan.flows {
        let pool = pool.clone();
        let logs = Arc::clone(&logs);
        let plan = plan.clone();
        producers.push(tokio::spawn(async move {
            let key = flow_key(flow);
            for seq in 0..plan.packets {
                let logs = Arc::clone(&logs);
                let task_key = key.clone();
                let work = plan.work;
                pool.submit(key.clone(), async move {
                    if !work.is_zero() {
                        time::sleep(work).await;
                    }
                    logs.lock().entry(task_key).or_default().push(seq);
                })
                .await;
                if !plan.interval.is_zero() {
                    time::sleep(plan.interval).await;
                }
            }
        }));
    }
    for producer in producers {
        producer.await?;
    }

    // Every submitted packet ends up completed, discarded or panicked.
    let settled = || {
        let now = pool.snapshot();
        (now.tasks_completed - baseline.tasks_completed)
            + (now.tasks_discarded - baseline.tasks_discarded)
            + (now.tasks_panicked - baseline.tasks_panicked)
    };
    while settled() < total {
        time::sleep(Duration::from_millis(1)).await;
    }
    tracing::info!(flows = plan.flows, packets = total, "All packets settled");

    if plan.wait_for_eviction {
        let deadline = Instant::now() + pool.config().nat_timeout() * 4;
        while !pool.is_empty() && Instant::now() < deadline {
            time::sleep(pool.config().nat_timeout() / 4).await;
        }
    }

    let mut out_of_order_flows: Vec<String> = logs
        .lock()
        .iter()
        // Discarded packets leave gaps; anything out of sequence is a reorder.
        .filter(|(_, seqs)| !seqs.windows(2).all(|pair| pair[0] < pair[1]))
        .map(|(key, _)| key.clone())
        .collect();
    out_of_order_flows.sort();

    let finished = pool.snapshot();
    Ok(SimulationReport {
        flows: plan.flows,
        packets_per_flow: plan.packets,
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        out_of_order_flows,
        packets_discarded: finished.tasks_discarded - baseline.tasks_discarded,
        packets_panicked: finished.tasks_panicked - baseline.tasks_panicked,
        sessions_remaining: pool.len(),
        metrics: finished,
    })
}
