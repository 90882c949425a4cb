//! Per-key task serialization pool — one ordered worker per active session,
//! torn down after an inactivity window.

pub(crate) mod buffer;
pub mod metrics;
pub(crate) mod queue;
pub mod task_pool;
pub mod traits;

pub use metrics::{PoolMetrics, PoolSnapshot};
pub use task_pool::TaskPool;
pub use traits::{SessionKey, Task};

use crate::config::PoolConfig;

/// Factory: create a pool from validated config.
pub fn create_task_pool<K: SessionKey>(config: &PoolConfig) -> anyhow::Result<TaskPool<K>> {
    config.validate()?;
    Ok(TaskPool::new(config.clone()))
}
