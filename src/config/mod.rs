pub mod schema;

pub use schema::{ClosePolicy, Config, ObservabilityConfig, PoolConfig};
