#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::assigning_clones,
    clippy::bool_to_int_with_if,
    clippy::case_sensitive_file_extension_comparisons,
    clippy::cast_possible_wrap,
    clippy::doc_markdown,
    clippy::field_reassign_with_default,
    clippy::float_cmp,
    clippy::implicit_clone,
    clippy::items_after_statements,
    clippy::map_unwrap_or,
    clippy::manual_let_else,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::needless_pass_by_value,
    clippy::needless_raw_string_hashes,
    clippy::redundant_closure_for_method_calls,
    clippy::return_self_not_must_use,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::unnecessary_cast,
    clippy::unnecessary_lazy_evaluations,
    clippy::unnecessary_literal_bound,
    clippy::unnecessary_map_or,
    clippy::unused_self,
    clippy::cast_precision_loss,
    clippy::unnecessary_wraps,
    dead_code
)]

//! Keyed task serialization for connection tracking.
//!
//! Every task submitted under a session key (a NAT flow, a client address)
//! runs on that key's own worker, strictly in submission order. Keys run
//! concurrently with each other. Sessions that stop receiving work are
//! evicted after the configured NAT timeout and their buffers recycled.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use convoy::{create_task_pool, PoolConfig};
//!
//! let pool = create_task_pool::<String>(&PoolConfig::default())?;
//! pool.submit("10.0.0.2:5353".to_string(), async {
//!     // forward the datagram
//! })
//! .await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod pool;
pub mod simulate;

pub use config::{ClosePolicy, Config, PoolConfig};
pub use pool::{create_task_pool, PoolSnapshot, SessionKey, Task, TaskPool};
