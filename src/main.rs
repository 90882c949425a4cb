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
    clippy::needless_pass_by_value,
    clippy::needless_raw_string_hashes,
    clippy::redundant_closure_for_method_calls,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::unused_self,
    clippy::cast_precision_loss,
    clippy::unnecessary_cast,
    clippy::unnecessary_lazy_evaluations,
    clippy::unnecessary_literal_bound,
    clippy::unnecessary_map_or,
    clippy::unnecessary_wraps,
    dead_code
)]

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use convoy::config::{ClosePolicy, Config};
use convoy::simulate::{self, SimulationPlan};

/// `convoy` - per-flow task serialization for NAT and UDP session tracking.
#[derive(Parser, Debug)]
#[command(name = "convoy")]
#[command(version)]
#[command(about = "Keyed, ordered, self-evicting task pool.", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.convoy/config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive the pool with synthetic UDP flows and report metrics
    #[command(long_about = "\
Drive the pool with synthetic UDP flows and report metrics.

Each flow submits numbered datagram tasks under its own session key. \
The run fails if any flow observed its datagrams out of order.

Examples:
  convoy simulate
  convoy simulate --flows 1000 --packets 16 --interval-ms 0
  convoy simulate --nat-timeout-ms 200 --wait-eviction --prometheus")]
    Simulate {
        /// Number of concurrent flows (session keys)
        #[arg(long, default_value = "16")]
        flows: usize,

        /// Datagrams per flow
        #[arg(long, default_value = "64")]
        packets: usize,

        /// Gap between datagrams of one flow, in milliseconds
        #[arg(long, default_value = "1")]
        interval_ms: u64,

        /// Simulated forwarding cost per datagram, in microseconds
        #[arg(long, default_value = "0")]
        work_us: u64,

        /// Override pool.nat_timeout_ms
        #[arg(long)]
        nat_timeout_ms: Option<u64>,

        /// Override pool.queue_capacity
        #[arg(long)]
        queue_capacity: Option<usize>,

        /// Override pool.close_policy (drain, discard)
        #[arg(long)]
        close_policy: Option<ClosePolicy>,

        /// Wait for idle sessions to be evicted before reporting
        #[arg(long)]
        wait_eviction: bool,

        /// Print Prometheus text exposition instead of JSON
        #[arg(long)]
        prometheus: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(cli.config.as_deref()).await?;

    // Initialize logging - respects RUST_LOG env var, falls back to the configured filter
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_filter)),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }

        Commands::Simulate {
            flows,
            packets,
            interval_ms,
            work_us,
            nat_timeout_ms,
            queue_capacity,
            close_policy,
            wait_eviction,
            prometheus,
        } => {
            if let Some(ms) = nat_timeout_ms {
                config.pool.nat_timeout_ms = ms;
            }
            if let Some(capacity) = queue_capacity {
                config.pool.queue_capacity = capacity;
            }
            if let Some(policy) = close_policy {
                config.pool.close_policy = policy;
            }

            let pool = convoy::create_task_pool::<String>(&config.pool)?;
            let plan = SimulationPlan {
                flows,
                packets,
                interval: Duration::from_millis(interval_ms),
                work: Duration::from_micros(work_us),
                wait_for_eviction: wait_eviction,
            };
            info!(
                flows,
                packets,
                nat_timeout_ms = config.pool.nat_timeout_ms,
                queue_capacity = config.pool.queue_capacity,
                "Starting simulation"
            );

            let report = simulate::run(&pool, &plan).await?;
            if prometheus {
                print!("{}", pool.metrics().encode_text()?);
            } else {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }

            if !report.is_ordered() {
                bail!(
                    "{} flow(s) forwarded datagrams out of order",
                    report.out_of_order_flows.len()
                );
            }
            Ok(())
        }
    }
}
