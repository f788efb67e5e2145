//! formflow-runner
//!
//! Drains the pre-seeded send queue for one targeting: claims entries
//! atomically, submits each company's contact form, and finalizes every
//! attempt with mark-done.

use anyhow::{Context, Result};
use clap::Parser;
use formflow_core::config::{
    load_tenant_config, HeadlessMode, RunnerConfig, WorkerConfig,
};
use formflow_core::queue::Runner;
use formflow_core::sanitize::Sanitizer;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "formflow-runner", version, about = "Queue-driven contact-form submission runner")]
struct Cli {
    /// Targeting id whose queue this run drains
    #[arg(long)]
    targeting_id: i64,

    /// Tenant config file path; `*` patterns resolve to the newest match
    #[arg(long)]
    config_file: String,

    /// Optional worker config file (JSON)
    #[arg(long)]
    worker_config: Option<PathBuf>,

    /// Number of parallel workers (clamped to 1..=4)
    #[arg(long, default_value_t = 2)]
    num_workers: usize,

    /// Headless mode: auto, true, false
    #[arg(long, default_value = "auto")]
    headless: HeadlessMode,

    /// Target queue date (YYYY-MM-DD); defaults to today in the fixed zone
    #[arg(long)]
    target_date: Option<chrono::NaiveDate>,

    /// Pin workers to one queue shard
    #[arg(long)]
    shard_id: Option<i64>,

    /// Stop after this many processed companies (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_processed: usize,

    /// Single-company mode: bypass the queue claim, still write mark-done
    #[arg(long)]
    company_id: Option<i64>,
}

fn init_tracing() {
    let quiet_mapping = std::env::var("QUIET_MAPPING_LOGS")
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false);
    let default_filter = if quiet_mapping {
        "formflow_core=info,formflow_core::analyzer=warn"
    } else {
        "formflow_core=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let sanitizer = Sanitizer::new();

    let tenant =
        load_tenant_config(&cli.config_file).context("loading tenant config")?;
    if tenant.targeting_id != cli.targeting_id {
        anyhow::bail!(
            "targeting id mismatch: config carries {}, CLI asked for {}",
            tenant.targeting_id,
            cli.targeting_id
        );
    }
    if !tenant.active {
        anyhow::bail!("targeting {} is inactive", cli.targeting_id);
    }

    let worker = WorkerConfig::load(cli.worker_config.as_deref()).context("loading worker config")?;
    let (db_url, db_api_key) = RunnerConfig::resolve_credentials()?;
    let (company_table, send_queue_table) = RunnerConfig::resolve_tables();
    let run_id = RunnerConfig::resolve_run_id();

    let config = RunnerConfig {
        targeting_id: cli.targeting_id,
        tenant,
        worker,
        num_workers: cli.num_workers,
        headless: cli.headless,
        target_date: cli.target_date,
        shard_id: cli.shard_id,
        max_processed: cli.max_processed,
        company_id: cli.company_id,
        db_url,
        db_api_key,
        run_id,
        company_table,
        send_queue_table,
    };

    tracing::info!(
        targeting_id = config.targeting_id,
        workers = config.clamped_workers(),
        run_id = %sanitizer.sanitize(&config.run_id),
        extra_tables = config.uses_extra_tables(),
        "starting"
    );
    Runner::new(config).run().await?;
    Ok(())
}
