mod cli;
mod commands;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use rulescope_core::config::{load_dotenv, Config};
use rulescope_core::{BatchSizeSource, FixedBatchSize};
use rulescope_queue::MemoryQueue;
use rulescope_rules::{ScopeEngine, TermMatcher};
use rulescope_storage::{PgStore, Stores};

use crate::cli::CliArgs;

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let config = Config::for_profile(&args.profile);
    config.log_summary();

    if !config.postgres.is_configured() {
        bail!("PostgreSQL is not configured: set PG_URL or PG_USERNAME");
    }

    let store = Arc::new(
        PgStore::connect(&config.postgres)
            .await
            .context("failed to connect to PostgreSQL")?,
    );
    info!("PostgreSQL connected, migrations applied");

    let batch_size: Arc<dyn BatchSizeSource> = match args.batch_size {
        Some(size) => Arc::new(FixedBatchSize(size)),
        None => Arc::new(config.batch_size_source()),
    };

    let engine = ScopeEngine::new(
        Stores::from_backend(store),
        Arc::new(MemoryQueue::new()),
        Arc::new(TermMatcher),
        batch_size,
        config.engine.max_retries,
    );

    commands::run(&engine, args.command).await
}
