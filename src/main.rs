//! # ETL Scheduler Entry Point
//!
//! Runs one of the two scheduler processes (scanner or worker) or applies
//! database migrations, against the configuration loaded from layered env
//! files and process environment.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use tokio_util::sync::CancellationToken;

use etl_scheduler::config::ConfigLoader;
use etl_scheduler::db::{health_check, init_pool};
use etl_scheduler::notify::LogNotifier;
use etl_scheduler::scanner::Scanner;
use etl_scheduler::telemetry::init_tracing;
use etl_scheduler::worker::Worker;

#[derive(Parser)]
#[command(name = "etl-scheduler", about = "Recurring ETL job scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scanner: periodic maintenance and work-item scheduling.
    Scanner,
    /// Run a worker: claim work items and execute their runs.
    Worker,
    /// Apply pending database migrations and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load().context("loading configuration")?;
    config.validate().context("validating configuration")?;
    init_tracing(&config)?;

    if let Ok(redacted_json) = config.redacted_json() {
        tracing::info!(profile = %config.profile, config = %redacted_json, "Configuration loaded");
    }

    let db = init_pool(&config).await?;
    health_check(&db).await?;

    match cli.command {
        Command::Migrate => {
            Migrator::up(&db, None).await.context("applying migrations")?;
            tracing::info!("Migrations applied");
        }
        Command::Scanner => {
            Migrator::up(&db, None).await.context("applying migrations")?;
            let shutdown = shutdown_token();
            Scanner::new(db, &config, Arc::new(LogNotifier))
                .run(shutdown)
                .await;
        }
        Command::Worker => {
            Migrator::up(&db, None).await.context("applying migrations")?;
            let shutdown = shutdown_token();
            Worker::new(db, &config, Arc::new(LogNotifier))
                .run(shutdown)
                .await;
        }
    }

    Ok(())
}

/// Token cancelled on the first Ctrl-C so run loops can drain and exit.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            trigger.cancel();
        }
    });
    token
}
